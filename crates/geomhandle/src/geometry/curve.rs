use tracing::debug;

use super::{geometry_variant, Geometry, GeometryBase, GeometryKind};
use crate::error::{BindingError, Result};
use crate::native::{ComponentIndex, ComponentKind, CurveKind, Point3};
use crate::object::ParentRef;

/// Simple curve: line, polyline, arc or NURBS.
#[derive(Debug)]
pub struct Curve {
    base: GeometryBase,
}

geometry_variant!(Curve, Curve);

impl Curve {
    /// Representation of this curve.
    pub fn curve_kind(&self) -> CurveKind {
        match self.base.kind {
            GeometryKind::Curve(kind) => kind,
            _ => CurveKind::Nurbs,
        }
    }

    /// Defining points (control points for NURBS).
    pub fn points(&self) -> Result<Vec<Point3>> {
        let handle = self.resolve_read()?;
        self.context().engine().curve_points(handle)
    }

    /// Number of defining points.
    pub fn point_count(&self) -> Result<usize> {
        Ok(self.points()?.len())
    }

    /// Replace defining point `index`.
    ///
    /// The index is checked against the current point count before anything
    /// is copied.
    pub fn set_point(&self, index: i64, point: Point3) -> Result<()> {
        let count = self.point_count()?;
        let position = usize::try_from(index)
            .ok()
            .filter(|i| *i < count)
            .ok_or(BindingError::ComponentIndex { index, count })?;
        let replaced = self
            .object()
            .mutate(|engine, handle| engine.curve_set_point(handle, position, point))?;
        if replaced {
            Ok(())
        } else {
            Err(BindingError::ComponentIndex { index, count })
        }
    }
}

/// Composite curve made of segments.
///
/// Segment wrappers write straight into this curve: editing a segment makes
/// this curve resolve for writing, and never copies the segment alone.
#[derive(Debug)]
pub struct PolyCurve {
    base: GeometryBase,
}

geometry_variant!(PolyCurve, PolyCurve);

impl PolyCurve {
    /// Number of segments.
    pub fn segment_count(&self) -> Result<usize> {
        let handle = self.resolve_read()?;
        self.context()
            .engine()
            .component_count(handle, ComponentKind::PolyCurveSegment)
    }

    /// Referencing wrapper over segment `index`.
    pub fn segment(&self, index: i64) -> Result<Geometry> {
        let component = ComponentIndex::new(ComponentKind::PolyCurveSegment, index)
            .map_err(|_| BindingError::ComponentIndex {
                index,
                count: self.segment_count().unwrap_or(0),
            })?
            .check(self.segment_count()?)?;
        let parent = ParentRef::CompositeCurveSegment {
            owner: self.object().cell().clone(),
            index: component.index,
        };
        Geometry::referencing(self.context(), parent, None)
    }

    /// Append a copy of `curve` as a new last segment.
    ///
    /// Returns `false` if the engine refused the segment.
    pub fn append(&self, curve: &Geometry) -> Result<bool> {
        let engine = self.context().engine();
        let copy = engine.duplicate(curve.resolve_read()?)?;
        let appended = match self
            .object()
            .mutate(|engine, handle| engine.polycurve_append(handle, copy))
        {
            Ok(appended) => appended,
            Err(err) => {
                engine.delete(copy);
                return Err(err);
            }
        };
        if !appended {
            engine.delete(copy);
            return Ok(false);
        }
        debug!(segment = %copy, "segment appended");
        self.report_memory_pressure()?;
        Ok(true)
    }
}
