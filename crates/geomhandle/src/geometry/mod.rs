//! Geometry wrappers over native payloads
//!
//! [`Geometry`] is a closed union over the kinds this crate knows, plus
//! [`Geometry::Unknown`] for type codes it does not. Every variant shares a
//! [`GeometryBase`], which derefs to the [`CommonObject`] that holds the
//! handle.

mod curve;
mod mesh;
mod point;

pub use curve::{Curve, PolyCurve};
pub use mesh::Mesh;
pub use point::Point;

use std::ops::Deref;
use std::rc::Rc;

use crate::context::BindingContext;
use crate::error::Result;
use crate::native::{type_code, ComponentIndex, CurveKind, NativeHandle, Transform};
use crate::object::{CommonObject, ParentRef};

/// Kind of a native geometry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Single point
    Point,
    /// Simple curve of the given representation
    Curve(CurveKind),
    /// Composite curve
    PolyCurve,
    /// Mesh
    Mesh,
    /// Type code this crate does not model
    Unknown(u32),
}

impl GeometryKind {
    /// Map a native type code.
    pub fn from_type_code(code: u32) -> Self {
        match code {
            type_code::POINT => GeometryKind::Point,
            type_code::LINE_CURVE => GeometryKind::Curve(CurveKind::Line),
            type_code::POLYLINE_CURVE => GeometryKind::Curve(CurveKind::Polyline),
            type_code::ARC_CURVE => GeometryKind::Curve(CurveKind::Arc),
            type_code::NURBS_CURVE => GeometryKind::Curve(CurveKind::Nurbs),
            type_code::POLY_CURVE => GeometryKind::PolyCurve,
            type_code::MESH => GeometryKind::Mesh,
            other => GeometryKind::Unknown(other),
        }
    }

    /// Whether this is any kind of curve.
    pub fn is_curve(self) -> bool {
        matches!(self, GeometryKind::Curve(_) | GeometryKind::PolyCurve)
    }
}

/// State and operations shared by every geometry wrapper.
#[derive(Debug)]
pub struct GeometryBase {
    object: CommonObject,
    kind: GeometryKind,
}

impl Deref for GeometryBase {
    type Target = CommonObject;

    fn deref(&self) -> &CommonObject {
        &self.object
    }
}

impl GeometryBase {
    /// The dual-mode object holding the handle.
    pub fn object(&self) -> &CommonObject {
        &self.object
    }

    /// Kind read from the engine when the wrapper was created.
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Owned deep copy, same kind.
    pub fn duplicate(&self) -> Result<Geometry> {
        Ok(Geometry::wrap(self.kind, self.object.duplicate()?))
    }

    /// Referencing alias, same kind.
    pub fn duplicate_shallow(&self) -> Geometry {
        Geometry::wrap(self.kind, self.object.duplicate_shallow())
    }

    /// Transform in place. `false` if the engine cannot transform this kind.
    pub fn transform(&self, xform: &Transform) -> Result<bool> {
        self.object.mutate(|engine, handle| engine.transform(handle, xform))
    }

    /// Translate in place.
    pub fn translate(&self, dx: f64, dy: f64, dz: f64) -> Result<bool> {
        self.transform(&Transform::translation(dx, dy, dz))
    }

    /// Scale uniformly about the origin.
    pub fn scale(&self, factor: f64) -> Result<bool> {
        self.transform(&Transform::scale(factor))
    }
}

/// Implements the shared plumbing of one geometry variant struct.
macro_rules! geometry_variant {
    ($name:ident, $variant:ident) => {
        impl $name {
            pub(crate) fn from_base(base: $crate::geometry::GeometryBase) -> Self {
                Self { base }
            }

            /// Owned deep copy.
            pub fn duplicate(&self) -> $crate::error::Result<Self> {
                Ok(Self::from_base($crate::geometry::GeometryBase {
                    object: self.base.object.duplicate()?,
                    kind: self.base.kind,
                }))
            }

            /// Referencing alias.
            pub fn duplicate_shallow(&self) -> Self {
                Self::from_base($crate::geometry::GeometryBase {
                    object: self.base.object.duplicate_shallow(),
                    kind: self.base.kind,
                })
            }

            /// Widen into a [`Geometry`](crate::geometry::Geometry).
            pub fn into_geometry(self) -> $crate::geometry::Geometry {
                $crate::geometry::Geometry::$variant(self)
            }
        }

        impl std::ops::Deref for $name {
            type Target = $crate::geometry::GeometryBase;

            fn deref(&self) -> &Self::Target {
                &self.base
            }
        }
    };
}
pub(crate) use geometry_variant;

/// Any wrapped geometry.
#[derive(Debug)]
pub enum Geometry {
    /// Point
    Point(Point),
    /// Simple curve
    Curve(Curve),
    /// Composite curve
    PolyCurve(PolyCurve),
    /// Mesh
    Mesh(Mesh),
    /// Payload of an unmodelled type, still fully owned and disposable
    Unknown(UnknownGeometry),
}

/// Wrapper for a type code this crate does not model.
#[derive(Debug)]
pub struct UnknownGeometry {
    base: GeometryBase,
}

geometry_variant!(UnknownGeometry, Unknown);

impl UnknownGeometry {
    /// Native type code.
    pub fn type_code(&self) -> u32 {
        match self.base.kind {
            GeometryKind::Unknown(code) => code,
            _ => 0,
        }
    }
}

impl Deref for Geometry {
    type Target = GeometryBase;

    fn deref(&self) -> &GeometryBase {
        match self {
            Geometry::Point(g) => g.deref(),
            Geometry::Curve(g) => g.deref(),
            Geometry::PolyCurve(g) => g.deref(),
            Geometry::Mesh(g) => g.deref(),
            Geometry::Unknown(g) => g.deref(),
        }
    }
}

impl Geometry {
    /// Take ownership of `handle` and wrap it as the kind the engine reports.
    pub fn from_native(ctx: &Rc<BindingContext>, handle: NativeHandle) -> Result<Self> {
        let kind = GeometryKind::from_type_code(ctx.engine().geometry_type(handle)?);
        Ok(Self::wrap(kind, CommonObject::owned(ctx, handle)?))
    }

    /// Wrap a handle owned elsewhere without taking ownership.
    pub fn wrap_borrowed(ctx: &Rc<BindingContext>, handle: NativeHandle) -> Result<Self> {
        let kind = GeometryKind::from_type_code(ctx.engine().geometry_type(handle)?);
        Ok(Self::wrap(kind, CommonObject::wrap_borrowed(ctx, handle)))
    }

    /// Referencing wrapper. Resolves once to learn the kind.
    pub(crate) fn referencing(
        ctx: &Rc<BindingContext>,
        parent: ParentRef,
        component: Option<ComponentIndex>,
    ) -> Result<Self> {
        let object = CommonObject::referencing(ctx, parent, component);
        let handle = object.resolve_read()?;
        let kind = GeometryKind::from_type_code(ctx.engine().geometry_type(handle)?);
        Ok(Self::wrap(kind, object))
    }

    /// Second wrapper over the same object.
    pub(crate) fn share(&self) -> Self {
        Self::wrap(self.kind(), self.object().share())
    }

    pub(crate) fn wrap(kind: GeometryKind, object: CommonObject) -> Self {
        let base = GeometryBase { object, kind };
        match kind {
            GeometryKind::Point => Geometry::Point(Point::from_base(base)),
            GeometryKind::Curve(_) => Geometry::Curve(Curve::from_base(base)),
            GeometryKind::PolyCurve => Geometry::PolyCurve(PolyCurve::from_base(base)),
            GeometryKind::Mesh => Geometry::Mesh(Mesh::from_base(base)),
            GeometryKind::Unknown(_) => Geometry::Unknown(UnknownGeometry::from_base(base)),
        }
    }

    /// The shared base.
    pub fn base(&self) -> &GeometryBase {
        self
    }

    /// As a point, if it is one.
    pub fn as_point(&self) -> Option<&Point> {
        match self {
            Geometry::Point(g) => Some(g),
            _ => None,
        }
    }

    /// As a simple curve, if it is one.
    pub fn as_curve(&self) -> Option<&Curve> {
        match self {
            Geometry::Curve(g) => Some(g),
            _ => None,
        }
    }

    /// As a composite curve, if it is one.
    pub fn as_polycurve(&self) -> Option<&PolyCurve> {
        match self {
            Geometry::PolyCurve(g) => Some(g),
            _ => None,
        }
    }

    /// As a mesh, if it is one.
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match self {
            Geometry::Mesh(g) => Some(g),
            _ => None,
        }
    }
}
