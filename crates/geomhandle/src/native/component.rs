//! Addressing of subobjects inside a native payload

use crate::error::{BindingError, Result};

/// Kinds of subobject an engine can hand out handles for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ComponentKind {
    /// Segment of a composite curve
    PolyCurveSegment,
}

/// A typed subobject index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentIndex {
    /// What kind of subobject
    pub kind: ComponentKind,
    /// Position within that kind
    pub index: usize,
}

impl ComponentIndex {
    /// Build an index from a signed value, rejecting negatives.
    pub fn new(kind: ComponentKind, index: i64) -> Result<Self> {
        let index = usize::try_from(index)
            .map_err(|_| BindingError::ComponentIndex { index, count: 0 })?;
        Ok(Self { kind, index })
    }

    /// Segment `index` of a composite curve.
    pub const fn segment(index: usize) -> Self {
        Self {
            kind: ComponentKind::PolyCurveSegment,
            index,
        }
    }

    /// Fail with `ComponentIndex` unless the index is below `count`.
    pub fn check(self, count: usize) -> Result<Self> {
        if self.index < count {
            Ok(self)
        } else {
            Err(BindingError::ComponentIndex {
                index: self.index as i64,
                count,
            })
        }
    }
}
