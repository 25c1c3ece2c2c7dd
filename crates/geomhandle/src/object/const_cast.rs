//! RAII guard for temporary const casts

use super::CommonObject;

/// Keeps a const cast applied until dropped.
///
/// Inside the guard the object reports a fixed handle. Every read still
/// checks that the parent hands out that same handle, so a handle freed by
/// its container fails with `ObjectCollected` instead of being returned.
///
/// # Example
///
/// ```
/// use geomhandle::{BindingContext, CommonObject, PointerState};
/// use geomhandle::native::{GeometryData, InMemoryEngine, Point3};
///
/// let engine = InMemoryEngine::shared();
/// let ctx = BindingContext::new(engine.clone());
/// let a = CommonObject::owned(&ctx, engine.insert(GeometryData::Point(Point3::origin()))).unwrap();
/// let b = a.duplicate_shallow();
///
/// {
///     let guard = b.const_cast_guard().unwrap();
///     assert_eq!(guard.state(), PointerState::Borrowed);
/// }
/// assert_eq!(b.state(), PointerState::Referencing);
/// ```
#[derive(Debug)]
pub struct ConstCastGuard<'a> {
    object: &'a CommonObject,
    applied: bool,
}

impl<'a> ConstCastGuard<'a> {
    pub(super) fn new(object: &'a CommonObject, applied: bool) -> Self {
        Self { object, applied }
    }

    /// Whether this guard applied the cast (and will remove it).
    pub fn applied(&self) -> bool {
        self.applied
    }
}

impl Drop for ConstCastGuard<'_> {
    fn drop(&mut self) {
        if self.applied {
            self.object.remove_const_cast();
        }
    }
}

impl std::ops::Deref for ConstCastGuard<'_> {
    type Target = CommonObject;

    fn deref(&self) -> &Self::Target {
        self.object
    }
}
