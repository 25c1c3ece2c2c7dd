//! Live documents and captured object references

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::BindingContext;
use crate::error::{BindingError, Result};
use crate::geometry::Geometry;
use crate::native::{ComponentIndex, NativeHandle};
use crate::object::{OwnershipObserver, ParentKind, ParentRef, PointerState};

/// Id of an object inside a [`Document`]. Never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocObjectId(u64);

impl DocObjectId {
    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wrapper handed out by [`Document::object_geometry`].
struct TrackedGeometry {
    geometry: Geometry,
    /// Set once the wrapper switched to a private copy
    edited: bool,
}

pub(crate) struct DocumentInner {
    ctx: Rc<BindingContext>,
    objects: RefCell<IndexMap<DocObjectId, NativeHandle>>,
    tracked: RefCell<HashMap<DocObjectId, TrackedGeometry>>,
    read_only: Cell<bool>,
    open: Cell<bool>,
    next_id: Cell<u64>,
}

impl DocumentInner {
    fn handle(&self, id: DocObjectId) -> Result<NativeHandle> {
        self.objects
            .borrow()
            .get(&id)
            .copied()
            .ok_or(BindingError::ObjectCollected)
    }

    /// Live tracked wrapper for `id`. A disposed one is forgotten.
    fn tracked_geometry(&self, id: DocObjectId) -> Option<Geometry> {
        let stale = {
            let mut tracked = self.tracked.borrow_mut();
            match tracked.get(&id) {
                Some(slot) if slot.geometry.state() != PointerState::Disposed => {
                    return Some(slot.geometry.share());
                }
                Some(_) => tracked.remove(&id),
                None => None,
            }
        };
        drop(stale);
        None
    }

    fn mark_edited(&self, id: DocObjectId) {
        match self.tracked.try_borrow_mut() {
            Ok(mut tracked) => {
                if let Some(slot) = tracked.get_mut(&id) {
                    slot.edited = true;
                    debug!(id = %id, "document object geometry edited");
                }
            }
            Err(_) => warn!(id = %id, "edit of tracked geometry not recorded"),
        }
    }

    /// Stop tracking `id`. The wrapper itself lives on in its callers.
    fn untrack(&self, id: DocObjectId) {
        let removed = self.tracked.borrow_mut().remove(&id);
        drop(removed);
    }

    fn untrack_all(&self) {
        let removed = std::mem::take(&mut *self.tracked.borrow_mut());
        drop(removed);
    }

    fn free_all(&self) {
        let objects = std::mem::take(&mut *self.objects.borrow_mut());
        for (_, handle) in objects {
            self.ctx.engine().delete(handle);
        }
    }
}

impl Drop for DocumentInner {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// Link from a wrapper to one document object.
#[derive(Clone)]
pub(crate) struct DocMember {
    doc: Weak<DocumentInner>,
    id: DocObjectId,
}

impl DocMember {
    pub(crate) fn const_handle(&self) -> Result<NativeHandle> {
        let doc = self.doc.upgrade().ok_or(BindingError::ObjectCollected)?;
        doc.handle(self.id)
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.doc.upgrade().map_or(false, |doc| doc.read_only.get())
    }
}

/// Records the first private copy of a tracked wrapper as an edit.
struct EditTracker {
    doc: Weak<DocumentInner>,
    id: DocObjectId,
}

impl OwnershipObserver for EditTracker {
    fn switched_to_owned(&self) {
        if let Some(doc) = self.doc.upgrade() {
            doc.mark_edited(self.id);
        }
    }
}

/// A live document: objects in insertion order, addressed by id.
///
/// Wrappers returned by [`geometry`](Self::geometry) reference the stored
/// object. Editing such a wrapper gives it a private copy; commit the edit
/// with [`replace`](Self::replace).
///
/// [`object_geometry`](Self::object_geometry) hands out one tracked wrapper
/// per object instead. Its edits stay attached to the object until
/// [`commit_changes`](Self::commit_changes) stores them.
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.len())
            .field("read_only", &self.is_read_only())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Document {
    /// Create an empty, writable document.
    pub fn new(ctx: &Rc<BindingContext>) -> Self {
        Self {
            inner: Rc::new(DocumentInner {
                ctx: ctx.clone(),
                objects: RefCell::new(IndexMap::new()),
                tracked: RefCell::new(HashMap::new()),
                read_only: Cell::new(false),
                open: Cell::new(true),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Allow or refuse modification.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.set(read_only);
    }

    /// Whether modification is refused.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.get()
    }

    /// Whether the document is still open.
    pub fn is_open(&self) -> bool {
        self.inner.open.get()
    }

    fn check_writable(&self) -> Result<()> {
        if !self.is_open() {
            return Err(BindingError::ObjectCollected);
        }
        if self.is_read_only() {
            return Err(BindingError::ReadOnlyViolation {
                container: ParentKind::LiveContainerMember.name(),
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Editing
    // ═══════════════════════════════════════════════════════════════════

    /// Store a copy of what `geometry` currently sees.
    pub fn add(&self, geometry: &Geometry) -> Result<DocObjectId> {
        self.check_writable()?;
        let current = geometry.resolve_read()?;
        let copy = self.inner.ctx.engine().duplicate(current)?;
        Ok(self.insert(copy))
    }

    /// Store a native handle. The document takes ownership of it.
    pub fn add_native(&self, handle: NativeHandle) -> Result<DocObjectId> {
        self.check_writable()?;
        Ok(self.insert(handle))
    }

    fn insert(&self, handle: NativeHandle) -> DocObjectId {
        let id = DocObjectId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner.objects.borrow_mut().insert(id, handle);
        debug!(id = %id, handle = %handle, "document object added");
        id
    }

    /// Delete an object. Wrappers referencing it are collected. `false` if
    /// the id was not present.
    pub fn delete(&self, id: DocObjectId) -> Result<bool> {
        self.check_writable()?;
        let removed = self.inner.objects.borrow_mut().shift_remove(&id);
        match removed {
            Some(handle) => {
                self.inner.untrack(id);
                self.inner.ctx.engine().delete(handle);
                debug!(id = %id, "document object deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Commit `geometry` as the new content of `id`.
    ///
    /// Wrappers still referencing `id` see the new content. Uncommitted
    /// edits of the tracked wrapper are dropped from the document.
    pub fn replace(&self, id: DocObjectId, geometry: &Geometry) -> Result<()> {
        self.check_writable()?;
        if !self.contains(id) {
            return Err(BindingError::ObjectCollected);
        }
        let engine = self.inner.ctx.engine();
        let copy = engine.duplicate(geometry.resolve_read()?)?;
        let previous = self.inner.objects.borrow_mut().insert(id, copy);
        self.inner.untrack(id);
        if let Some(previous) = previous {
            engine.delete(previous);
        }
        debug!(id = %id, handle = %copy, "document object replaced");
        Ok(())
    }

    /// Store the edited geometry of `id` in the document.
    ///
    /// `Ok(false)` if the tracked wrapper has no edits. The committed wrapper
    /// keeps its private copy; the next
    /// [`object_geometry`](Self::object_geometry) call returns a fresh
    /// wrapper over the stored object.
    pub fn commit_changes(&self, id: DocObjectId) -> Result<bool> {
        self.check_writable()?;
        let edited = match self.inner.tracked.borrow().get(&id) {
            Some(slot) if slot.edited => slot.geometry.share(),
            _ => return Ok(false),
        };
        self.replace(id, &edited)?;
        debug!(id = %id, "document object changes committed");
        Ok(true)
    }

    /// Whether the tracked wrapper of `id` holds uncommitted edits.
    pub fn is_edited(&self, id: DocObjectId) -> bool {
        self.inner
            .tracked
            .borrow()
            .get(&id)
            .map_or(false, |slot| slot.edited)
    }

    /// Close the document, freeing every object. Idempotent.
    pub fn close(&self) {
        if self.inner.open.replace(false) {
            self.inner.untrack_all();
            self.inner.free_all();
            debug!("document closed");
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════════════════════════════

    /// Referencing wrapper over the stored object.
    pub fn geometry(&self, id: DocObjectId) -> Result<Geometry> {
        self.inner.handle(id)?;
        Geometry::referencing(&self.inner.ctx, ParentRef::LiveContainerMember(self.member(id)), None)
    }

    /// The tracked wrapper of object `id`.
    ///
    /// Repeated calls return the same wrapper. Once it has been written
    /// through it is the object's edited geometry, and later calls keep
    /// returning it until [`commit_changes`](Self::commit_changes),
    /// [`replace`](Self::replace) or [`delete`](Self::delete).
    pub fn object_geometry(&self, id: DocObjectId) -> Result<Geometry> {
        if let Some(geometry) = self.inner.tracked_geometry(id) {
            return Ok(geometry);
        }
        let geometry = self.geometry(id)?;
        geometry.add_observer(Rc::new(EditTracker {
            doc: Rc::downgrade(&self.inner),
            id,
        }));
        let shared = geometry.share();
        self.inner.tracked.borrow_mut().insert(
            id,
            TrackedGeometry {
                geometry,
                edited: false,
            },
        );
        Ok(shared)
    }

    /// Referencing wrapper over one subobject of the stored object.
    ///
    /// The index is range-checked now; later reads resolve lazily.
    pub fn component_geometry(&self, id: DocObjectId, component: ComponentIndex) -> Result<Geometry> {
        let handle = self.inner.handle(id)?;
        let count = self.inner.ctx.engine().component_count(handle, component.kind)?;
        let component = component.check(count)?;
        Geometry::referencing(
            &self.inner.ctx,
            ParentRef::LiveContainerMember(self.member(id)),
            Some(component),
        )
    }

    /// Capture a reference that keeps a snapshot of the object.
    pub fn capture(&self, id: DocObjectId) -> Result<ObjRef> {
        let current = self.inner.handle(id)?;
        let snapshot = self.inner.ctx.engine().duplicate(current)?;
        Ok(ObjRef {
            inner: Rc::new(ObjRefInner {
                ctx: self.inner.ctx.clone(),
                object_id: id,
                handle: Cell::new(Some(snapshot)),
            }),
        })
    }

    fn member(&self, id: DocObjectId) -> DocMember {
        DocMember {
            doc: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Whether `id` is stored.
    pub fn contains(&self, id: DocObjectId) -> bool {
        self.inner.objects.borrow().contains_key(&id)
    }

    /// Stored ids in insertion order.
    pub fn ids(&self) -> Vec<DocObjectId> {
        self.inner.objects.borrow().keys().copied().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.objects.borrow().len()
    }

    /// Whether no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct ObjRefInner {
    ctx: Rc<BindingContext>,
    object_id: DocObjectId,
    handle: Cell<Option<NativeHandle>>,
}

impl ObjRefInner {
    pub(crate) fn const_handle(&self) -> Result<NativeHandle> {
        self.handle.get().ok_or(BindingError::ObjectCollected)
    }

    fn release(&self) {
        if let Some(handle) = self.handle.take() {
            self.ctx.engine().delete(handle);
            debug!(id = %self.object_id, "object reference released");
        }
    }
}

impl Drop for ObjRefInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reference captured from a document object.
///
/// Holds its own snapshot of the object, so it stays readable after the
/// document changes. Releasing or dropping it collects every wrapper taken
/// from it.
pub struct ObjRef {
    inner: Rc<ObjRefInner>,
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjRef")
            .field("object_id", &self.inner.object_id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ObjRef {
    /// Id of the captured object.
    pub fn object_id(&self) -> DocObjectId {
        self.inner.object_id
    }

    /// Referencing wrapper over the snapshot.
    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::referencing(
            &self.inner.ctx,
            ParentRef::CapturedReference(self.inner.clone()),
            None,
        )
    }

    /// Free the snapshot now. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }

    /// Whether the snapshot has been freed.
    pub fn is_released(&self) -> bool {
        self.inner.handle.get().is_none()
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        self.inner.release();
    }
}
