//! Indexed file models

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::context::BindingContext;
use crate::error::{BindingError, Result};
use crate::geometry::Geometry;
use crate::native::NativeHandle;
use crate::object::{ParentKind, ParentRef};

pub(crate) struct FileModelInner {
    ctx: Rc<BindingContext>,
    objects: RefCell<Vec<NativeHandle>>,
    read_only: bool,
    open: Cell<bool>,
}

impl FileModelInner {
    fn free_all(&self) {
        let objects = std::mem::take(&mut *self.objects.borrow_mut());
        for handle in objects {
            self.ctx.engine().delete(handle);
        }
    }
}

impl Drop for FileModelInner {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// Link from a wrapper to one file model element.
#[derive(Clone)]
pub(crate) struct FileElement {
    model: Weak<FileModelInner>,
    index: usize,
}

impl FileElement {
    pub(crate) fn const_handle(&self) -> Result<NativeHandle> {
        let model = self.model.upgrade().ok_or(BindingError::ObjectCollected)?;
        let objects = model.objects.borrow();
        objects
            .get(self.index)
            .copied()
            .ok_or(BindingError::ObjectCollected)
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.model.upgrade().map_or(false, |model| model.read_only)
    }
}

/// Objects loaded from a file, addressed by position.
///
/// A model opened read-only refuses edits of its elements, though wrappers
/// may still take private copies with `ensure_private_copy` or `duplicate`.
pub struct FileModel {
    inner: Rc<FileModelInner>,
}

impl fmt::Debug for FileModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileModel")
            .field("len", &self.len())
            .field("read_only", &self.inner.read_only)
            .field("open", &self.inner.open.get())
            .finish()
    }
}

impl FileModel {
    /// Create an empty model.
    pub fn new(ctx: &Rc<BindingContext>, read_only: bool) -> Self {
        Self::from_handles(ctx, Vec::new(), read_only)
    }

    /// Create a model from loaded handles. The model takes ownership.
    pub fn from_handles(ctx: &Rc<BindingContext>, handles: Vec<NativeHandle>, read_only: bool) -> Self {
        debug!(count = handles.len(), read_only, "file model loaded");
        Self {
            inner: Rc::new(FileModelInner {
                ctx: ctx.clone(),
                objects: RefCell::new(handles),
                read_only,
                open: Cell::new(true),
            }),
        }
    }

    /// Whether the model refuses edits.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Append a copy of what `geometry` currently sees.
    pub fn add(&self, geometry: &Geometry) -> Result<usize> {
        if !self.inner.open.get() {
            return Err(BindingError::ObjectCollected);
        }
        if self.inner.read_only {
            return Err(BindingError::ReadOnlyViolation {
                container: ParentKind::FileContainerElement.name(),
            });
        }
        let copy = self.inner.ctx.engine().duplicate(geometry.resolve_read()?)?;
        let mut objects = self.inner.objects.borrow_mut();
        objects.push(copy);
        Ok(objects.len() - 1)
    }

    /// Referencing wrapper over element `index`.
    ///
    /// Negative or out-of-range indices fail with `ComponentIndex`.
    pub fn geometry(&self, index: i64) -> Result<Geometry> {
        let count = self.len();
        let position = usize::try_from(index)
            .ok()
            .filter(|i| *i < count)
            .ok_or(BindingError::ComponentIndex { index, count })?;
        let element = FileElement {
            model: Rc::downgrade(&self.inner),
            index: position,
        };
        Geometry::referencing(&self.inner.ctx, ParentRef::FileContainerElement(element), None)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.objects.borrow().len()
    }

    /// Whether the model has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the model and free its elements. Idempotent.
    pub fn close(&self) {
        if self.inner.open.replace(false) {
            self.inner.free_all();
            debug!("file model closed");
        }
    }
}
