//! The dual-mode object behind every wrapper
//!
//! A [`CommonObject`] either owns its native handle or references data held
//! elsewhere and resolves a handle on every access. The first write through
//! a referencing object copies the data it currently sees and switches it to
//! owned. Reads never copy.
//!
//! ```text
//!            first write / ensure_private_copy
//! Referencing ─────────────────────────────────▶ Owned
//!     │  ▲                                         │
//!     │  │ remove_const_cast                       │ dispose / drop
//!     ▼  │                                         ▼
//!  Borrowed ◀── apply_const_cast               Disposed
//! ```

mod const_cast;
mod parent;

pub use const_cast::ConstCastGuard;
pub use parent::{ParentKind, WritePolicy};
pub(crate) use parent::{ParentRef, Writable};

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::context::BindingContext;
use crate::error::{BindingError, Result};
use crate::leak;
use crate::native::{ComponentIndex, NativeEngine, NativeHandle};
use crate::pressure::PressureRecord;
use crate::userdata::UserDataList;

/// Externally visible state of a [`CommonObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerState {
    /// Holds a handle it must free
    Owned,
    /// Holds a handle owned by someone else and never frees it
    Borrowed,
    /// Resolves its handle through a parent on every access
    Referencing,
    /// Disposed; every access fails with `ObjectCollected`
    Disposed,
}

/// Receives the ownership hooks of one object.
///
/// Wrapper types that cache values derived from the native payload use this
/// to drop those caches at the right time.
pub trait OwnershipObserver {
    /// A write handle is about to be returned.
    fn non_const_operation(&self) {}

    /// The object just switched from referencing to owning a private copy.
    fn switched_to_owned(&self) {}
}

/// Parent link saved while a const cast is active.
#[derive(Debug, Clone)]
pub(crate) struct ConstCastHolder {
    parent: ParentRef,
    component: Option<ComponentIndex>,
}

#[derive(Debug)]
enum Pointer {
    Owned {
        handle: NativeHandle,
        pressure: PressureRecord,
    },
    Borrowed {
        handle: NativeHandle,
        holder: Option<ConstCastHolder>,
    },
    Referencing {
        parent: ParentRef,
        component: Option<ComponentIndex>,
    },
    Disposed,
}

impl Pointer {
    fn state(&self) -> PointerState {
        match self {
            Pointer::Owned { .. } => PointerState::Owned,
            Pointer::Borrowed { .. } => PointerState::Borrowed,
            Pointer::Referencing { .. } => PointerState::Referencing,
            Pointer::Disposed => PointerState::Disposed,
        }
    }

    /// Parent link to copy from, for states that do not own their data.
    fn copy_source(&self) -> Option<(ParentRef, Option<ComponentIndex>)> {
        match self {
            Pointer::Referencing { parent, component } => Some((parent.clone(), *component)),
            Pointer::Borrowed {
                holder: Some(holder),
                ..
            } => Some((holder.parent.clone(), holder.component)),
            _ => None,
        }
    }
}

struct ObjectState {
    pointer: Pointer,
    shallow_children: Vec<Weak<ObjectCell>>,
    observers: Vec<Rc<dyn OwnershipObserver>>,
}

/// Shared cell behind a [`CommonObject`]. Shallow copies and composite
/// segments hold it by `Rc` so their parent outlives them.
pub(crate) struct ObjectCell {
    ctx: Rc<BindingContext>,
    state: RefCell<ObjectState>,
}

enum WriteTarget {
    Direct(NativeHandle),
    Via(ParentRef, Option<ComponentIndex>),
}

impl ObjectCell {
    fn new(ctx: Rc<BindingContext>, pointer: Pointer) -> Rc<Self> {
        Rc::new(Self {
            ctx,
            state: RefCell::new(ObjectState {
                pointer,
                shallow_children: Vec::new(),
                observers: Vec::new(),
            }),
        })
    }

    fn engine(&self) -> &dyn NativeEngine {
        self.ctx.engine()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════

    pub(crate) fn resolve_read(&self) -> Result<NativeHandle> {
        let (parent, component, cast) = match &self.state.borrow().pointer {
            Pointer::Owned { handle, .. }
            | Pointer::Borrowed {
                handle,
                holder: None,
            } => return Ok(*handle),
            Pointer::Disposed => return Err(BindingError::ObjectCollected),
            Pointer::Borrowed {
                handle,
                holder: Some(holder),
            } => (holder.parent.clone(), holder.component, Some(*handle)),
            Pointer::Referencing { parent, component } => (parent.clone(), *component, None),
        };
        let resolved = match (parent.const_handle(self.engine(), component), cast) {
            // A cast handle is only good while its parent still hands it out.
            (Ok(current), Some(held)) if current != held => Err(BindingError::ObjectCollected),
            (Err(_), Some(_)) => Err(BindingError::ObjectCollected),
            (result, _) => result,
        };
        if self.ctx.config().trace_resolution {
            match &resolved {
                Ok(handle) => trace!(parent = %parent.kind(), handle = %handle, "resolved read"),
                Err(err) => trace!(parent = %parent.kind(), error = %err, "read resolution failed"),
            }
        }
        resolved
    }

    pub(crate) fn resolve_write(&self) -> Result<NativeHandle> {
        let target = {
            let state = self.state.borrow();
            match &state.pointer {
                Pointer::Disposed => return Err(BindingError::ObjectCollected),
                Pointer::Borrowed { holder: None, handle } | Pointer::Owned { handle, .. } => {
                    WriteTarget::Direct(*handle)
                }
                pointer => match pointer.copy_source() {
                    Some((parent, component)) => WriteTarget::Via(parent, component),
                    None => return Err(BindingError::ObjectCollected),
                },
            }
        };

        let handle = match target {
            WriteTarget::Direct(handle) => handle,
            WriteTarget::Via(parent, component) => {
                if let Some(container) = parent.read_only_container() {
                    return Err(BindingError::ReadOnlyViolation { container });
                }
                match parent.writable_handle(self.engine(), component)? {
                    Writable::Live(handle) => handle,
                    Writable::Fresh(copy) => self.adopt(copy, &parent)?,
                }
            }
        };

        self.detach_shallow_children()?;
        self.notify_non_const();
        if self.ctx.config().trace_resolution {
            trace!(handle = %handle, "resolved write");
        }
        Ok(handle)
    }

    /// Switch to owning a private copy of whatever the object sees now.
    /// No-op for states that already hold a handle.
    pub(crate) fn privatize(&self) -> Result<NativeHandle> {
        let (parent, component) = {
            let state = self.state.borrow();
            match &state.pointer {
                Pointer::Owned { handle, .. } | Pointer::Borrowed { handle, holder: None } => {
                    return Ok(*handle)
                }
                Pointer::Disposed => return Err(BindingError::ObjectCollected),
                pointer => match pointer.copy_source() {
                    Some(source) => source,
                    None => return Err(BindingError::ObjectCollected),
                },
            }
        };
        let copy = parent.duplicate_current(self.engine(), component)?;
        self.adopt(copy, &parent)
    }

    /// Take ownership of `copy`, a fresh duplicate of the data seen through
    /// `parent`.
    fn adopt(&self, copy: NativeHandle, parent: &ParentRef) -> Result<NativeHandle> {
        let mut pressure = PressureRecord::default();
        if let Err(err) = self.ctx.pressure().report(&mut pressure, self.engine(), copy) {
            self.engine().delete(copy);
            return Err(err);
        }

        let (previous, observers) = {
            let mut state = self.state.borrow_mut();
            let previous = mem::replace(
                &mut state.pointer,
                Pointer::Owned {
                    handle: copy,
                    pressure,
                },
            );
            (previous, state.observers.clone())
        };
        // The old parent link may hold the last reference to another cell.
        drop(previous);

        leak::track_owned();
        debug!(handle = %copy, parent = %parent.kind(), "switched to owned copy");
        for observer in observers {
            observer.switched_to_owned();
        }
        Ok(copy)
    }

    /// Privatize every live shallow child still resolving through `self`.
    fn detach_shallow_children(&self) -> Result<()> {
        let children = mem::take(&mut self.state.borrow_mut().shallow_children);
        let mut pending = children.into_iter();
        while let Some(weak) = pending.next() {
            let Some(child) = weak.upgrade() else {
                continue;
            };
            if !child.is_shallow_child_of(self) {
                continue;
            }
            if let Err(err) = child.privatize() {
                let mut state = self.state.borrow_mut();
                state.shallow_children.push(weak);
                state.shallow_children.extend(pending);
                return Err(err);
            }
        }
        Ok(())
    }

    fn is_shallow_child_of(&self, parent: &ObjectCell) -> bool {
        match self.state.borrow().pointer.copy_source() {
            Some((link, _)) => link.is_shallow_parent(parent),
            None => false,
        }
    }

    fn notify_non_const(&self) {
        let observers = self.state.borrow().observers.clone();
        for observer in observers {
            observer.non_const_operation();
        }
    }

    pub(crate) fn read_only_container(&self) -> Option<&'static str> {
        let source = self.state.borrow().pointer.copy_source();
        source.and_then(|(parent, _)| parent.read_only_container())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Pressure and teardown
    // ═══════════════════════════════════════════════════════════════════

    fn report_memory_pressure(&self) -> Result<()> {
        let owner = {
            let mut state = self.state.borrow_mut();
            match &mut state.pointer {
                Pointer::Owned { handle, pressure } => {
                    return self.ctx.pressure().report(pressure, self.ctx.engine(), *handle);
                }
                Pointer::Referencing {
                    parent: ParentRef::CompositeCurveSegment { owner, .. },
                    ..
                } => owner.clone(),
                _ => return Ok(()),
            }
        };
        // A segment's size belongs to its composite.
        owner.report_memory_pressure()
    }

    fn take_pointer(&self) -> Option<Pointer> {
        // Already mid-teardown if the state is borrowed.
        let mut state = self.state.try_borrow_mut().ok()?;
        Some(mem::replace(&mut state.pointer, Pointer::Disposed))
    }

    fn release(&self, pointer: Pointer) {
        if let Pointer::Owned {
            handle,
            mut pressure,
        } = pointer
        {
            self.engine().delete(handle);
            self.ctx.pressure().release(&mut pressure);
            leak::untrack_owned();
            debug!(handle = %handle, "native handle freed");
        }
    }
}

impl Drop for ObjectCell {
    fn drop(&mut self) {
        let pointer = mem::replace(&mut self.state.get_mut().pointer, Pointer::Disposed);
        self.release(pointer);
    }
}

/// Handle wrapper with owned and referencing modes.
///
/// Not `Clone`: use [`duplicate`](Self::duplicate) for an independent owned
/// copy or [`duplicate_shallow`](Self::duplicate_shallow) for a cheap alias.
///
/// # Example
///
/// ```
/// use geomhandle::{BindingContext, CommonObject, PointerState};
/// use geomhandle::native::{GeometryData, InMemoryEngine, Point3};
///
/// let engine = InMemoryEngine::shared();
/// let ctx = BindingContext::new(engine.clone());
/// let handle = engine.insert(GeometryData::Point(Point3::origin()));
///
/// let a = CommonObject::owned(&ctx, handle).unwrap();
/// let b = a.duplicate_shallow();
/// assert_eq!(b.state(), PointerState::Referencing);
/// assert_eq!(b.resolve_read().unwrap(), handle);
///
/// b.ensure_private_copy().unwrap();
/// assert!(b.is_owned());
/// assert_ne!(b.resolve_read().unwrap(), handle);
/// ```
pub struct CommonObject {
    cell: Rc<ObjectCell>,
}

impl fmt::Debug for CommonObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.state.try_borrow() {
            Ok(state) => f
                .debug_struct("CommonObject")
                .field("pointer", &state.pointer)
                .finish(),
            Err(_) => f.write_str("CommonObject { <borrowed> }"),
        }
    }
}

impl CommonObject {
    // ═══════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════

    /// Take ownership of a freshly allocated handle.
    ///
    /// If measuring the handle fails it is left to the caller.
    pub fn owned(ctx: &Rc<BindingContext>, handle: NativeHandle) -> Result<Self> {
        let mut pressure = PressureRecord::default();
        ctx.pressure().report(&mut pressure, ctx.engine(), handle)?;
        leak::track_owned();
        Ok(Self {
            cell: ObjectCell::new(ctx.clone(), Pointer::Owned { handle, pressure }),
        })
    }

    /// Wrap a handle owned elsewhere, such as one passed into a callback.
    /// The wrapper never frees it.
    pub fn wrap_borrowed(ctx: &Rc<BindingContext>, handle: NativeHandle) -> Self {
        Self {
            cell: ObjectCell::new(
                ctx.clone(),
                Pointer::Borrowed {
                    handle,
                    holder: None,
                },
            ),
        }
    }

    pub(crate) fn referencing(
        ctx: &Rc<BindingContext>,
        parent: ParentRef,
        component: Option<ComponentIndex>,
    ) -> Self {
        Self {
            cell: ObjectCell::new(ctx.clone(), Pointer::Referencing { parent, component }),
        }
    }

    /// Independent owned deep copy of what this object sees now.
    pub fn duplicate(&self) -> Result<Self> {
        let current = self.resolve_read()?;
        let engine = self.cell.engine();
        let copy = engine.duplicate(current)?;
        Self::owned(&self.cell.ctx, copy).map_err(|err| {
            engine.delete(copy);
            err
        })
    }

    /// Referencing alias whose parent is this object.
    ///
    /// Reads see this object's data until either side is written to.
    pub fn duplicate_shallow(&self) -> Self {
        let child = Self::referencing(
            &self.cell.ctx,
            ParentRef::ShallowParent(self.cell.clone()),
            None,
        );
        let mut state = self.cell.state.borrow_mut();
        state.shallow_children.retain(|weak| weak.strong_count() > 0);
        state.shallow_children.push(Rc::downgrade(&child.cell));
        child
    }

    // ═══════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════

    /// Handle to read from. Never copies.
    pub fn resolve_read(&self) -> Result<NativeHandle> {
        self.cell.resolve_read()
    }

    /// Handle to write into, copying first if this object does not own its
    /// data.
    ///
    /// Fails with `ReadOnlyViolation` when the parent chain ends in a
    /// read-only container, and with `ObjectCollected` when it is broken.
    pub fn resolve_write(&self) -> Result<NativeHandle> {
        self.cell.resolve_write()
    }

    /// Make this object own a private copy now, even without a write.
    /// Idempotent. Allowed on read-only containers.
    pub fn ensure_private_copy(&self) -> Result<()> {
        self.cell.privatize().map(|_| ())
    }

    /// Resolve for writing, run `op`, then re-report the native size if the
    /// configuration asks for it.
    pub fn mutate<R>(&self, op: impl FnOnce(&dyn NativeEngine, NativeHandle) -> Result<R>) -> Result<R> {
        let handle = self.resolve_write()?;
        let out = op(self.cell.engine(), handle)?;
        if self.cell.ctx.config().report_after_mutation {
            self.report_memory_pressure()?;
        }
        Ok(out)
    }

    /// Re-measure the native payload after an operation that resized it.
    /// Does nothing unless the object owns its handle or is a segment of
    /// one that does.
    pub fn report_memory_pressure(&self) -> Result<()> {
        self.cell.report_memory_pressure()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Const cast
    // ═══════════════════════════════════════════════════════════════════

    /// Resolve now and hold the handle as if owned, without owning it.
    ///
    /// `Ok(false)` if the object already holds a handle. Revert with
    /// [`remove_const_cast`](Self::remove_const_cast).
    pub fn apply_const_cast(&self) -> Result<bool> {
        let (parent, component) = {
            let state = self.cell.state.borrow();
            match &state.pointer {
                Pointer::Disposed => return Err(BindingError::ObjectCollected),
                Pointer::Owned { .. } | Pointer::Borrowed { .. } => return Ok(false),
                Pointer::Referencing { parent, component } => (parent.clone(), *component),
            }
        };
        let handle = parent.const_handle(self.cell.engine(), component)?;
        self.cell.state.borrow_mut().pointer = Pointer::Borrowed {
            handle,
            holder: Some(ConstCastHolder { parent, component }),
        };
        Ok(true)
    }

    /// Restore the parent link saved by `apply_const_cast`. `false` if no
    /// const cast is active.
    pub fn remove_const_cast(&self) -> bool {
        let mut state = self.cell.state.borrow_mut();
        let holder = match &mut state.pointer {
            Pointer::Borrowed { holder, .. } => holder.take(),
            _ => None,
        };
        match holder {
            Some(ConstCastHolder { parent, component }) => {
                state.pointer = Pointer::Referencing { parent, component };
                true
            }
            None => false,
        }
    }

    /// Apply a const cast for the lifetime of the returned guard.
    pub fn const_cast_guard(&self) -> Result<ConstCastGuard<'_>> {
        let applied = self.apply_const_cast()?;
        Ok(ConstCastGuard::new(self, applied))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Teardown
    // ═══════════════════════════════════════════════════════════════════

    /// Free the native handle if owned and drop the parent link. Idempotent.
    ///
    /// Shallow copies still resolving through this object fail with
    /// `ObjectCollected` afterwards.
    pub fn dispose(&self) {
        if let Some(pointer) = self.cell.take_pointer() {
            self.cell.release(pointer);
        }
    }

    /// Give up an owned handle without freeing it. The caller becomes
    /// responsible for deleting it.
    ///
    /// Returns `None` for objects that do not own a handle. The object is
    /// disposed either way.
    pub fn into_raw(self) -> Option<NativeHandle> {
        match self.cell.take_pointer()? {
            Pointer::Owned {
                handle,
                mut pressure,
            } => {
                self.cell.ctx.pressure().release(&mut pressure);
                leak::untrack_owned();
                debug!(handle = %handle, "native handle released to caller");
                Some(handle)
            }
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════

    /// Current state.
    pub fn state(&self) -> PointerState {
        self.cell.state.borrow().pointer.state()
    }

    /// Whether this object owns its handle.
    pub fn is_owned(&self) -> bool {
        self.state() == PointerState::Owned
    }

    /// Whether this object resolves through a parent.
    pub fn is_referencing(&self) -> bool {
        self.state() == PointerState::Referencing
    }

    /// Whether writes would be refused by a read-only container.
    pub fn is_read_only(&self) -> bool {
        self.cell.read_only_container().is_some()
    }

    /// Kind of the parent this object resolves through, if any.
    pub fn parent_kind(&self) -> Option<ParentKind> {
        self.cell
            .state
            .borrow()
            .pointer
            .copy_source()
            .map(|(parent, _)| parent.kind())
    }

    /// Bytes this object last reported as memory pressure.
    pub fn reported_size(&self) -> u64 {
        match &self.cell.state.borrow().pointer {
            Pointer::Owned { pressure, .. } => pressure.reported(),
            _ => 0,
        }
    }

    /// Register an observer for the ownership hooks. Observers are called
    /// in registration order.
    pub fn add_observer(&self, observer: Rc<dyn OwnershipObserver>) {
        self.cell.state.borrow_mut().observers.push(observer);
    }

    /// Context this object was created in.
    pub fn context(&self) -> &Rc<BindingContext> {
        &self.cell.ctx
    }

    /// User data attached to the resolved native object.
    pub fn user_data(&self) -> UserDataList<'_> {
        UserDataList::new(self)
    }

    pub(crate) fn cell(&self) -> &Rc<ObjectCell> {
        &self.cell
    }

    /// Second handle on the same object. Both see every state change.
    pub(crate) fn share(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}
