//! Parent kinds a referencing wrapper can resolve through
//!
//! Every variant answers two questions: which native handle backs the
//! wrapper right now, and what a write through the wrapper should do. Adding
//! a container kind means adding a variant here and its arms below.

use std::fmt;
use std::rc::Rc;

use super::ObjectCell;
use crate::container::{DocMember, FileElement, ObjRefInner};
use crate::error::{BindingError, Result};
use crate::native::{ComponentIndex, NativeEngine, NativeHandle};

/// What a write through a referencing wrapper does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Duplicate the current data and make the wrapper own the copy.
    Privatize,
    /// Write straight into the owner's live subobject. The owner itself
    /// goes through its own write resolution first.
    ForwardToOwner,
}

/// Public name of a [`ParentRef`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentKind {
    /// Object stored in a live document
    LiveContainerMember,
    /// Snapshot held by a captured object reference
    CapturedReference,
    /// Element of a loaded file model
    FileContainerElement,
    /// Segment of a composite curve wrapper
    CompositeCurveSegment,
    /// Another wrapper of the same kind
    ShallowParent,
}

impl ParentKind {
    /// Declared write policy of this kind.
    pub const fn write_policy(self) -> WritePolicy {
        match self {
            ParentKind::CompositeCurveSegment => WritePolicy::ForwardToOwner,
            ParentKind::LiveContainerMember
            | ParentKind::CapturedReference
            | ParentKind::FileContainerElement
            | ParentKind::ShallowParent => WritePolicy::Privatize,
        }
    }

    /// Short name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            ParentKind::LiveContainerMember => "document",
            ParentKind::CapturedReference => "object reference",
            ParentKind::FileContainerElement => "file model",
            ParentKind::CompositeCurveSegment => "composite curve",
            ParentKind::ShallowParent => "shallow parent",
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of asking a parent for something to write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Writable {
    /// Live handle owned by the parent chain
    Live(NativeHandle),
    /// New copy the caller now owns
    Fresh(NativeHandle),
}

/// Link from a referencing wrapper to whatever holds its data.
#[derive(Clone)]
pub(crate) enum ParentRef {
    LiveContainerMember(DocMember),
    CapturedReference(Rc<ObjRefInner>),
    FileContainerElement(FileElement),
    CompositeCurveSegment { owner: Rc<ObjectCell>, index: usize },
    ShallowParent(Rc<ObjectCell>),
}

impl fmt::Debug for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::CompositeCurveSegment { index, .. } => {
                write!(f, "CompositeCurveSegment({index})")
            }
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

impl ParentRef {
    pub(crate) fn kind(&self) -> ParentKind {
        match self {
            ParentRef::LiveContainerMember(_) => ParentKind::LiveContainerMember,
            ParentRef::CapturedReference(_) => ParentKind::CapturedReference,
            ParentRef::FileContainerElement(_) => ParentKind::FileContainerElement,
            ParentRef::CompositeCurveSegment { .. } => ParentKind::CompositeCurveSegment,
            ParentRef::ShallowParent(_) => ParentKind::ShallowParent,
        }
    }

    pub(crate) fn write_policy(&self) -> WritePolicy {
        self.kind().write_policy()
    }

    /// Current native handle, or `ObjectCollected` if the chain is broken.
    pub(crate) fn const_handle(
        &self,
        engine: &dyn NativeEngine,
        component: Option<ComponentIndex>,
    ) -> Result<NativeHandle> {
        let base = match self {
            ParentRef::LiveContainerMember(member) => member.const_handle()?,
            ParentRef::CapturedReference(objref) => objref.const_handle()?,
            ParentRef::FileContainerElement(element) => element.const_handle()?,
            ParentRef::CompositeCurveSegment { owner, index } => {
                let composite = owner.resolve_read()?;
                segment_of(engine, composite, *index)?
            }
            ParentRef::ShallowParent(parent) => parent.resolve_read()?,
        };
        match component {
            Some(component) => engine
                .component(base, component)
                .ok_or(BindingError::ObjectCollected),
            None => Ok(base),
        }
    }

    /// Something to write into, according to the declared policy.
    pub(crate) fn writable_handle(
        &self,
        engine: &dyn NativeEngine,
        component: Option<ComponentIndex>,
    ) -> Result<Writable> {
        match self {
            ParentRef::CompositeCurveSegment { owner, index } => {
                debug_assert_eq!(self.write_policy(), WritePolicy::ForwardToOwner);
                let composite = owner.resolve_write()?;
                let base = segment_of(engine, composite, *index)?;
                match component {
                    Some(component) => engine
                        .component(base, component)
                        .map(Writable::Live)
                        .ok_or(BindingError::ObjectCollected),
                    None => Ok(Writable::Live(base)),
                }
            }
            ParentRef::LiveContainerMember(_)
            | ParentRef::CapturedReference(_)
            | ParentRef::FileContainerElement(_)
            | ParentRef::ShallowParent(_) => {
                debug_assert_eq!(self.write_policy(), WritePolicy::Privatize);
                self.duplicate_current(engine, component).map(Writable::Fresh)
            }
        }
    }

    /// Deep copy of the data the chain currently resolves to.
    pub(crate) fn duplicate_current(
        &self,
        engine: &dyn NativeEngine,
        component: Option<ComponentIndex>,
    ) -> Result<NativeHandle> {
        let current = self.const_handle(engine, component)?;
        engine.duplicate(current)
    }

    /// Name of the first read-only container up the chain.
    pub(crate) fn read_only_container(&self) -> Option<&'static str> {
        match self {
            ParentRef::LiveContainerMember(member) => {
                member.is_read_only().then_some(ParentKind::LiveContainerMember.name())
            }
            ParentRef::CapturedReference(_) => None,
            ParentRef::FileContainerElement(element) => {
                element.is_read_only().then_some(ParentKind::FileContainerElement.name())
            }
            ParentRef::CompositeCurveSegment { owner, .. } => owner.read_only_container(),
            ParentRef::ShallowParent(parent) => parent.read_only_container(),
        }
    }

    /// Whether this link points at `cell` as its shallow parent.
    pub(crate) fn is_shallow_parent(&self, cell: &ObjectCell) -> bool {
        matches!(self, ParentRef::ShallowParent(parent) if std::ptr::eq(Rc::as_ptr(parent), cell))
    }
}

fn segment_of(engine: &dyn NativeEngine, composite: NativeHandle, index: usize) -> Result<NativeHandle> {
    engine
        .component(composite, ComponentIndex::segment(index))
        .ok_or(BindingError::ObjectCollected)
}
