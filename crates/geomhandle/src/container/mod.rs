//! Containers that hand out referencing wrappers
//!
//! Each container owns native handles and lends them to wrappers through a
//! [`ParentKind`](crate::ParentKind) link. Wrappers never hold container
//! handles themselves, so deleting an object or closing a container turns
//! later reads into `ObjectCollected` instead of dangling handles.

mod document;
mod file;

pub use document::{DocObjectId, Document, ObjRef};
pub use file::FileModel;

pub(crate) use document::{DocMember, ObjRefInner};
pub(crate) use file::FileElement;
