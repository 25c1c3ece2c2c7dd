//! # Geomhandle
//!
//! Ownership and lifetime layer for wrappers over a native geometry engine.
//!
//! Every wrapper holds either a native handle it owns, or a link to the
//! container that owns the data. Links are resolved on every access, so a
//! wrapper can outlive its container and fail cleanly with
//! [`BindingError::ObjectCollected`] instead of touching freed memory.
//!
//! ## Architecture
//!
//! - **Native boundary**: the [`NativeEngine`](native::NativeEngine) trait
//!   and the in-process [`InMemoryEngine`](native::InMemoryEngine)
//! - **Dual-mode object**: [`CommonObject`], owned or referencing, with
//!   copy-on-write on first mutation
//! - **Parent kinds**: documents, captured references, file models,
//!   composite curves and shallow parents
//! - **Memory pressure**: size deltas of owned payloads, forwarded to a sink
//! - **User data**: managed payloads reached from native callbacks by
//!   generation-checked serial numbers
//!
//! Wrappers are single-threaded (`Rc`/`RefCell` inside). Only the user-data
//! type table is shared across threads.
//!
//! ```
//! use geomhandle::{BindingContext, Document, Geometry};
//! use geomhandle::native::{GeometryData, InMemoryEngine, Point3};
//!
//! let engine = InMemoryEngine::shared();
//! let ctx = BindingContext::new(engine.clone());
//! let doc = Document::new(&ctx);
//! let id = doc.add_native(engine.insert(GeometryData::Point(Point3::origin()))).unwrap();
//!
//! let geometry = doc.geometry(id).unwrap();
//! geometry.translate(1.0, 0.0, 0.0).unwrap();
//! assert!(geometry.is_owned());
//!
//! doc.close();
//! assert!(doc.geometry(id).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod geometry;
pub mod leak;
pub mod native;
pub mod object;
pub mod pressure;
pub mod report;
pub mod userdata;

// Re-export main types
pub use config::BindingConfig;
pub use container::{DocObjectId, Document, FileModel, ObjRef};
pub use context::{BindingContext, BindingContextBuilder};
pub use error::{BindingError, Result};
pub use geometry::{Curve, Geometry, GeometryBase, GeometryKind, Mesh, Point, PolyCurve, UnknownGeometry};
pub use object::{CommonObject, ConstCastGuard, OwnershipObserver, ParentKind, PointerState, WritePolicy};
pub use pressure::{PressureAccountant, PressureSink, TracingSink};
pub use report::{CollectingReporter, ErrorReporter, TracingReporter};
pub use userdata::{
    register_user_data_type, ArchiveReader, ArchiveWriter, DetachedUserData, MemoryArchive,
    SerialNumber, UserData, UserDataList,
};

/// Geomhandle version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
