//! The native engine boundary
//!
//! Everything below this module is foreign memory. Wrappers only ever see
//! [`NativeHandle`] values and reach the payload through [`NativeEngine`].

mod component;
mod data;
mod memory;

pub use component::{ComponentIndex, ComponentKind};
pub use data::{CurveKind, GeometryData, Point3, Transform};
pub use memory::InMemoryEngine;

use std::fmt;
use std::num::NonZeroU64;
use std::rc::Weak;

use uuid::Uuid;

use crate::error::Result;
use crate::userdata::{MemoryArchive, SerialNumber};

/// Opaque pointer to a native object. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(NonZeroU64);

impl NativeHandle {
    /// Wrap a raw pointer value; `None` for null.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(NativeHandle)
    }

    /// The raw pointer value.
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Native geometry type codes
pub mod type_code {
    /// NURBS curve
    pub const NURBS_CURVE: u32 = 2;
    /// Composite curve
    pub const POLY_CURVE: u32 = 3;
    /// Polyline curve
    pub const POLYLINE_CURVE: u32 = 4;
    /// Arc curve
    pub const ARC_CURVE: u32 = 5;
    /// Line curve
    pub const LINE_CURVE: u32 = 6;
    /// Mesh
    pub const MESH: u32 = 7;
    /// Point
    pub const POINT: u32 = 8;
}

/// Native-side record backing one piece of user data
#[derive(Debug, Clone, PartialEq)]
pub struct UserDataRecord {
    /// Serial number of the managed counterpart
    pub serial: SerialNumber,
    /// Class id of the managed type
    pub class_id: Uuid,
    /// Id of the application that owns the data
    pub application_id: Uuid,
    /// Human readable description
    pub description: String,
    /// Transforms accumulated since attachment
    pub xform: Transform,
}

/// Callbacks the engine invokes to reach managed user data.
///
/// Implementations must not unwind; see [`crate::report`].
pub trait UserDataCallbacks {
    /// The host object was transformed.
    fn on_transform(&self, serial: SerialNumber, xform: &Transform);

    /// Whether the data wants to be saved.
    fn on_archive(&self, serial: SerialNumber) -> bool;

    /// Load managed fields from `archive`.
    fn on_read(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool;

    /// Save managed fields to `archive`.
    fn on_write(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool;

    /// The host object was duplicated; `native` is the copied record.
    /// Returns the serial number of the new managed instance.
    fn on_duplicate(&self, serial: SerialNumber, native: NativeHandle) -> Option<SerialNumber>;

    /// Instantiate the managed type registered for `class_id`.
    fn on_create(&self, class_id: Uuid) -> Option<NativeHandle>;

    /// The native record is gone.
    fn on_delete(&self, serial: SerialNumber);
}

/// Entry points of a native geometry engine.
///
/// Handles returned by `duplicate` and `insert`-style calls are owned by the
/// caller and must eventually reach `delete`. Handles returned by `component`
/// stay owned by their container.
pub trait NativeEngine {
    /// Deep copy of a payload, including attached user data.
    fn duplicate(&self, handle: NativeHandle) -> Result<NativeHandle>;

    /// Approximate native byte size.
    fn size_of(&self, handle: NativeHandle) -> Result<usize>;

    /// Free a payload. Unknown handles are ignored.
    fn delete(&self, handle: NativeHandle);

    /// Native type code, see [`type_code`].
    fn geometry_type(&self, handle: NativeHandle) -> Result<u32>;

    /// Transform in place. `false` if the payload cannot be transformed.
    fn transform(&self, handle: NativeHandle, xform: &Transform) -> Result<bool>;

    /// Live handle to a subobject, owned by `handle`.
    fn component(&self, handle: NativeHandle, index: ComponentIndex) -> Option<NativeHandle>;

    /// Number of subobjects of `kind`.
    fn component_count(&self, handle: NativeHandle, kind: ComponentKind) -> Result<usize>;

    /// Move `segment` into the composite `handle`.
    fn polycurve_append(&self, handle: NativeHandle, segment: NativeHandle) -> Result<bool>;

    /// Location of a point object.
    fn point_location(&self, handle: NativeHandle) -> Result<Point3>;

    /// Move a point object.
    fn set_point_location(&self, handle: NativeHandle, location: Point3) -> Result<()>;

    /// Defining points of a simple curve.
    fn curve_points(&self, handle: NativeHandle) -> Result<Vec<Point3>>;

    /// Replace one defining point. `false` if out of range.
    fn curve_set_point(&self, handle: NativeHandle, index: usize, point: Point3) -> Result<bool>;

    /// Number of mesh vertices.
    fn mesh_vertex_count(&self, handle: NativeHandle) -> Result<usize>;

    /// Append vertices to a mesh.
    fn mesh_append_vertices(&self, handle: NativeHandle, vertices: &[Point3]) -> Result<()>;

    /// Install the managed callback table.
    fn set_user_data_callbacks(&self, callbacks: Weak<dyn UserDataCallbacks>);

    /// Create a detached native user-data record.
    fn create_user_data(&self, record: UserDataRecord) -> Result<NativeHandle>;

    /// Attach user data to an object, detaching it from any previous host.
    /// `false` if the object already carries data of the same class.
    fn attach_user_data(&self, object: NativeHandle, user_data: NativeHandle) -> Result<bool>;

    /// Serial number of the attached data with `class_id`, if any.
    fn find_user_data(&self, object: NativeHandle, class_id: Uuid) -> Result<Option<SerialNumber>>;

    /// Number of user-data records attached to `object`.
    fn user_data_count(&self, object: NativeHandle) -> Result<usize>;

    /// Accumulated transform of a user-data record.
    fn user_data_transform(&self, user_data: NativeHandle) -> Result<Transform>;

    /// Serial number stored in a user-data record.
    fn user_data_serial(&self, user_data: NativeHandle) -> Result<SerialNumber>;

    /// Detach every user-data record from `object`. The records become
    /// caller-owned: attach them elsewhere or `delete` them.
    fn detach_user_data(&self, object: NativeHandle) -> Result<Vec<NativeHandle>>;

    /// Copy the user data of `source` onto `dest` through
    /// [`UserDataCallbacks::on_duplicate`]. Classes `dest` already carries
    /// are skipped. Returns the number of records copied.
    fn copy_user_data(&self, source: NativeHandle, dest: NativeHandle) -> Result<usize>;

    /// Save the records of `object` that opt in through
    /// [`UserDataCallbacks::on_archive`] and [`UserDataCallbacks::on_write`].
    /// Returns the number of records written.
    fn write_user_data(&self, object: NativeHandle, archive: &mut MemoryArchive) -> Result<usize>;

    /// Recreate records saved by `write_user_data` through
    /// [`UserDataCallbacks::on_create`] and [`UserDataCallbacks::on_read`]
    /// and attach them to `object`. Returns the number of records attached.
    fn read_user_data(&self, object: NativeHandle, archive: &mut MemoryArchive) -> Result<usize>;
}
