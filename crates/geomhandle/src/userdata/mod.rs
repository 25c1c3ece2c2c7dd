//! Managed user data attached to native objects
//!
//! A [`UserData`] implementation lives on the Rust side. The engine keeps a
//! small native record per attachment and calls back through the
//! [`UserDataRegistry`] by [`SerialNumber`] whenever the host object is
//! transformed, duplicated or deleted.
//!
//! Types that should be creatable by the engine itself (for example while
//! reading a file) are registered once per process with
//! [`register_user_data_type`].

mod archive;
mod registry;
mod slots;

pub use archive::{ArchiveReader, ArchiveWriter, MemoryArchive};
pub use registry::UserDataRegistry;
pub use slots::SerialNumber;

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::context::BindingContext;
use crate::error::{BindingError, Result};
use crate::native::{NativeHandle, Transform};
use crate::object::CommonObject;

/// Upcast helper so trait objects can be downcast to their concrete type.
pub trait AsAny {
    /// `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Managed payload attached to a native object.
///
/// Only [`class_id`](UserData::class_id) is required. Every hook has a
/// no-op default. Hook errors and panics are routed to the context's
/// [`ErrorReporter`](crate::report::ErrorReporter) and never reach the engine.
pub trait UserData: AsAny + 'static {
    /// Stable type identifier. Data without one is never archived.
    fn class_id(&self) -> Option<Uuid>;

    /// Human readable description.
    fn description(&self) -> String {
        String::new()
    }

    /// Id of the application the data belongs to.
    fn application_id(&self) -> Uuid {
        Uuid::nil()
    }

    /// Whether the data opts into persistence.
    fn should_write(&self) -> bool {
        true
    }

    /// Save managed fields. Return `false` to skip this record.
    fn write(&self, _archive: &mut ArchiveWriter<'_>) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Load managed fields.
    fn read(&mut self, _archive: &mut ArchiveReader<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// The host object was transformed by `xform`.
    fn on_transform(&mut self, _xform: &Transform) -> anyhow::Result<()> {
        Ok(())
    }

    /// Copy managed-only fields from `source`, the instance being duplicated.
    /// `self` is a fresh instance from the type's factory.
    fn on_duplicate(&mut self, _source: &dyn UserData) -> anyhow::Result<()> {
        Ok(())
    }
}

impl dyn UserData {
    /// Downcast to a concrete type.
    pub fn downcast_ref<T: UserData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete type.
    pub fn downcast_mut<T: UserData>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Builds a fresh instance of one user-data type.
pub type UserDataFactory = fn() -> Box<dyn UserData>;

/// A registered user-data type.
#[derive(Debug, Clone, Copy)]
pub struct UserDataType {
    /// Stable type identifier
    pub class_id: Uuid,
    /// Rust type name, for diagnostics
    pub name: &'static str,
    /// Default-instance constructor
    pub factory: UserDataFactory,
}

fn type_table() -> &'static DashMap<Uuid, UserDataType> {
    static TYPES: OnceLock<DashMap<Uuid, UserDataType>> = OnceLock::new();
    TYPES.get_or_init(DashMap::new)
}

fn make<T: UserData + Default>() -> Box<dyn UserData> {
    Box::new(T::default())
}

/// Register `T` under `class_id` for engine-initiated creation.
///
/// Registration is process-wide and may happen from any thread. A second
/// registration under the same id replaces the first.
pub fn register_user_data_type<T: UserData + Default>(class_id: Uuid) {
    let name = std::any::type_name::<T>();
    type_table().insert(
        class_id,
        UserDataType {
            class_id,
            name,
            factory: make::<T>,
        },
    );
    debug!(class_id = %class_id, name, "user data type registered");
}

/// The type registered under `class_id`, if any.
pub fn lookup_user_data_type(class_id: Uuid) -> Option<UserDataType> {
    type_table().get(&class_id).map(|entry| *entry.value())
}

/// User data attached to the native object a wrapper resolves to.
///
/// For a referencing wrapper this is the container's object, not a private
/// copy.
#[derive(Debug)]
pub struct UserDataList<'a> {
    object: &'a CommonObject,
}

impl<'a> UserDataList<'a> {
    pub(crate) fn new(object: &'a CommonObject) -> Self {
        Self { object }
    }

    /// Attach `data`. Fails if the object already carries data with the
    /// same class id.
    pub fn add<T: UserData + Default>(&self, data: T) -> Result<SerialNumber> {
        let handle = self.object.resolve_read()?;
        let ctx = self.object.context();
        let class_id = data.class_id().unwrap_or_else(Uuid::nil);
        let (serial, native) = ctx.user_data().register(Box::new(data), make::<T>)?;

        // Deleting a detached record notifies the registry, which drops the entry.
        match ctx.engine().attach_user_data(handle, native) {
            Ok(true) => Ok(serial),
            Ok(false) => {
                ctx.engine().delete(native);
                Err(BindingError::native(format!(
                    "object {handle} already carries user data of class {class_id}"
                )))
            }
            Err(err) => {
                ctx.engine().delete(native);
                Err(err)
            }
        }
    }

    /// Serial number of the attached data with `class_id`.
    pub fn find(&self, class_id: Uuid) -> Result<Option<SerialNumber>> {
        let handle = self.object.resolve_read()?;
        self.object.context().engine().find_user_data(handle, class_id)
    }

    /// Number of attached records.
    pub fn count(&self) -> Result<usize> {
        let handle = self.object.resolve_read()?;
        self.object.context().engine().user_data_count(handle)
    }

    /// Borrow attached data as `T`.
    pub fn with<T: UserData, R>(&self, serial: SerialNumber, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.object.context().user_data().with(serial, f)
    }

    /// Mutably borrow attached data as `T`.
    pub fn with_mut<T: UserData, R>(
        &self,
        serial: SerialNumber,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        self.object.context().user_data().with_mut(serial, f)
    }

    /// Accumulated transform the engine recorded for `serial`.
    pub fn transform_of(&self, serial: SerialNumber) -> Result<Transform> {
        let ctx = self.object.context();
        let native = ctx
            .user_data()
            .native_handle(serial)
            .ok_or(BindingError::StaleSerialNumber(serial))?;
        ctx.engine().user_data_transform(native)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transfer
    // ═══════════════════════════════════════════════════════════════════

    /// Copy every attached record onto `dest`. Each copy gets a new serial
    /// number. Classes `dest` already carries are skipped.
    ///
    /// `dest` is resolved for writing, so a referencing `dest` privatizes.
    pub fn copy_to(&self, dest: &CommonObject) -> Result<usize> {
        let target = dest.resolve_write()?;
        let source = self.object.resolve_read()?;
        self.object.context().engine().copy_user_data(source, target)
    }

    /// Detach every record from the object. Serial numbers stay valid while
    /// the records wait in the returned holder.
    pub fn move_out(&self) -> Result<DetachedUserData> {
        let handle = self.object.resolve_read()?;
        let ctx = self.object.context();
        let records = ctx.engine().detach_user_data(handle)?;
        Ok(DetachedUserData {
            ctx: ctx.clone(),
            records,
        })
    }

    /// Attach records taken by [`move_out`](Self::move_out), keeping their
    /// serial numbers.
    ///
    /// Without `append`, data already on the object is deleted first. A
    /// record whose class is already present is deleted. Returns the number
    /// of records attached.
    pub fn move_in(&self, mut detached: DetachedUserData, append: bool) -> Result<usize> {
        let handle = self.object.resolve_read()?;
        let engine = self.object.context().engine();
        if !append {
            for native in engine.detach_user_data(handle)? {
                engine.delete(native);
            }
        }

        let mut attached = 0;
        let mut pending = std::mem::take(&mut detached.records).into_iter();
        while let Some(native) = pending.next() {
            match engine.attach_user_data(handle, native) {
                Ok(true) => attached += 1,
                Ok(false) => engine.delete(native),
                Err(err) => {
                    // Whatever is left is freed with the holder.
                    detached.records.push(native);
                    detached.records.extend(pending);
                    return Err(err);
                }
            }
        }
        debug!(object = %handle, attached, "user data moved in");
        Ok(attached)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Archiving
    // ═══════════════════════════════════════════════════════════════════

    /// Save every attached record that opts in. Returns the number written.
    pub fn write_to(&self, archive: &mut MemoryArchive) -> Result<usize> {
        let handle = self.object.resolve_read()?;
        self.object.context().engine().write_user_data(handle, archive)
    }

    /// Recreate records saved by [`write_to`](Self::write_to) and attach
    /// them. Classes must be registered with [`register_user_data_type`];
    /// others are reported and skipped. Returns the number attached.
    pub fn read_from(&self, archive: &mut MemoryArchive) -> Result<usize> {
        let handle = self.object.resolve_read()?;
        self.object.context().engine().read_user_data(handle, archive)
    }
}

/// User data detached from its host by [`UserDataList::move_out`].
///
/// Dropping the holder deletes whatever was not moved back in.
pub struct DetachedUserData {
    ctx: Rc<BindingContext>,
    records: Vec<NativeHandle>,
}

impl fmt::Debug for DetachedUserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedUserData")
            .field("records", &self.records.len())
            .finish()
    }
}

impl DetachedUserData {
    /// Number of held records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serial numbers of the held records.
    pub fn serials(&self) -> Vec<SerialNumber> {
        let engine = self.ctx.engine();
        self.records
            .iter()
            .filter_map(|native| engine.user_data_serial(*native).ok())
            .collect()
    }
}

impl Drop for DetachedUserData {
    fn drop(&mut self) {
        let engine = self.ctx.engine();
        for native in self.records.drain(..) {
            engine.delete(native);
        }
    }
}
