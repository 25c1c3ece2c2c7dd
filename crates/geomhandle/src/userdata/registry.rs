//! Serial-number registry dispatching native callbacks to managed user data

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::slots::{SerialNumber, SlotMap};
use super::{lookup_user_data_type, MemoryArchive, UserData, UserDataFactory};
use crate::error::{BindingError, Result};
use crate::native::{NativeEngine, NativeHandle, Transform, UserDataCallbacks, UserDataRecord};
use crate::report::{guard, ErrorReporter};

struct UserDataEntry {
    /// `None` while checked out to running user code
    instance: Option<Box<dyn UserData>>,
    native: Option<NativeHandle>,
    xform: Transform,
    class_id: Option<Uuid>,
    application_id: Uuid,
    factory: UserDataFactory,
}

/// An instance taken out of its slot while user code runs.
///
/// The registry stays unborrowed meanwhile, so callbacks fired from inside
/// that code can still reach it. Dropping the checkout puts the instance
/// back, unless its entry was deleted in the meantime.
struct Checkout<'r> {
    registry: &'r UserDataRegistry,
    serial: SerialNumber,
    instance: Option<Box<dyn UserData>>,
}

impl Checkout<'_> {
    fn data(&mut self) -> Result<&mut dyn UserData> {
        self.instance
            .as_deref_mut()
            .ok_or(BindingError::StaleSerialNumber(self.serial))
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let orphan = match self.registry.entries.try_borrow_mut() {
            Ok(mut entries) => match entries.get_mut(self.serial) {
                Some(entry) => {
                    entry.instance = Some(instance);
                    None
                }
                None => Some(instance),
            },
            Err(_) => {
                warn!(serial = %self.serial, "registry busy, dropping checked out user data");
                Some(instance)
            }
        };
        if orphan.is_some() {
            debug!(serial = %self.serial, "user data deleted while checked out");
        }
    }
}

/// Maps serial numbers to managed user-data instances.
///
/// Filled on creation and duplication, emptied when the engine reports that
/// a native record is gone. Every user hook runs through the error reporter
/// and never unwinds into the engine.
pub struct UserDataRegistry {
    engine: Rc<dyn NativeEngine>,
    reporter: Rc<dyn ErrorReporter>,
    entries: RefCell<SlotMap<UserDataEntry>>,
}

impl fmt::Debug for UserDataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl UserDataRegistry {
    pub(crate) fn new(engine: Rc<dyn NativeEngine>, reporter: Rc<dyn ErrorReporter>) -> Self {
        Self {
            engine,
            reporter,
            entries: RefCell::new(SlotMap::new()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Instantiate the type registered for `class_id` and give it a native
    /// record. The record is not attached to any object yet.
    pub fn create(&self, class_id: Uuid) -> Result<(SerialNumber, NativeHandle)> {
        let ty = lookup_user_data_type(class_id).ok_or(BindingError::UnknownUserDataType(class_id))?;
        self.register((ty.factory)(), ty.factory)
    }

    /// Register an existing instance and create its native record.
    pub(crate) fn register(
        &self,
        instance: Box<dyn UserData>,
        factory: UserDataFactory,
    ) -> Result<(SerialNumber, NativeHandle)> {
        let class_id = instance.class_id();
        let application_id = instance.application_id();
        let description = instance.description();
        let serial = self.entries.borrow_mut().insert(UserDataEntry {
            instance: Some(instance),
            native: None,
            xform: Transform::identity(),
            class_id,
            application_id,
            factory,
        });

        let record = UserDataRecord {
            serial,
            class_id: class_id.unwrap_or_else(Uuid::nil),
            application_id,
            description,
            xform: Transform::identity(),
        };
        let native = match self.engine.create_user_data(record) {
            Ok(native) => native,
            Err(err) => {
                self.entries.borrow_mut().remove(serial);
                return Err(err);
            }
        };
        if let Some(entry) = self.entries.borrow_mut().get_mut(serial) {
            entry.native = Some(native);
        }
        debug!(serial = %serial, native = %native, "user data created");
        Ok((serial, native))
    }

    /// Build the managed copy for a duplicated native record.
    ///
    /// The copy gets a fresh serial number. `None` if the source is unknown,
    /// checked out, or its duplicate hook failed.
    pub fn duplicate(&self, serial: SerialNumber, new_handle: NativeHandle) -> Option<SerialNumber> {
        let (factory, xform, class_id, application_id) = {
            let entries = self.entries.borrow();
            let Some(source) = entries.get(serial) else {
                warn!(serial = %serial, "duplicate of unknown user data");
                return None;
            };
            (source.factory, source.xform, source.class_id, source.application_id)
        };
        let mut source = self.checkout_for_hook(serial, "user data duplicate")?;
        let mut instance = factory();
        guard(self.reporter.as_ref(), "user data duplicate", || {
            let source = source.data()?;
            instance.on_duplicate(source)
        })?;
        drop(source);

        let new_serial = self.entries.borrow_mut().insert(UserDataEntry {
            instance: Some(instance),
            native: Some(new_handle),
            xform,
            class_id,
            application_id,
            factory,
        });
        debug!(source = %serial, copy = %new_serial, native = %new_handle, "user data duplicated");
        Some(new_serial)
    }

    /// Forget the instance behind `serial`. `false` if it was already gone.
    pub fn delete(&self, serial: SerialNumber) -> bool {
        let removed = self.entries.borrow_mut().remove(serial);
        match removed {
            Some(mut entry) => {
                entry.native = None;
                debug!(serial = %serial, "user data deleted");
                true
            }
            None => false,
        }
    }

    fn checkout(&self, serial: SerialNumber) -> Result<Checkout<'_>> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .get_mut(serial)
            .ok_or(BindingError::StaleSerialNumber(serial))?;
        let instance = entry
            .instance
            .take()
            .ok_or(BindingError::UserDataInUse(serial))?;
        Ok(Checkout {
            registry: self,
            serial,
            instance: Some(instance),
        })
    }

    /// Checkout for a callback. A stale serial is skipped quietly; an
    /// instance already checked out is reported.
    fn checkout_for_hook(&self, serial: SerialNumber, origin: &str) -> Option<Checkout<'_>> {
        match self.checkout(serial) {
            Ok(checkout) => Some(checkout),
            Err(BindingError::StaleSerialNumber(_)) => None,
            Err(err) => {
                self.reporter.report(origin, &err.into());
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Hooks
    // ═══════════════════════════════════════════════════════════════════

    /// Run the read hook against `archive`.
    pub fn read(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool {
        let Some(mut checkout) = self.checkout_for_hook(serial, "user data read") else {
            return false;
        };
        guard(self.reporter.as_ref(), "user data read", || {
            checkout.data()?.read(&mut archive.reader())
        })
        .is_some()
    }

    /// Run the write hook against `archive`.
    pub fn write(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool {
        let Some(mut checkout) = self.checkout_for_hook(serial, "user data write") else {
            return false;
        };
        guard(self.reporter.as_ref(), "user data write", || {
            checkout.data()?.write(&mut archive.writer())
        })
        .unwrap_or(false)
    }

    /// Whether the instance wants to be saved. Types without a stable class
    /// id are never archived.
    pub fn should_archive(&self, serial: SerialNumber) -> bool {
        let has_class_id = self
            .entries
            .borrow()
            .get(serial)
            .map_or(false, |entry| entry.class_id.is_some());
        if !has_class_id {
            return false;
        }
        let Some(mut checkout) = self.checkout_for_hook(serial, "user data archive") else {
            return false;
        };
        guard(self.reporter.as_ref(), "user data archive", || {
            Ok(checkout.data()?.should_write())
        })
        .unwrap_or(false)
    }

    /// Fold `xform` into the cached transform and run the transform hook.
    ///
    /// The cache is updated even when the hook cannot run because the
    /// instance is checked out.
    pub fn transform(&self, serial: SerialNumber, xform: &Transform) {
        {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(serial) else {
                return;
            };
            entry.xform = xform.multiply(&entry.xform);
        }
        let Some(mut checkout) = self.checkout_for_hook(serial, "user data transform") else {
            return;
        };
        guard(self.reporter.as_ref(), "user data transform", || {
            checkout.data()?.on_transform(xform)
        });
    }

    // ═══════════════════════════════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════════════════════════════

    /// Borrow the instance behind `serial` as `T`.
    ///
    /// The registry is not borrowed while `f` runs, so `f` may transform,
    /// duplicate or dispose the host. Re-entering the same serial fails with
    /// `UserDataInUse`.
    pub fn with<T: UserData, R>(&self, serial: SerialNumber, f: impl FnOnce(&T) -> R) -> Result<R> {
        let mut checkout = self.checkout(serial)?;
        let data = checkout
            .data()?
            .downcast_mut::<T>()
            .ok_or(BindingError::UserDataTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(data))
    }

    /// Mutably borrow the instance behind `serial` as `T`.
    pub fn with_mut<T: UserData, R>(
        &self,
        serial: SerialNumber,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        let mut checkout = self.checkout(serial)?;
        let data = checkout
            .data()?
            .downcast_mut::<T>()
            .ok_or(BindingError::UserDataTypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(data))
    }

    /// Whether `serial` still resolves.
    pub fn contains(&self, serial: SerialNumber) -> bool {
        self.entries.borrow().contains(serial)
    }

    /// Native record behind `serial`.
    pub fn native_handle(&self, serial: SerialNumber) -> Option<NativeHandle> {
        self.entries.borrow().get(serial).and_then(|e| e.native)
    }

    /// Transforms accumulated since the instance was created.
    pub fn cached_transform(&self, serial: SerialNumber) -> Option<Transform> {
        self.entries.borrow().get(serial).map(|e| e.xform)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no instances are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserDataCallbacks for UserDataRegistry {
    fn on_transform(&self, serial: SerialNumber, xform: &Transform) {
        self.transform(serial, xform);
    }

    fn on_archive(&self, serial: SerialNumber) -> bool {
        self.should_archive(serial)
    }

    fn on_read(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool {
        self.read(serial, archive)
    }

    fn on_write(&self, serial: SerialNumber, archive: &mut MemoryArchive) -> bool {
        self.write(serial, archive)
    }

    fn on_duplicate(&self, serial: SerialNumber, native: NativeHandle) -> Option<SerialNumber> {
        self.duplicate(serial, native)
    }

    fn on_create(&self, class_id: Uuid) -> Option<NativeHandle> {
        match self.create(class_id) {
            Ok((_, native)) => Some(native),
            Err(err) => {
                self.reporter.report("user data create", &err.into());
                None
            }
        }
    }

    fn on_delete(&self, serial: SerialNumber) {
        self.delete(serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::InMemoryEngine;
    use crate::report::CollectingReporter;
    use crate::userdata::{register_user_data_type, ArchiveReader, ArchiveWriter};
    use pretty_assertions::assert_eq;

    const TAG_ID: Uuid = Uuid::from_u128(0x5eed_0001);

    #[derive(Debug, Default)]
    struct Tag {
        label: String,
        moves: u32,
    }

    impl UserData for Tag {
        fn class_id(&self) -> Option<Uuid> {
            Some(TAG_ID)
        }

        fn write(&self, archive: &mut ArchiveWriter<'_>) -> anyhow::Result<bool> {
            archive.write(&self.label)?;
            Ok(true)
        }

        fn read(&mut self, archive: &mut ArchiveReader<'_>) -> anyhow::Result<()> {
            self.label = archive.read()?;
            Ok(())
        }

        fn on_transform(&mut self, _xform: &Transform) -> anyhow::Result<()> {
            self.moves += 1;
            Ok(())
        }

        fn on_duplicate(&mut self, source: &dyn UserData) -> anyhow::Result<()> {
            if let Some(source) = source.downcast_ref::<Tag>() {
                self.label = source.label.clone();
            }
            Ok(())
        }
    }

    fn registry() -> (Rc<CollectingReporter>, UserDataRegistry) {
        let reporter = Rc::new(CollectingReporter::new());
        let registry = UserDataRegistry::new(Rc::new(InMemoryEngine::new()), reporter.clone());
        (reporter, registry)
    }

    fn tag(label: &str) -> Box<dyn UserData> {
        Box::new(Tag {
            label: label.to_string(),
            moves: 0,
        })
    }

    fn make_tag() -> Box<dyn UserData> {
        Box::new(Tag::default())
    }

    #[test]
    fn test_duplicate_issues_new_serial_and_copies_fields() {
        let (_, registry) = registry();
        let (serial, native) = registry.register(tag("door"), make_tag).unwrap();

        let copy = registry.duplicate(serial, native).unwrap();
        assert_ne!(copy, serial);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.with(copy, |t: &Tag| t.label.clone()).unwrap(),
            "door"
        );
    }

    #[test]
    fn test_deleted_serial_is_stale() {
        let (_, registry) = registry();
        let (serial, _) = registry.register(tag("a"), make_tag).unwrap();
        assert!(registry.delete(serial));
        assert!(!registry.delete(serial));
        assert_eq!(
            registry.with(serial, |_: &Tag| ()).unwrap_err(),
            BindingError::StaleSerialNumber(serial)
        );
    }

    #[test]
    fn test_write_then_read_round_trips_label() {
        let (_, registry) = registry();
        let (source, _) = registry.register(tag("window"), make_tag).unwrap();
        let (target, _) = registry.register(tag(""), make_tag).unwrap();

        let mut archive = MemoryArchive::new();
        assert!(registry.write(source, &mut archive));
        assert!(registry.read(target, &mut archive));
        assert_eq!(
            registry.with(target, |t: &Tag| t.label.clone()).unwrap(),
            "window"
        );
    }

    #[test]
    fn test_read_failure_is_reported() {
        let (reporter, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();
        let mut empty = MemoryArchive::new();
        assert!(!registry.read(serial, &mut empty));
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_transform_updates_cache_and_runs_hook() {
        let (_, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();
        let shift = Transform::translation(1.0, 0.0, 0.0);
        registry.transform(serial, &shift);
        registry.transform(serial, &shift);
        assert_eq!(
            registry.cached_transform(serial),
            Some(Transform::translation(2.0, 0.0, 0.0))
        );
        assert_eq!(registry.with(serial, |t: &Tag| t.moves).unwrap(), 2);
    }

    #[test]
    fn test_create_requires_registered_type() {
        let (_, registry) = registry();
        let unknown = Uuid::from_u128(0xdead);
        assert_eq!(
            registry.create(unknown).unwrap_err(),
            BindingError::UnknownUserDataType(unknown)
        );

        register_user_data_type::<Tag>(TAG_ID);
        let (serial, _) = registry.create(TAG_ID).unwrap();
        assert!(registry.contains(serial));
        assert!(registry.should_archive(serial));
    }

    #[test]
    fn test_wrong_type_is_mismatch() {
        #[derive(Default)]
        struct Other;
        impl UserData for Other {
            fn class_id(&self) -> Option<Uuid> {
                None
            }
        }

        let (_, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();
        assert!(matches!(
            registry.with(serial, |_: &Other| ()),
            Err(BindingError::UserDataTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_nested_access_to_same_serial_is_in_use() {
        let (_, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();

        let inner = registry
            .with_mut(serial, |_: &mut Tag| registry.with(serial, |t: &Tag| t.moves))
            .unwrap();
        assert_eq!(inner, Err(BindingError::UserDataInUse(serial)));
        // The instance went back into its slot.
        assert_eq!(registry.with(serial, |t: &Tag| t.label.clone()).unwrap(), "x");
    }

    #[test]
    fn test_transform_while_checked_out_is_reported() {
        let (reporter, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();
        let shift = Transform::translation(0.0, 1.0, 0.0);

        registry
            .with_mut(serial, |_: &mut Tag| registry.transform(serial, &shift))
            .unwrap();

        assert_eq!(registry.cached_transform(serial), Some(shift));
        assert_eq!(registry.with(serial, |t: &Tag| t.moves).unwrap(), 0);
        assert_eq!(reporter.len(), 1);
        assert!(reporter.reports()[0].starts_with("user data transform"));
    }

    #[test]
    fn test_delete_while_checked_out_drops_instance() {
        let (_, registry) = registry();
        let (serial, _) = registry.register(tag("x"), make_tag).unwrap();

        let deleted = registry.with(serial, |_: &Tag| registry.delete(serial)).unwrap();

        assert!(deleted);
        assert!(!registry.contains(serial));
        assert!(registry.is_empty());
    }
}
