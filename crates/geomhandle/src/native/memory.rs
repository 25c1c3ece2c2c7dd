//! In-process reference engine
//!
//! Payloads live in a handle table. Composite curves own their segments as
//! separate entries, and user-data records hang off their host entry, which
//! is enough structure to exercise every ownership path of the wrappers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    type_code, ComponentIndex, ComponentKind, CurveKind, GeometryData, NativeEngine,
    NativeHandle, Point3, Transform, UserDataCallbacks, UserDataRecord,
};
use crate::error::{BindingError, Result};
use crate::userdata::{MemoryArchive, SerialNumber};

/// Fixed per-entry cost reported by `size_of`
const ENTRY_OVERHEAD: usize = 32;
/// Fixed cost of one attached user-data record
const USER_DATA_OVERHEAD: usize = 64;

/// Archive chunk preceding each saved user-data record
#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    class_id: Uuid,
    chunks: usize,
}

enum Stored {
    /// Any payload without nested handles
    Simple(GeometryData),
    /// Composite curve; segment handles are owned by this entry
    PolyCurve(Vec<NativeHandle>),
}

enum Payload {
    Geometry(Stored),
    UserData(UserDataRecord),
}

struct Entry {
    payload: Payload,
    /// Containing entry for segments and attached user data
    owner: Option<NativeHandle>,
    user_data: Vec<NativeHandle>,
}

#[derive(Default)]
struct EngineState {
    entries: HashMap<NativeHandle, Entry>,
    next_raw: u64,
    delete_calls: usize,
    invalid_deletes: usize,
}

impl EngineState {
    fn alloc(&mut self, payload: Payload, owner: Option<NativeHandle>) -> NativeHandle {
        let handle = NativeHandle(NonZeroU64::MIN.saturating_add(self.next_raw));
        self.next_raw += 1;
        self.entries.insert(
            handle,
            Entry {
                payload,
                owner,
                user_data: Vec::new(),
            },
        );
        handle
    }

    fn entry(&self, handle: NativeHandle) -> Result<&Entry> {
        self.entries
            .get(&handle)
            .ok_or_else(|| BindingError::native(format!("invalid handle {handle}")))
    }

    fn stored(&self, handle: NativeHandle) -> Result<&Stored> {
        match &self.entry(handle)?.payload {
            Payload::Geometry(stored) => Ok(stored),
            Payload::UserData(_) => Err(BindingError::native(format!(
                "handle {handle} is user data, not geometry"
            ))),
        }
    }

    fn stored_mut(&mut self, handle: NativeHandle) -> Result<&mut Stored> {
        match self.entries.get_mut(&handle).map(|e| &mut e.payload) {
            Some(Payload::Geometry(stored)) => Ok(stored),
            Some(Payload::UserData(_)) => Err(BindingError::native(format!(
                "handle {handle} is user data, not geometry"
            ))),
            None => Err(BindingError::native(format!("invalid handle {handle}"))),
        }
    }

    fn record(&self, handle: NativeHandle) -> Result<&UserDataRecord> {
        match &self.entry(handle)?.payload {
            Payload::UserData(record) => Ok(record),
            Payload::Geometry(_) => Err(BindingError::native(format!(
                "handle {handle} is geometry, not user data"
            ))),
        }
    }

    fn attached_records(&self, object: NativeHandle) -> Result<Vec<&UserDataRecord>> {
        Ok(self
            .entry(object)?
            .user_data
            .iter()
            .filter_map(|ud| self.record(*ud).ok())
            .collect())
    }

    /// Unlink `user_data` from `object`, leaving it top-level.
    fn unlink_record(&mut self, object: NativeHandle, user_data: NativeHandle) {
        if let Some(host) = self.entries.get_mut(&object) {
            host.user_data.retain(|ud| *ud != user_data);
        }
        if let Some(entry) = self.entries.get_mut(&user_data) {
            entry.owner = None;
        }
    }

    fn insert_tree(&mut self, data: GeometryData, owner: Option<NativeHandle>) -> NativeHandle {
        match data {
            GeometryData::PolyCurve(segments) => {
                let handle = self.alloc(Payload::Geometry(Stored::PolyCurve(Vec::new())), owner);
                let children: Vec<NativeHandle> = segments
                    .into_iter()
                    .map(|segment| self.insert_tree(segment, Some(handle)))
                    .collect();
                if let Ok(Stored::PolyCurve(slot)) = self.stored_mut(handle) {
                    *slot = children;
                }
                handle
            }
            other => self.alloc(Payload::Geometry(Stored::Simple(other)), owner),
        }
    }

    fn snapshot(&self, handle: NativeHandle) -> Result<GeometryData> {
        match self.stored(handle)? {
            Stored::Simple(data) => Ok(data.clone()),
            Stored::PolyCurve(segments) => segments
                .iter()
                .map(|segment| self.snapshot(*segment))
                .collect::<Result<Vec<_>>>()
                .map(GeometryData::PolyCurve),
        }
    }

    /// Copy the geometry tree under `handle`. User data is not copied here.
    fn clone_tree(&mut self, handle: NativeHandle, owner: Option<NativeHandle>) -> Result<NativeHandle> {
        let data = self.snapshot(handle)?;
        Ok(self.insert_tree(data, owner))
    }

    /// Remove `handle` and everything it owns. Returns the serial numbers of
    /// removed user data so the caller can notify the managed side.
    fn remove_tree(&mut self, handle: NativeHandle) -> Vec<SerialNumber> {
        let mut serials = Vec::new();
        let Some(entry) = self.entries.remove(&handle) else {
            return serials;
        };
        for user_data in entry.user_data {
            serials.extend(self.remove_tree(user_data));
        }
        match entry.payload {
            Payload::UserData(record) => serials.push(record.serial),
            Payload::Geometry(Stored::PolyCurve(segments)) => {
                for segment in segments {
                    serials.extend(self.remove_tree(segment));
                }
            }
            Payload::Geometry(Stored::Simple(_)) => {}
        }
        serials
    }

    fn size_of(&self, handle: NativeHandle) -> Result<usize> {
        let entry = self.entry(handle)?;
        let payload = match &entry.payload {
            Payload::UserData(record) => USER_DATA_OVERHEAD + record.description.len(),
            Payload::Geometry(Stored::Simple(data)) => match data {
                GeometryData::Point(_) => 24,
                GeometryData::Curve { points, .. } => 8 + 24 * points.len(),
                GeometryData::Mesh { vertices, faces } => 24 * vertices.len() + 12 * faces.len(),
                GeometryData::Opaque { bytes, .. } => bytes.len(),
                // Stored as `Stored::PolyCurve`, never as simple data
                GeometryData::PolyCurve(_) => 0,
            },
            Payload::Geometry(Stored::PolyCurve(segments)) => {
                let mut total = 8 * segments.len();
                for segment in segments {
                    total += self.size_of(*segment)?;
                }
                total
            }
        };
        let mut attached = 0;
        for user_data in &entry.user_data {
            attached += self.size_of(*user_data)?;
        }
        Ok(ENTRY_OVERHEAD + payload + attached)
    }

    fn transform_tree(&mut self, handle: NativeHandle, xform: &Transform) -> Result<bool> {
        let segments = match self.stored_mut(handle)? {
            Stored::Simple(GeometryData::Point(p)) => {
                *p = xform.apply(*p);
                return Ok(true);
            }
            Stored::Simple(GeometryData::Curve { points, .. }) => {
                points.iter_mut().for_each(|p| *p = xform.apply(*p));
                return Ok(true);
            }
            Stored::Simple(GeometryData::Mesh { vertices, .. }) => {
                vertices.iter_mut().for_each(|p| *p = xform.apply(*p));
                return Ok(true);
            }
            Stored::Simple(GeometryData::Opaque { .. }) | Stored::Simple(GeometryData::PolyCurve(_)) => {
                return Ok(false)
            }
            Stored::PolyCurve(segments) => segments.clone(),
        };
        let mut all = true;
        for segment in segments {
            all &= self.transform_tree(segment, xform)?;
        }
        Ok(all)
    }
}

/// Reference [`NativeEngine`] keeping every payload in process memory.
///
/// # Example
///
/// ```
/// use geomhandle::native::{GeometryData, InMemoryEngine, NativeEngine, Point3};
///
/// let engine = InMemoryEngine::new();
/// let line = engine.insert(GeometryData::line(Point3::origin(), Point3::new(1.0, 0.0, 0.0)));
/// let copy = engine.duplicate(line).unwrap();
/// assert_ne!(line, copy);
/// assert_eq!(engine.snapshot(line), engine.snapshot(copy));
/// engine.delete(line);
/// engine.delete(copy);
/// assert_eq!(engine.live_handles(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryEngine {
    state: RefCell<EngineState>,
    callbacks: RefCell<Option<Weak<dyn UserDataCallbacks>>>,
}

impl InMemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty engine behind an `Rc`, ready for a context.
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    /// Store a new payload; the caller owns the returned handle.
    pub fn insert(&self, data: GeometryData) -> NativeHandle {
        self.state.borrow_mut().insert_tree(data, None)
    }

    /// Current payload behind `handle`, segments expanded.
    pub fn snapshot(&self, handle: NativeHandle) -> Option<GeometryData> {
        self.state.borrow().snapshot(handle).ok()
    }

    /// Whether `handle` refers to a live entry.
    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.state.borrow().entries.contains_key(&handle)
    }

    /// Number of live top-level geometry payloads.
    pub fn live_handles(&self) -> usize {
        self.state
            .borrow()
            .entries
            .values()
            .filter(|e| e.owner.is_none() && matches!(e.payload, Payload::Geometry(_)))
            .count()
    }

    /// Number of `delete` calls so far, including rejected ones.
    pub fn delete_calls(&self) -> usize {
        self.state.borrow().delete_calls
    }

    /// Number of `delete` calls on unknown or owned-elsewhere handles.
    pub fn invalid_deletes(&self) -> usize {
        self.state.borrow().invalid_deletes
    }

    fn callbacks(&self) -> Option<Rc<dyn UserDataCallbacks>> {
        self.callbacks.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Remove `handle` with everything it owns and tell the managed side
    /// which user data went with it.
    fn remove_and_notify(&self, handle: NativeHandle) {
        let serials = self.state.borrow_mut().remove_tree(handle);
        if let Some(callbacks) = self.callbacks() {
            for serial in serials {
                callbacks.on_delete(serial);
            }
        }
    }

    /// Copy the records of `source` onto `dest`, skipping classes `dest`
    /// already carries. A record whose managed copy cannot be made is
    /// dropped.
    fn copy_records(&self, source: NativeHandle, dest: NativeHandle) -> Result<usize> {
        let pending: Vec<(SerialNumber, NativeHandle)> = {
            let mut state = self.state.borrow_mut();
            let taken: Vec<Uuid> = state
                .attached_records(dest)?
                .into_iter()
                .map(|record| record.class_id)
                .collect();
            let records: Vec<UserDataRecord> = state
                .attached_records(source)?
                .into_iter()
                .filter(|record| !taken.contains(&record.class_id))
                .cloned()
                .collect();
            let pending = records
                .into_iter()
                .map(|record| {
                    let serial = record.serial;
                    (serial, state.alloc(Payload::UserData(record), Some(dest)))
                })
                .collect();
            pending
        };

        // Callbacks run without the state borrowed.
        let callbacks = self.callbacks();
        let mut copied = 0;
        for (serial, native) in pending {
            let new_serial = callbacks
                .as_ref()
                .and_then(|cb| cb.on_duplicate(serial, native));
            let mut state = self.state.borrow_mut();
            match new_serial {
                Some(new_serial) => {
                    if let Some(Entry {
                        payload: Payload::UserData(record),
                        ..
                    }) = state.entries.get_mut(&native)
                    {
                        record.serial = new_serial;
                    }
                    if let Some(host) = state.entries.get_mut(&dest) {
                        host.user_data.push(native);
                    }
                    copied += 1;
                }
                None => {
                    state.entries.remove(&native);
                }
            }
        }
        Ok(copied)
    }

    /// Unlink and free a record attached to `object`.
    fn discard_record(&self, object: NativeHandle, user_data: NativeHandle) {
        self.state.borrow_mut().unlink_record(object, user_data);
        self.remove_and_notify(user_data);
    }
}

impl NativeEngine for InMemoryEngine {
    fn duplicate(&self, handle: NativeHandle) -> Result<NativeHandle> {
        let copy = self.state.borrow_mut().clone_tree(handle, None)?;
        if let Err(err) = self.copy_records(handle, copy) {
            self.remove_and_notify(copy);
            return Err(err);
        }
        debug!(source = %handle, copy = %copy, "native duplicate");
        Ok(copy)
    }

    fn size_of(&self, handle: NativeHandle) -> Result<usize> {
        self.state.borrow().size_of(handle)
    }

    fn delete(&self, handle: NativeHandle) {
        {
            let mut state = self.state.borrow_mut();
            state.delete_calls += 1;
            match state.entries.get(&handle).map(|e| e.owner) {
                None => {
                    state.invalid_deletes += 1;
                    warn!(handle = %handle, "delete of unknown native handle");
                    return;
                }
                Some(Some(owner)) => {
                    state.invalid_deletes += 1;
                    warn!(handle = %handle, owner = %owner, "delete of handle owned by another object");
                    return;
                }
                Some(None) => {}
            }
        }
        self.remove_and_notify(handle);
    }

    fn geometry_type(&self, handle: NativeHandle) -> Result<u32> {
        let state = self.state.borrow();
        Ok(match state.stored(handle)? {
            Stored::PolyCurve(_) => type_code::POLY_CURVE,
            Stored::Simple(GeometryData::Point(_)) => type_code::POINT,
            Stored::Simple(GeometryData::Mesh { .. }) => type_code::MESH,
            Stored::Simple(GeometryData::PolyCurve(_)) => type_code::POLY_CURVE,
            Stored::Simple(GeometryData::Opaque { type_code, .. }) => *type_code,
            Stored::Simple(GeometryData::Curve { kind, .. }) => match kind {
                CurveKind::Line => type_code::LINE_CURVE,
                CurveKind::Polyline => type_code::POLYLINE_CURVE,
                CurveKind::Arc => type_code::ARC_CURVE,
                CurveKind::Nurbs => type_code::NURBS_CURVE,
            },
        })
    }

    fn transform(&self, handle: NativeHandle, xform: &Transform) -> Result<bool> {
        let (changed, serials) = {
            let mut state = self.state.borrow_mut();
            let changed = state.transform_tree(handle, xform)?;
            let attached = state.entry(handle)?.user_data.clone();
            let mut serials = Vec::new();
            for ud in attached {
                if let Some(Entry {
                    payload: Payload::UserData(record),
                    ..
                }) = state.entries.get_mut(&ud)
                {
                    record.xform = xform.multiply(&record.xform);
                    serials.push(record.serial);
                }
            }
            (changed, serials)
        };
        if let Some(callbacks) = self.callbacks() {
            for serial in serials {
                callbacks.on_transform(serial, xform);
            }
        }
        Ok(changed)
    }

    fn component(&self, handle: NativeHandle, index: ComponentIndex) -> Option<NativeHandle> {
        let state = self.state.borrow();
        match (index.kind, state.stored(handle).ok()?) {
            (ComponentKind::PolyCurveSegment, Stored::PolyCurve(segments)) => {
                segments.get(index.index).copied()
            }
            _ => None,
        }
    }

    fn component_count(&self, handle: NativeHandle, kind: ComponentKind) -> Result<usize> {
        let state = self.state.borrow();
        Ok(match (kind, state.stored(handle)?) {
            (ComponentKind::PolyCurveSegment, Stored::PolyCurve(segments)) => segments.len(),
            _ => 0,
        })
    }

    fn polycurve_append(&self, handle: NativeHandle, segment: NativeHandle) -> Result<bool> {
        if segment == handle {
            return Ok(false);
        }
        let mut state = self.state.borrow_mut();
        let segment_entry = state.entry(segment)?;
        if segment_entry.owner.is_some() || !matches!(segment_entry.payload, Payload::Geometry(_)) {
            return Ok(false);
        }
        match state.stored_mut(handle)? {
            Stored::PolyCurve(segments) => segments.push(segment),
            Stored::Simple(_) => return Ok(false),
        }
        if let Some(entry) = state.entries.get_mut(&segment) {
            entry.owner = Some(handle);
        }
        Ok(true)
    }

    fn point_location(&self, handle: NativeHandle) -> Result<Point3> {
        match self.state.borrow().stored(handle)? {
            Stored::Simple(GeometryData::Point(p)) => Ok(*p),
            _ => Err(BindingError::native(format!("handle {handle} is not a point"))),
        }
    }

    fn set_point_location(&self, handle: NativeHandle, location: Point3) -> Result<()> {
        match self.state.borrow_mut().stored_mut(handle)? {
            Stored::Simple(GeometryData::Point(p)) => {
                *p = location;
                Ok(())
            }
            _ => Err(BindingError::native(format!("handle {handle} is not a point"))),
        }
    }

    fn curve_points(&self, handle: NativeHandle) -> Result<Vec<Point3>> {
        match self.state.borrow().stored(handle)? {
            Stored::Simple(GeometryData::Curve { points, .. }) => Ok(points.clone()),
            _ => Err(BindingError::native(format!("handle {handle} is not a simple curve"))),
        }
    }

    fn curve_set_point(&self, handle: NativeHandle, index: usize, point: Point3) -> Result<bool> {
        match self.state.borrow_mut().stored_mut(handle)? {
            Stored::Simple(GeometryData::Curve { points, .. }) => match points.get_mut(index) {
                Some(slot) => {
                    *slot = point;
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Err(BindingError::native(format!("handle {handle} is not a simple curve"))),
        }
    }

    fn mesh_vertex_count(&self, handle: NativeHandle) -> Result<usize> {
        match self.state.borrow().stored(handle)? {
            Stored::Simple(GeometryData::Mesh { vertices, .. }) => Ok(vertices.len()),
            _ => Err(BindingError::native(format!("handle {handle} is not a mesh"))),
        }
    }

    fn mesh_append_vertices(&self, handle: NativeHandle, new_vertices: &[Point3]) -> Result<()> {
        match self.state.borrow_mut().stored_mut(handle)? {
            Stored::Simple(GeometryData::Mesh { vertices, .. }) => {
                vertices.extend_from_slice(new_vertices);
                Ok(())
            }
            _ => Err(BindingError::native(format!("handle {handle} is not a mesh"))),
        }
    }

    fn set_user_data_callbacks(&self, callbacks: Weak<dyn UserDataCallbacks>) {
        *self.callbacks.borrow_mut() = Some(callbacks);
    }

    fn create_user_data(&self, record: UserDataRecord) -> Result<NativeHandle> {
        Ok(self.state.borrow_mut().alloc(Payload::UserData(record), None))
    }

    fn attach_user_data(&self, object: NativeHandle, user_data: NativeHandle) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.stored(object)?;
        let class_id = state.record(user_data)?.class_id;
        let duplicate_class = state
            .entry(object)?
            .user_data
            .iter()
            .any(|ud| *ud != user_data && state.record(*ud).map_or(false, |r| r.class_id == class_id));
        if duplicate_class {
            return Ok(false);
        }
        let previous = state.entry(user_data)?.owner;
        if previous == Some(object) {
            return Ok(true);
        }
        if let Some(previous) = previous {
            if let Some(host) = state.entries.get_mut(&previous) {
                host.user_data.retain(|ud| *ud != user_data);
            }
        }
        if let Some(entry) = state.entries.get_mut(&user_data) {
            entry.owner = Some(object);
        }
        if let Some(host) = state.entries.get_mut(&object) {
            host.user_data.push(user_data);
        }
        Ok(true)
    }

    fn find_user_data(&self, object: NativeHandle, class_id: Uuid) -> Result<Option<SerialNumber>> {
        let state = self.state.borrow();
        Ok(state
            .entry(object)?
            .user_data
            .iter()
            .filter_map(|ud| state.record(*ud).ok())
            .find(|record| record.class_id == class_id)
            .map(|record| record.serial))
    }

    fn user_data_count(&self, object: NativeHandle) -> Result<usize> {
        Ok(self.state.borrow().entry(object)?.user_data.len())
    }

    fn user_data_transform(&self, user_data: NativeHandle) -> Result<Transform> {
        Ok(self.state.borrow().record(user_data)?.xform)
    }

    fn user_data_serial(&self, user_data: NativeHandle) -> Result<SerialNumber> {
        Ok(self.state.borrow().record(user_data)?.serial)
    }

    fn detach_user_data(&self, object: NativeHandle) -> Result<Vec<NativeHandle>> {
        let mut state = self.state.borrow_mut();
        state.stored(object)?;
        let records = state
            .entries
            .get_mut(&object)
            .map(|host| std::mem::take(&mut host.user_data))
            .unwrap_or_default();
        for record in &records {
            if let Some(entry) = state.entries.get_mut(record) {
                entry.owner = None;
            }
        }
        debug!(object = %object, count = records.len(), "user data detached");
        Ok(records)
    }

    fn copy_user_data(&self, source: NativeHandle, dest: NativeHandle) -> Result<usize> {
        {
            let state = self.state.borrow();
            state.stored(source)?;
            state.stored(dest)?;
        }
        if source == dest {
            return Ok(0);
        }
        self.copy_records(source, dest)
    }

    fn write_user_data(&self, object: NativeHandle, archive: &mut MemoryArchive) -> Result<usize> {
        let attached: Vec<(SerialNumber, Uuid)> = {
            let state = self.state.borrow();
            state.stored(object)?;
            state
                .attached_records(object)?
                .into_iter()
                .map(|record| (record.serial, record.class_id))
                .collect()
        };
        let Some(callbacks) = self.callbacks() else {
            return Ok(0);
        };

        let mut written = 0;
        for (serial, class_id) in attached {
            if !callbacks.on_archive(serial) {
                continue;
            }
            let mut body = MemoryArchive::new();
            if !callbacks.on_write(serial, &mut body) {
                continue;
            }
            let header = RecordHeader {
                class_id,
                chunks: body.len(),
            };
            archive
                .writer()
                .write(&header)
                .map_err(|e| BindingError::native(format!("writing user data header: {e:#}")))?;
            archive.append(body);
            written += 1;
        }
        debug!(object = %object, written, "user data written");
        Ok(written)
    }

    fn read_user_data(&self, object: NativeHandle, archive: &mut MemoryArchive) -> Result<usize> {
        self.state.borrow().stored(object)?;
        let callbacks = self
            .callbacks()
            .ok_or_else(|| BindingError::native("no user data callbacks installed"))?;

        let mut attached = 0;
        while archive.reader().remaining() > 0 {
            let header: RecordHeader = archive
                .reader()
                .read()
                .map_err(|e| BindingError::native(format!("reading user data header: {e:#}")))?;
            let mut body = archive.split_next(header.chunks).ok_or_else(|| {
                BindingError::native(format!(
                    "user data of class {} is truncated",
                    header.class_id
                ))
            })?;
            // Unknown classes are reported by the callback and skipped.
            let Some(native) = callbacks.on_create(header.class_id) else {
                continue;
            };
            if !self.attach_user_data(object, native)? {
                self.delete(native);
                continue;
            }
            let serial = self.user_data_serial(native)?;
            if callbacks.on_read(serial, &mut body) {
                attached += 1;
            } else {
                self.discard_record(object, native);
            }
        }
        debug!(object = %object, attached, "user data read");
        Ok(attached)
    }
}
