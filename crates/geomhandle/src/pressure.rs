//! Memory pressure accounting for owned native payloads
//!
//! Every owned wrapper carries a [`PressureRecord`] holding the native size it
//! last reported. The [`PressureAccountant`] turns size changes into signed
//! deltas and forwards them to a [`PressureSink`], the host's collector hint.

use std::cell::Cell;

use tracing::{error, trace};

use crate::error::Result;
use crate::native::{NativeEngine, NativeHandle};

/// Host hook receiving pressure deltas.
pub trait PressureSink {
    /// Foreign memory grew by `bytes`.
    fn add(&self, bytes: u64);

    /// Foreign memory shrank by `bytes`.
    fn remove(&self, bytes: u64);
}

/// Default sink: logs deltas at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl PressureSink for TracingSink {
    fn add(&self, bytes: u64) {
        trace!(bytes, "memory pressure added");
    }

    fn remove(&self, bytes: u64) {
        trace!(bytes, "memory pressure removed");
    }
}

/// Last reported native size for one owned wrapper.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PressureRecord {
    reported: u64,
    released: bool,
}

impl PressureRecord {
    /// Bytes currently attributed to this wrapper.
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Whether disposal already released this record.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Tracks pressure added and removed across all owned wrappers of a context.
pub struct PressureAccountant {
    enabled: bool,
    added: Cell<u64>,
    removed: Cell<u64>,
    sink: Box<dyn PressureSink>,
}

impl std::fmt::Debug for PressureAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureAccountant")
            .field("enabled", &self.enabled)
            .field("added", &self.added.get())
            .field("removed", &self.removed.get())
            .finish()
    }
}

impl PressureAccountant {
    /// Create an accountant forwarding to `sink`.
    pub fn new(enabled: bool, sink: Box<dyn PressureSink>) -> Self {
        Self {
            enabled,
            added: Cell::new(0),
            removed: Cell::new(0),
            sink,
        }
    }

    /// Whether deltas are being recorded at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Measure `handle` and bring `record` up to date.
    ///
    /// Growth is added, shrinkage is removed, equal sizes do nothing.
    pub fn report(
        &self,
        record: &mut PressureRecord,
        engine: &dyn NativeEngine,
        handle: NativeHandle,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let current = engine.size_of(handle)? as u64;
        if current > record.reported {
            self.add(current - record.reported);
        } else if current < record.reported {
            self.remove(record.reported - current);
        }
        record.reported = current;
        record.released = false;
        Ok(())
    }

    /// Remove everything `record` still holds. Safe to call more than once.
    pub fn release(&self, record: &mut PressureRecord) {
        if record.released {
            return;
        }
        if record.reported > 0 {
            self.remove(record.reported);
        }
        record.reported = 0;
        record.released = true;
    }

    /// Total bytes ever added.
    pub fn added(&self) -> u64 {
        self.added.get()
    }

    /// Total bytes ever removed.
    pub fn removed(&self) -> u64 {
        self.removed.get()
    }

    /// Bytes currently outstanding (`added - removed`).
    pub fn outstanding(&self) -> u64 {
        self.added.get().saturating_sub(self.removed.get())
    }

    fn add(&self, bytes: u64) {
        self.added.set(self.added.get() + bytes);
        self.sink.add(bytes);
    }

    fn remove(&self, bytes: u64) {
        let removed = self.removed.get() + bytes;
        if removed > self.added.get() {
            // Internal invariant break, never a user-facing error.
            error!(
                added = self.added.get(),
                removed, "memory pressure removed more than was added"
            );
            debug_assert!(false, "negative memory pressure");
        }
        self.removed.set(removed);
        self.sink.remove(bytes);
    }
}
