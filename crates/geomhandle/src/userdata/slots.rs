//! Generation-checked slot storage behind user-data serial numbers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier a native callback uses to find its managed user data.
///
/// A slot index plus the generation the slot had when the entry was
/// inserted. Removing an entry bumps the slot generation, so an old serial
/// number never resolves again even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber {
    index: u32,
    generation: u32,
}

impl SerialNumber {
    /// Slot index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at insertion time.
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into one integer for the native side.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`to_bits`](Self::to_bits).
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map with a free list and per-slot generations.
#[derive(Debug)]
pub(crate) struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }
}

impl<T> SlotMap<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, value: T) -> SerialNumber {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SerialNumber {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SerialNumber {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, serial: SerialNumber) -> Option<&T> {
        self.slots
            .get(serial.index as usize)
            .filter(|slot| slot.generation == serial.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, serial: SerialNumber) -> Option<&mut T> {
        self.slots
            .get_mut(serial.index as usize)
            .filter(|slot| slot.generation == serial.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, serial: SerialNumber) -> bool {
        self.get(serial).is_some()
    }

    pub(crate) fn remove(&mut self, serial: SerialNumber) -> Option<T> {
        let slot = self.slots.get_mut(serial.index as usize)?;
        if slot.generation != serial.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;
        // A slot whose generation would wrap is retired for good.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free_list.push(serial.index);
        }
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
