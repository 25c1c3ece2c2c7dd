//! In-memory archive handed to user-data read and write hooks
//!
//! Chunks are stored as JSON values in write order and read back in the same
//! order. The layout is private to this crate.

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Sequence of typed chunks.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryArchive {
    chunks: Vec<serde_json::Value>,
    cursor: usize,
}

impl MemoryArchive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks written.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Move the read cursor back to the first chunk.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Append every chunk of `other`.
    pub(crate) fn append(&mut self, other: MemoryArchive) {
        self.chunks.extend(other.chunks);
    }

    /// Take the next `count` chunks into their own archive and advance the
    /// cursor past them. `None` if fewer remain.
    pub(crate) fn split_next(&mut self, count: usize) -> Option<MemoryArchive> {
        let end = self.cursor.checked_add(count)?;
        let chunks = self.chunks.get(self.cursor..end)?.to_vec();
        self.cursor = end;
        Some(MemoryArchive { chunks, cursor: 0 })
    }

    /// Writer appending to this archive.
    pub fn writer(&mut self) -> ArchiveWriter<'_> {
        ArchiveWriter { archive: self }
    }

    /// Reader starting at the current cursor.
    pub fn reader(&mut self) -> ArchiveReader<'_> {
        ArchiveReader { archive: self }
    }
}

/// Write side passed to [`UserData::write`](super::UserData::write).
#[derive(Debug)]
pub struct ArchiveWriter<'a> {
    archive: &'a mut MemoryArchive,
}

impl ArchiveWriter<'_> {
    /// Append one chunk.
    pub fn write<T: Serialize>(&mut self, value: &T) -> anyhow::Result<()> {
        let chunk = serde_json::to_value(value).context("serializing archive chunk")?;
        self.archive.chunks.push(chunk);
        Ok(())
    }
}

/// Read side passed to [`UserData::read`](super::UserData::read).
#[derive(Debug)]
pub struct ArchiveReader<'a> {
    archive: &'a mut MemoryArchive,
}

impl ArchiveReader<'_> {
    /// Read the next chunk.
    pub fn read<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        let cursor = self.archive.cursor;
        let chunk = self
            .archive
            .chunks
            .get(cursor)
            .cloned()
            .ok_or_else(|| anyhow!("archive exhausted at chunk {cursor}"))?;
        self.archive.cursor += 1;
        serde_json::from_value(chunk).with_context(|| format!("decoding archive chunk {cursor}"))
    }

    /// Chunks left to read.
    pub fn remaining(&self) -> usize {
        self.archive.chunks.len().saturating_sub(self.archive.cursor)
    }
}
