//! The capability set every archive revision implements.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

use crate::core::extract::SegmentExtraction;
use crate::core::index;
use crate::core::stream::{ArchiveStream, BoxedSink, BoxedStream};
use crate::core::walker::SegmentReader;
use crate::error::ExtractError;

/// Where the index lives and how it is obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetKey {
    pub offset: u64,
    /// XOR key; present only for obfuscated indexes.
    pub key: Option<u64>,
}

impl OffsetKey {
    pub fn new(offset: u64, key: Option<u64>) -> Self {
        Self { offset, key }
    }

    pub fn plain(offset: u64) -> Self {
        Self { offset, key: None }
    }

    pub fn is_obfuscated(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "offset 0x{:x}, key 0x{:x}", self.offset, key),
            None => write!(f, "offset 0x{:x}, no key", self.offset),
        }
    }
}

/// One byte range of the archive, optionally preceded by literal bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub length: u64,
    pub prefix: Vec<u8>,
}

impl Segment {
    pub fn new(offset: u64, length: u64, prefix: Vec<u8>) -> Self {
        Self { offset, length, prefix }
    }

    /// XOR offset and length with `key`. Applying the same key twice
    /// restores the original values.
    pub fn xor(&self, key: u64) -> Self {
        Self {
            offset: self.offset ^ key,
            length: self.length ^ key,
            prefix: self.prefix.clone(),
        }
    }
}

/// Normalised path to segment list. Only the first segment of an entry is
/// extracted.
pub type Index = BTreeMap<String, Vec<Segment>>;

/// Per-entry failure handler. Returning `Ok` skips the entry and carries on,
/// returning `Err` aborts the extraction with that error.
pub type OnError<'a> = dyn FnMut(&str, anyhow::Error) -> Result<(), ExtractError> + 'a;

/// An entry ready to be streamed out of the archive.
pub struct ExtractedEntry<'s> {
    pub path: String,
    pub reader: SegmentReader<'s>,
}

/// Lazy sequence of extracted entries.
///
/// Each entry borrows the archive cursor, so it has to be dropped before the
/// next one is requested.
pub trait EntryStream {
    /// Number of entries in the index being extracted.
    fn total(&self) -> usize;

    fn next_entry(&mut self) -> Option<Result<ExtractedEntry<'_>, ExtractError>>;
}

/// An archive revision.
///
/// `name` doubles as the identity of the implementation: a registry holds at
/// most one format per name. Everything except detection and locating the
/// index has a default that suits the RPA family.
pub trait ArchiveFormat: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `archive` is of this format. Implementations leave the read
    /// position where they found it.
    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool>;

    /// Find the index offset and obfuscation key.
    fn locate(&self, archive: &mut dyn ArchiveStream) -> Result<OffsetKey>;

    fn decode_index(&self, archive: &mut dyn ArchiveStream, offset_key: OffsetKey) -> Result<Index> {
        index::decode_index(archive, offset_key)
    }

    fn extract<'a>(
        &self,
        index: Index,
        archive: &'a mut dyn ArchiveStream,
        on_error: &'a mut OnError<'a>,
    ) -> Result<Box<dyn EntryStream + 'a>> {
        Ok(Box::new(SegmentExtraction::new(index, archive, on_error)))
    }

    fn preprocess(&self, source: BoxedStream) -> Result<BoxedStream> {
        Ok(source)
    }

    fn postprocess(&self, sink: BoxedSink) -> Result<BoxedSink> {
        Ok(sink)
    }
}

impl fmt::Debug for dyn ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArchiveFormat").field(&self.name()).finish()
    }
}
