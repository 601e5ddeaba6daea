//! Default per-entry extraction shared by the RPA revisions.

use std::collections::btree_map;
use std::io::SeekFrom;

use anyhow::{anyhow, Context};
use log::{debug, info};

use crate::core::format::{EntryStream, ExtractedEntry, Index, OnError, Segment};
use crate::core::stream::ArchiveStream;
use crate::core::walker::SegmentReader;
use crate::error::ExtractError;

/// Walks an index in order and hands out a [`SegmentReader`] over the first
/// segment of each entry.
///
/// Entries that cannot be positioned are passed to the error handler. If the
/// handler returns an error the stream yields it once and then ends.
pub struct SegmentExtraction<'a> {
    entries: btree_map::IntoIter<String, Vec<Segment>>,
    archive: &'a mut dyn ArchiveStream,
    on_error: &'a mut OnError<'a>,
    total: usize,
    visited: usize,
    aborted: bool,
}

impl<'a> SegmentExtraction<'a> {
    pub fn new(index: Index, archive: &'a mut dyn ArchiveStream, on_error: &'a mut OnError<'a>) -> Self {
        let total = index.len();
        Self {
            entries: index.into_iter(),
            archive,
            on_error,
            total,
            visited: 0,
            aborted: false,
        }
    }

    /// Share of the index handed out or skipped so far.
    fn progress(&self) -> f64 {
        percent(self.visited, self.total)
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

impl EntryStream for SegmentExtraction<'_> {
    fn total(&self) -> usize {
        self.total
    }

    fn next_entry(&mut self) -> Option<Result<ExtractedEntry<'_>, ExtractError>> {
        loop {
            if self.aborted {
                return None;
            }
            let (path, segments) = self.entries.next()?;
            // Logged as the share done before this entry.
            let progress = self.progress();
            self.visited += 1;

            let mut segments = segments.into_iter();
            let Some(segment) = segments.next() else {
                if let Err(e) = (self.on_error)(&path, anyhow!("Entry has no segments")) {
                    self.aborted = true;
                    return Some(Err(e));
                }
                continue;
            };
            if segments.len() > 0 {
                debug!("{} has {} extra segments, only the first is read", path, segments.len());
            }

            let seek = self
                .archive
                .seek(SeekFrom::Start(segment.offset))
                .with_context(|| format!("Failed to seek to 0x{:x}", segment.offset));
            if let Err(e) = seek {
                if let Err(e) = (self.on_error)(&path, e) {
                    self.aborted = true;
                    return Some(Err(e));
                }
                continue;
            }

            info!("[{:.1}%] Extracted: {}", progress, path);
            let reader = SegmentReader::at_current(&mut *self.archive, segment.length, &segment.prefix);
            return Some(Ok(ExtractedEntry { path, reader }));
        }
    }
}
