//! Exact-length reader over one archive segment.
//!
//! A segment's bytes are an optional literal prefix (stored in the index,
//! not in the archive body) followed by a range of the archive itself. The
//! reader drains its sources in order and hands out exactly `length` bytes,
//! failing with `UnexpectedEof` when the sources run dry first.
//!
//! The reader shares the archive's cursor. Only one reader may be live per
//! archive at a time, which the `&mut` borrow it holds enforces.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use log::trace;

/// Largest step the buffer of a single read grows by.
const GROW_STEP: u64 = 64 * 1024;

pub struct SegmentReader<'a> {
    sources: VecDeque<Box<dyn Read + 'a>>,
    remaining: u64,
}

impl<'a> SegmentReader<'a> {
    /// Position `archive` at `offset` and build a reader for `length` bytes.
    pub fn new<R: Read + Seek + ?Sized>(
        archive: &'a mut R,
        offset: u64,
        length: u64,
        prefix: &[u8],
    ) -> io::Result<Self> {
        archive.seek(SeekFrom::Start(offset))?;
        Ok(Self::at_current(archive, length, prefix))
    }

    /// Build a reader starting at the archive's current position.
    pub fn at_current<R: Read + ?Sized>(archive: &'a mut R, length: u64, prefix: &[u8]) -> Self {
        let mut sources: VecDeque<Box<dyn Read + 'a>> = VecDeque::with_capacity(2);
        if !prefix.is_empty() {
            sources.push_back(Box::new(Cursor::new(prefix.to_vec())));
        }
        sources.push_back(Box::new(archive));

        Self {
            sources,
            remaining: length,
        }
    }

    /// Bytes still owed by this reader.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read up to `len` bytes. A non-positive `len`, or one larger than
    /// what remains, reads everything that remains.
    pub fn read_up_to(&mut self, len: i64) -> io::Result<Vec<u8>> {
        let wanted = match u64::try_from(len) {
            Ok(len) if len > 0 && len <= self.remaining => len,
            _ => self.remaining,
        };

        let mut out = Vec::new();
        let mut left = wanted;
        while left > 0 {
            let step = left.min(GROW_STEP) as usize;
            let start = out.len();
            out.resize(start + step, 0);
            let filled = self.fill(&mut out[start..])?;
            out.truncate(start + filled);
            left -= filled as u64;
            if filled < step {
                break;
            }
        }
        Ok(out)
    }

    /// Iterate over the remaining bytes in reads of `chunk_size` until a
    /// read comes back empty.
    pub fn chunks(self, chunk_size: i64) -> Chunks<'a> {
        Chunks {
            reader: self,
            chunk_size,
            done: false,
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;

        while filled < buf.len() && self.remaining > 0 {
            let Some(source) = self.sources.front_mut() else {
                break;
            };

            let budget = ((buf.len() - filled) as u64).min(self.remaining) as usize;
            match source.read(&mut buf[filled..filled + budget]) {
                Ok(0) => {
                    self.sources.pop_front();
                }
                Ok(n) => {
                    filled += n;
                    self.remaining -= n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.remaining > 0 && filled < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Unexpected end of archive ({} bytes missing)", self.remaining),
            ));
        }

        trace!("segment read {} bytes, {} remaining", filled, self.remaining);
        Ok(filled)
    }
}

impl Read for SegmentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.remaining == 0 {
            return Ok(0);
        }
        let cap = (buf.len() as u64).min(self.remaining) as usize;
        self.fill(&mut buf[..cap])
    }
}

/// Repeated reads over a [`SegmentReader`]; ends at the first empty read
/// or after the first error.
pub struct Chunks<'a> {
    reader: SegmentReader<'a>,
    chunk_size: i64,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_up_to(self.chunk_size) {
            Ok(chunk) if chunk.is_empty() => {
                self.done = true;
                None
            }
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
