//! Stream types exchanged between the extractor and format hooks.
//!
//! Both the archive stream and the output sink carry a closed flag. A
//! pre/postprocessing hook that closes a stream vetoes any further work on
//! it: wrapped hooks pass closed streams through untouched and the extractor
//! skips closed sinks instead of writing them to disk.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access byte source an archive is read from.
pub trait ArchiveStream: Read + Seek {
    /// Name of the underlying archive, used by extension based detection.
    fn name(&self) -> &Path;

    fn is_closed(&self) -> bool;

    /// Close the stream. Reads and seeks fail afterwards.
    fn close(&mut self);
}

pub type BoxedStream = Box<dyn ArchiveStream>;

/// In-memory destination for one extracted file.
pub trait OutputSink: Write {
    /// Path the buffered bytes are flushed to.
    fn target(&self) -> &Path;

    fn is_closed(&self) -> bool;

    /// Close the sink, cancelling the write of this entry.
    fn close(&mut self);

    /// Take the buffered bytes, leaving the sink empty.
    fn take_contents(&mut self) -> Vec<u8>;
}

pub type BoxedSink = Box<dyn OutputSink>;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "I/O operation on closed stream")
}

/// Buffered archive file on disk.
pub struct FileStream {
    name: PathBuf,
    reader: Option<BufReader<File>>,
}

impl FileStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            name: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
        })
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(closed_error()),
        }
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.reader.as_mut() {
            Some(reader) => reader.seek(pos),
            None => Err(closed_error()),
        }
    }
}

impl ArchiveStream for FileStream {
    fn name(&self) -> &Path {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Archive held entirely in memory.
///
/// Preprocessors that rewrite an archive (decryption, repacking) usually
/// return one of these.
pub struct MemoryStream {
    name: PathBuf,
    data: Cursor<Vec<u8>>,
    closed: bool,
}

impl MemoryStream {
    pub fn new(name: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Cursor::new(data),
            closed: false,
        }
    }

    /// Read `source` to its end and keep the bytes under the source's name.
    pub fn buffer(source: &mut dyn ArchiveStream) -> io::Result<Self> {
        let mut data = Vec::new();
        source.seek(SeekFrom::Start(0))?;
        source.read_to_end(&mut data)?;
        Ok(Self::new(source.name(), data))
    }

    pub fn get_ref(&self) -> &[u8] {
        self.data.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.data.read(buf)
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.closed {
            return Err(closed_error());
        }
        self.data.seek(pos)
    }
}

impl ArchiveStream for MemoryStream {
    fn name(&self) -> &Path {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Default sink: buffers an entry in memory until it is flushed to `target`.
pub struct MemorySink {
    target: PathBuf,
    buffer: Vec<u8>,
    closed: bool,
}

impl MemorySink {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            buffer: Vec::new(),
            closed: false,
        }
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for MemorySink {
    fn target(&self) -> &Path {
        &self.target
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn take_contents(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
