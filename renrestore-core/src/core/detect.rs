//! Detection and index-location strategies shared by the built-in formats.

use std::io::{self, Read, SeekFrom};

use anyhow::{anyhow, Context, Result};

use crate::core::format::OffsetKey;
use crate::core::stream::ArchiveStream;

/// Longest header line we look at when parsing offsets and keys.
const MAX_HEADER_LINE: usize = 256;

/// Compare the archive's extension with `expected`, ignoring case and any
/// leading dot on either side.
pub fn extension_matches(archive: &dyn ArchiveStream, expected: &str) -> bool {
    let expected = expected.trim_start_matches('.');
    archive
        .name()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Whether the archive starts with `magic`. The read position is restored.
pub fn header_matches(archive: &mut dyn ArchiveStream, magic: &[u8]) -> io::Result<bool> {
    let head = peek(archive, magic.len())?;
    Ok(head == magic)
}

/// Whether the archive starts with any of `magics`. The read position is
/// restored.
pub fn any_header_matches(archive: &mut dyn ArchiveStream, magics: &[&[u8]]) -> io::Result<bool> {
    let longest = magics.iter().map(|m| m.len()).max().unwrap_or(0);
    let head = peek(archive, longest)?;
    Ok(magics.iter().any(|magic| head.starts_with(magic)))
}

/// Read the first line of the archive, without its terminator. The read
/// position is restored.
pub fn read_header_line(archive: &mut dyn ArchiveStream) -> io::Result<String> {
    let head = peek(archive, MAX_HEADER_LINE)?;
    let line = match head.iter().position(|&b| b == b'\n') {
        Some(end) => &head[..end],
        None => &head[..],
    };
    Ok(String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
}

/// Offset in the second field of the header line, no key.
pub fn offset_from_header_line(archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
    let line = read_header_line(archive).context("Failed to read archive header")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let offset = parse_hex_field(&fields, 1, "index offset")?;
    Ok(OffsetKey::plain(offset))
}

/// Offset and key in the second and third fields of the header line.
pub fn offset_and_key_from_header_line(archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
    let line = read_header_line(archive).context("Failed to read archive header")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let offset = parse_hex_field(&fields, 1, "index offset")?;
    let key = parse_hex_field(&fields, 2, "obfuscation key")?;
    Ok(OffsetKey::new(offset, Some(key)))
}

fn parse_hex_field(fields: &[&str], position: usize, what: &str) -> Result<u64> {
    let field = fields
        .get(position)
        .ok_or_else(|| anyhow!("Archive header has no {} field", what))?;
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid {} '{}' in archive header", what, field))
}

/// Read up to `len` bytes from the start of the archive and put the cursor
/// back where it was.
fn peek(archive: &mut dyn ArchiveStream, len: usize) -> io::Result<Vec<u8>> {
    let saved = archive.stream_position()?;
    archive.seek(SeekFrom::Start(0))?;

    let mut head = Vec::with_capacity(len);
    let read = (&mut *archive).take(len as u64).read_to_end(&mut head);

    archive.seek(SeekFrom::Start(saved))?;
    read?;
    Ok(head)
}
