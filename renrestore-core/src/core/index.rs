//! Index decoding.
//!
//! The index is a zlib-compressed pickle of a mapping from path to a list of
//! `(offset, length)` or `(offset, length, prefix)` tuples. Obfuscated
//! archives XOR every offset and length with a key taken from the header.

use std::io::{Read, Seek, SeekFrom};
use std::path::MAIN_SEPARATOR_STR;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::ZlibDecoder;
use log::debug;
use serde_pickle::{DeOptions, HashableValue, Value};

use crate::core::format::{Index, OffsetKey, Segment};

/// Decode the index stored at `offset_key.offset` up to the end of `archive`.
pub fn decode_index<R: Read + Seek + ?Sized>(archive: &mut R, offset_key: OffsetKey) -> Result<Index> {
    archive
        .seek(SeekFrom::Start(offset_key.offset))
        .with_context(|| format!("Failed to seek to index at 0x{:x}", offset_key.offset))?;

    let mut compressed = Vec::new();
    archive
        .read_to_end(&mut compressed)
        .context("Failed to read index")?;

    let raw = inflate(&compressed)?;
    let value = serde_pickle::value_from_slice(&raw, DeOptions::new()).context("Index is not a valid pickle")?;

    let mut index = Index::new();
    for (raw_path, segments) in parse_table(value)? {
        let path = normalize_path(&raw_path);
        // Entries without segments stay in; extraction reports them per entry.
        let segments = match offset_key.key {
            Some(key) => segments.into_iter().map(|segment| segment.xor(key)).collect(),
            None => segments,
        };
        index.insert(path, segments);
    }

    debug!("Decoded index with {} entries", index.len());
    Ok(index)
}

/// Decode a path as UTF-8 (lossily) and switch to the host separator.
pub fn normalize_path(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace('/', MAIN_SEPARATOR_STR)
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(compressed.len() * 4);
    ZlibDecoder::new(compressed)
        .read_to_end(&mut out)
        .context("Index is not valid zlib data")?;
    Ok(out)
}

fn parse_table(value: Value) -> Result<Vec<(Vec<u8>, Vec<Segment>)>> {
    let table = match value {
        Value::Dict(table) => table,
        other => bail!("Index is not a mapping (found {})", value_kind(&other)),
    };

    let mut entries = Vec::with_capacity(table.len());
    for (key, entry) in table {
        let raw_path = match key {
            HashableValue::Bytes(bytes) => bytes,
            HashableValue::String(text) => text.into_bytes(),
            _ => bail!("Index key is not a path"),
        };

        let parts = match entry {
            Value::List(parts) | Value::Tuple(parts) => parts,
            other => bail!(
                "Index entry {} is not a list (found {})",
                String::from_utf8_lossy(&raw_path),
                value_kind(&other)
            ),
        };

        let segments = parts
            .into_iter()
            .map(parse_segment)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Bad index entry {}", String::from_utf8_lossy(&raw_path)))?;

        entries.push((raw_path, segments));
    }
    Ok(entries)
}

fn parse_segment(value: Value) -> Result<Segment> {
    let fields = match value {
        Value::Tuple(fields) | Value::List(fields) => fields,
        other => bail!("Segment is not a tuple (found {})", value_kind(&other)),
    };

    let mut fields = fields.into_iter();
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(offset), Some(length), prefix, None) => Ok(Segment {
            offset: as_u64(offset).context("Bad segment offset")?,
            length: as_u64(length).context("Bad segment length")?,
            prefix: match prefix {
                Some(prefix) => as_bytes(prefix)?,
                None => Vec::new(),
            },
        }),
        _ => bail!("Segment must have two or three fields"),
    }
}

fn as_u64(value: Value) -> Result<u64> {
    match value {
        Value::I64(n) => u64::try_from(n).map_err(|_| anyhow!("negative value {}", n)),
        Value::Int(n) => n
            .to_string()
            .parse::<u64>()
            .map_err(|_| anyhow!("value {} does not fit in 64 bits", n)),
        other => bail!("expected an integer, found {}", value_kind(&other)),
    }
}

fn as_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::None => Ok(Vec::new()),
        // Text prefixes come from latin-1 `str` objects.
        Value::String(text) => {
            if text.chars().all(|c| (c as u32) <= 0xFF) {
                Ok(text.chars().map(|c| c as u32 as u8).collect())
            } else {
                Ok(text.into_bytes())
            }
        }
        other => bail!("Segment prefix is not a byte string (found {})", value_kind(&other)),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::None => "None",
        Value::Bool(_) => "bool",
        Value::I64(_) | Value::Int(_) => "int",
        Value::F64(_) => "float",
        Value::Bytes(_) => "bytes",
        Value::String(_) => "str",
        Value::List(_) => "list",
        Value::Tuple(_) => "tuple",
        Value::Dict(_) => "dict",
        _ => "set",
    }
}
