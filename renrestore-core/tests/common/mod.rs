//! Synthesised RPA archives for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_pickle::{HashableValue, SerOptions, Value};

pub enum Revision {
    Rpa2,
    Rpa3 { key: u64 },
    /// RPA-3.0 layout under another magic.
    Variant { magic: &'static str, key: u64 },
}

impl Revision {
    fn header(&self, index_offset: u64) -> String {
        match self {
            Revision::Rpa2 => format!("RPA-2.0 {:016x}\n", index_offset),
            Revision::Rpa3 { key } => format!("RPA-3.0 {:016x} {:08x}\n", index_offset, key),
            Revision::Variant { magic, key } => format!("{} {:016x} {:08x}\n", magic, index_offset, key),
        }
    }

    fn key(&self) -> Option<u64> {
        match self {
            Revision::Rpa2 => None,
            Revision::Rpa3 { key } | Revision::Variant { key, .. } => Some(*key),
        }
    }
}

pub struct TestFile {
    pub path: String,
    pub data: Vec<u8>,
    pub prefix: Vec<u8>,
    /// Added to the declared length so the entry runs past the archive end.
    pub overrun: u64,
}

impl TestFile {
    pub fn new(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            data: data.to_vec(),
            prefix: Vec::new(),
            overrun: 0,
        }
    }

    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn truncated(mut self) -> Self {
        self.overrun = 1 << 20;
        self
    }

    /// Bytes the extracted file should hold.
    pub fn expected(&self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&self.data);
        out
    }
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Pickle and compress `(path, [(offset, length, prefix)])` entries.
pub fn index_blob(entries: &[(String, u64, u64, Vec<u8>)]) -> Vec<u8> {
    let table: BTreeMap<HashableValue, Value> = entries
        .iter()
        .map(|(path, offset, length, prefix)| {
            let mut fields = vec![Value::I64(*offset as i64), Value::I64(*length as i64)];
            if !prefix.is_empty() {
                fields.push(Value::Bytes(prefix.clone()));
            }
            (
                HashableValue::Bytes(path.as_bytes().to_vec()),
                Value::List(vec![Value::Tuple(fields)]),
            )
        })
        .collect();
    zlib(&serde_pickle::value_to_vec(&Value::Dict(table), SerOptions::new()).unwrap())
}

/// Pickle and compress `(path, [(offset, length)])` entries with any number
/// of segments per path, none included.
pub fn segment_table(entries: &[(&str, Vec<(u64, u64)>)]) -> Vec<u8> {
    let table: BTreeMap<HashableValue, Value> = entries
        .iter()
        .map(|(path, segments)| {
            let segments = segments
                .iter()
                .map(|(offset, length)| Value::Tuple(vec![Value::I64(*offset as i64), Value::I64(*length as i64)]))
                .collect();
            (HashableValue::Bytes(path.as_bytes().to_vec()), Value::List(segments))
        })
        .collect();
    zlib(&serde_pickle::value_to_vec(&Value::Dict(table), SerOptions::new()).unwrap())
}

/// Header, file bodies, then the index.
pub fn build_archive(revision: &Revision, files: &[TestFile]) -> Vec<u8> {
    let header_len = revision.header(0).len();
    let mut body = Vec::new();
    let mut entries = Vec::new();

    for file in files {
        let offset = (header_len + body.len()) as u64;
        let length = (file.prefix.len() + file.data.len()) as u64 + file.overrun;
        body.extend_from_slice(&file.data);

        let (offset, length) = match revision.key() {
            Some(key) => (offset ^ key, length ^ key),
            None => (offset, length),
        };
        entries.push((file.path.clone(), offset, length, file.prefix.clone()));
    }

    let index_offset = (header_len + body.len()) as u64;
    let mut archive = revision.header(index_offset).into_bytes();
    archive.extend_from_slice(&body);
    archive.extend_from_slice(&index_blob(&entries));
    archive
}
