//! Builders for index blobs used by unit tests.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_pickle::{HashableValue, SerOptions, Value};

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn raw_segment(offset: u64, length: u64, prefix: Option<&[u8]>) -> Value {
    let mut fields = vec![Value::I64(offset as i64), Value::I64(length as i64)];
    if let Some(prefix) = prefix {
        fields.push(Value::Bytes(prefix.to_vec()));
    }
    Value::Tuple(fields)
}

/// Pickle and compress a path to segment-list table.
pub fn pickle_index(entries: &[(&str, Vec<Value>)]) -> Vec<u8> {
    let table: BTreeMap<HashableValue, Value> = entries
        .iter()
        .map(|(path, segments)| (HashableValue::Bytes(path.as_bytes().to_vec()), Value::List(segments.clone())))
        .collect();
    let pickled = serde_pickle::value_to_vec(&Value::Dict(table), SerOptions::new()).unwrap();
    zlib(&pickled)
}
