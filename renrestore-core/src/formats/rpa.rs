//! Ren'Py archive revisions.
//!
//! | Revision      | Detected by        | Index location            |
//! |---------------|--------------------|---------------------------|
//! | RPA-1.0       | `.rpi` extension   | offset 0, no key          |
//! | RPA-2.0       | `RPA-2.0` header   | hex offset in header      |
//! | RPA-3.0       | `RPA-3.0` header   | hex offset and key        |
//! | RPA-3.2 / 4.0 | either header      | same as RPA-3.0           |

use anyhow::Result;

use crate::core::detect;
use crate::core::format::{ArchiveFormat, OffsetKey};
use crate::core::stream::ArchiveStream;

pub const RPA1_EXTENSION: &str = "rpi";
pub const RPA2_MAGIC: &[u8] = b"RPA-2.0";
pub const RPA3_MAGIC: &[u8] = b"RPA-3.0";
pub const RPA32_MAGIC: &[u8] = b"RPA-3.2";
pub const RPA40_MAGIC: &[u8] = b"RPA-4.0";

/// Legacy split archive: the `.rpi` file holds only the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rpa1;

impl ArchiveFormat for Rpa1 {
    fn name(&self) -> &str {
        "RPA-1.0"
    }

    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool> {
        Ok(detect::extension_matches(archive, RPA1_EXTENSION))
    }

    fn locate(&self, _archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        Ok(OffsetKey::plain(0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rpa2;

impl ArchiveFormat for Rpa2 {
    fn name(&self) -> &str {
        "RPA-2.0"
    }

    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool> {
        Ok(detect::header_matches(archive, RPA2_MAGIC)?)
    }

    fn locate(&self, archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        detect::offset_from_header_line(archive)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rpa3;

impl ArchiveFormat for Rpa3 {
    fn name(&self) -> &str {
        "RPA-3.0"
    }

    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool> {
        Ok(detect::header_matches(archive, RPA3_MAGIC)?)
    }

    fn locate(&self, archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        detect::offset_and_key_from_header_line(archive)
    }
}

/// Less common headers that share the RPA-3.0 layout. Reported under one
/// name whichever header matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpaVariant;

impl ArchiveFormat for RpaVariant {
    fn name(&self) -> &str {
        "RPA-3.2/4.0"
    }

    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool> {
        Ok(detect::any_header_matches(archive, &[RPA32_MAGIC, RPA40_MAGIC])?)
    }

    fn locate(&self, archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        Rpa3.locate(archive)
    }
}
