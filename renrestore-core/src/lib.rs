//! Ren'Py archive extraction.
//!
//! Formats are plain [`ArchiveFormat`] values collected in a [`Registry`].
//! A registry can be layered with extra pre/postprocessing through
//! [`pipeline`] before an [`Extractor`] detects and unpacks an archive
//! with it.

pub mod core;
pub mod error;
pub mod formats;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::core::format::{ArchiveFormat, Index, OffsetKey, Segment};
pub use crate::core::stream::{ArchiveStream, MemorySink, MemoryStream, OutputSink};
pub use crate::error::{ExtractError, Stage};
pub use crate::orchestrator::{ExtractOverrides, ExtractionReport, Extractor, ExtractorSettings};
pub use crate::pipeline::PipelineSpec;
pub use crate::registry::Registry;
