//! Error taxonomy callers branch on.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Format hook that raised a [`ExtractError::Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Preprocess,
    Locate,
    DecodeIndex,
    Extract,
    Postprocess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detect => "detect",
            Stage::Preprocess => "preprocess",
            Stage::Locate => "locate",
            Stage::DecodeIndex => "index decoding",
            Stage::Extract => "extract",
            Stage::Postprocess => "postprocess",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// No format recognised the archive.
    #[error("Unknown archive format detected: {candidates:?}")]
    UnknownFormat { candidates: Vec<String> },

    /// More than one format recognised the archive.
    #[error("Ambiguous archive format detected: {candidates:?}")]
    AmbiguousFormat { candidates: Vec<String> },

    /// A format hook failed; the archive or the format itself is unusable.
    #[error("Error in archive format {format} during {stage}: {source}")]
    Format {
        format: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// A single entry could not be materialised.
    #[error("Error extracting file {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("The output path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExtractError {
    pub(crate) fn format(format: &str, stage: Stage, source: anyhow::Error) -> Self {
        ExtractError::Format {
            format: format.to_string(),
            stage,
            source,
        }
    }

    /// Whether this error always aborts a run. Only per-entry extraction
    /// failures can be absorbed by continue-on-error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExtractError::Extraction { .. })
    }

    /// Names of the formats involved in a detection failure.
    pub fn candidates(&self) -> &[String] {
        match self {
            ExtractError::UnknownFormat { candidates } | ExtractError::AmbiguousFormat { candidates } => candidates,
            _ => &[],
        }
    }
}
