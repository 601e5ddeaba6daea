//! Archive extraction driver.
//!
//! An extraction resolves the archive's format, runs the format's
//! preprocessing, locates and decodes the index, then streams every entry
//! through the format's postprocessing into an in-memory sink before it is
//! written under the output directory.

use std::cell::RefCell;
use std::fs;
use std::io::{SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::{debug, info, warn};

use crate::core::format::{ArchiveFormat, ExtractedEntry, Index, OffsetKey};
use crate::core::stream::{ArchiveStream, BoxedSink, BoxedStream, FileStream, MemorySink};
use crate::error::{ExtractError, Stage};
use crate::registry::Registry;

/// Read size used when streaming an entry into its sink.
const CHUNK_SIZE: i64 = 64 * 1024;

/// Called once per extracted entry with (position, total, path).
pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    /// Directory entries are written under.
    pub output_path: PathBuf,
    /// Create `output_path` if it does not exist.
    pub create_output_directory: bool,
    /// Skip entries that fail instead of aborting the run.
    pub continue_on_error: bool,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            output_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            create_output_directory: false,
            continue_on_error: false,
        }
    }
}

/// Per-call replacements for what would otherwise be configured or detected.
#[derive(Debug, Clone, Default)]
pub struct ExtractOverrides {
    pub output: Option<PathBuf>,
    pub format: Option<Arc<dyn ArchiveFormat>>,
    pub offset_key: Option<OffsetKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub path: String,
    pub message: String,
}

/// What an extraction run did with each entry.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub format: String,
    /// Files written to disk.
    pub written: Vec<PathBuf>,
    /// Entries a postprocessor closed.
    pub vetoed: Vec<String>,
    /// Entries skipped under continue-on-error.
    pub failed: Vec<FailedEntry>,
}

/// Decoded index of an archive, without anything extracted.
#[derive(Debug, Clone)]
pub struct ArchiveListing {
    pub format: String,
    /// `None` when preprocessing closed the archive.
    pub offset_key: Option<OffsetKey>,
    pub index: Index,
}

struct Prepared {
    format: Arc<dyn ArchiveFormat>,
    archive: BoxedStream,
    offset_key: Option<OffsetKey>,
    index: Index,
}

enum EntryOutcome {
    Written(PathBuf),
    Vetoed(String),
}

pub struct Extractor {
    settings: ExtractorSettings,
    registry: Registry,
    extra_formats: Registry,
    progress: Option<Arc<ProgressFn>>,
}

impl Extractor {
    /// Extractor over the built-in formats.
    pub fn new(settings: ExtractorSettings) -> Self {
        Self {
            settings,
            registry: Registry::builtin(),
            extra_formats: Registry::empty(),
            progress: None,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Formats considered during detection in addition to the registry.
    pub fn with_extra_formats(mut self, extra_formats: Registry) -> Self {
        self.extra_formats = extra_formats;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// The registry together with the extra formats. An extra format that
    /// shares a name with a registered one is still a separate candidate.
    pub fn formats(&self) -> Registry {
        self.registry.union(&self.extra_formats)
    }

    /// Detect the format of the archive at `path` among `additional` and,
    /// if `use_registered` is set, this extractor's own formats.
    pub fn detect_format(
        &self,
        path: &Path,
        use_registered: bool,
        additional: &Registry,
    ) -> Result<Arc<dyn ArchiveFormat>, ExtractError> {
        let candidates = if use_registered {
            additional.union(&self.formats())
        } else {
            additional.clone()
        };
        let mut archive = FileStream::open(path)?;
        detect_in(&candidates, &mut archive)
    }

    /// Decode the index of the archive at `path` without extracting anything.
    pub fn read_index(&self, path: &Path, overrides: &ExtractOverrides) -> Result<ArchiveListing, ExtractError> {
        let prepared = self.prepare(path, overrides)?;
        Ok(ArchiveListing {
            format: prepared.format.name().to_string(),
            offset_key: prepared.offset_key,
            index: prepared.index,
        })
    }

    /// Extract every entry of the archive at `path`.
    ///
    /// Entry failures abort the run unless continue-on-error is set, in
    /// which case they are listed in the report. Files written before an
    /// abort stay on disk.
    pub fn extract_files(&self, path: &Path, overrides: &ExtractOverrides) -> Result<ExtractionReport, ExtractError> {
        info!("Extracting files from {}.", path.display());

        let output = overrides
            .output
            .clone()
            .unwrap_or_else(|| self.settings.output_path.clone());
        if self.settings.create_output_directory && !output.exists() {
            debug!("Creating output directory: {}", output.display());
            fs::create_dir_all(&output)?;
        }
        if !output.is_dir() {
            return Err(ExtractError::NotADirectory(output));
        }
        debug!("Output directory: {}", output.display());

        let Prepared {
            format,
            mut archive,
            index,
            ..
        } = self.prepare(path, overrides)?;

        let mut report = ExtractionReport {
            format: format.name().to_string(),
            ..Default::default()
        };
        let continue_on_error = self.settings.continue_on_error;
        let failures = RefCell::new(Vec::new());

        {
            let mut on_error =
                |entry: &str, error: anyhow::Error| entry_failed(continue_on_error, &failures, entry, error);
            let mut entries = format
                .extract(index, archive.as_mut(), &mut on_error)
                .map_err(|e| ExtractError::format(format.name(), Stage::Extract, e))?;

            debug!("Writing files to {}", output.display());
            let total = entries.total();
            let mut position = 0usize;
            while let Some(next) = entries.next_entry() {
                let entry = next?;
                position += 1;
                if let Some(progress) = &self.progress {
                    progress(position, total, &entry.path);
                }

                match write_entry(format.as_ref(), &output, entry) {
                    Ok(EntryOutcome::Written(target)) => report.written.push(target),
                    Ok(EntryOutcome::Vetoed(entry)) => {
                        debug!("{} was closed by postprocessing, not writing it", entry);
                        report.vetoed.push(entry);
                    }
                    Err(ExtractError::Extraction { path, source }) => {
                        entry_failed(continue_on_error, &failures, &path, source)?
                    }
                    Err(fatal) => return Err(fatal),
                }
            }
        }

        report.failed = failures.into_inner();
        info!(
            "Extracted {} files from {} ({} skipped, {} failed)",
            report.written.len(),
            path.display(),
            report.vetoed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Resolve the format, open and preprocess the archive, locate and
    /// decode the index.
    fn prepare(&self, path: &Path, overrides: &ExtractOverrides) -> Result<Prepared, ExtractError> {
        let mut file = FileStream::open(path)?;
        let format = match &overrides.format {
            Some(format) => Arc::clone(format),
            None => detect_in(&self.formats(), &mut file)?,
        };
        debug!("Using format {} for {}", format.name(), path.display());

        let mut archive = format
            .preprocess(Box::new(file))
            .map_err(|e| ExtractError::format(format.name(), Stage::Preprocess, e))?;
        if archive.is_closed() {
            info!("{} was closed by preprocessing, nothing to extract", path.display());
            return Ok(Prepared {
                format,
                archive,
                offset_key: None,
                index: Index::new(),
            });
        }

        let offset_key = match overrides.offset_key {
            Some(offset_key) => offset_key,
            None => {
                debug!("Finding offset and key for {}", path.display());
                format
                    .locate(archive.as_mut())
                    .map_err(|e| ExtractError::format(format.name(), Stage::Locate, e))?
            }
        };
        debug!("Using {}", offset_key);

        let index = format
            .decode_index(archive.as_mut(), offset_key)
            .map_err(|e| ExtractError::format(format.name(), Stage::DecodeIndex, e))?;
        debug!("Indexed {} entries in {}", index.len(), path.display());

        Ok(Prepared {
            format,
            archive,
            offset_key: Some(offset_key),
            index,
        })
    }
}

/// Run every candidate's detector over `archive`, rewinding after each.
fn detect_in(candidates: &Registry, archive: &mut dyn ArchiveStream) -> Result<Arc<dyn ArchiveFormat>, ExtractError> {
    let mut matches = Vec::new();
    for format in candidates.formats() {
        let detected = format
            .detect(archive)
            .map_err(|e| ExtractError::format(format.name(), Stage::Detect, e))?;
        archive.seek(SeekFrom::Start(0))?;
        if detected {
            debug!("{} matches {}", format.name(), archive.name().display());
            matches.push(Arc::clone(format));
        }
    }

    match matches.len() {
        0 => Err(ExtractError::UnknownFormat { candidates: Vec::new() }),
        1 => matches
            .pop()
            .ok_or_else(|| ExtractError::UnknownFormat { candidates: Vec::new() }),
        _ => Err(ExtractError::AmbiguousFormat {
            candidates: matches.iter().map(|format| format.name().to_string()).collect(),
        }),
    }
}

/// Continue-on-error policy for one failed entry.
fn entry_failed(
    continue_on_error: bool,
    failures: &RefCell<Vec<FailedEntry>>,
    path: &str,
    error: anyhow::Error,
) -> Result<(), ExtractError> {
    if !continue_on_error {
        return Err(ExtractError::Extraction {
            path: path.to_string(),
            source: error,
        });
    }
    warn!("Error extracting {}: {:#}, continuing per instruction.", path, error);
    failures.borrow_mut().push(FailedEntry {
        path: path.to_string(),
        message: format!("{:#}", error),
    });
    Ok(())
}

fn write_entry(
    format: &dyn ArchiveFormat,
    output: &Path,
    entry: ExtractedEntry<'_>,
) -> Result<EntryOutcome, ExtractError> {
    let ExtractedEntry { path, reader } = entry;
    let failed = |path: &str, source: anyhow::Error| ExtractError::Extraction {
        path: path.to_string(),
        source,
    };

    let target = resolve_target(output, &path).map_err(|e| failed(&path, e))?;
    let sink: BoxedSink = Box::new(MemorySink::new(target));
    let mut sink = format
        .postprocess(sink)
        .map_err(|e| ExtractError::format(format.name(), Stage::Postprocess, e))?;
    if sink.is_closed() {
        return Ok(EntryOutcome::Vetoed(path));
    }

    for chunk in reader.chunks(CHUNK_SIZE) {
        if sink.is_closed() {
            return Ok(EntryOutcome::Vetoed(path));
        }
        let chunk = chunk.map_err(|e| failed(&path, e.into()))?;
        sink.write_all(&chunk)
            .map_err(|e| failed(&path, anyhow::Error::new(e).context("Failed to buffer entry")))?;
    }
    if sink.is_closed() {
        return Ok(EntryOutcome::Vetoed(path));
    }

    let target = sink.target().to_path_buf();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))
            .map_err(|e| failed(&path, e))?;
    }
    fs::write(&target, sink.take_contents())
        .with_context(|| format!("Failed to write {}", target.display()))
        .map_err(|e| failed(&path, e))?;

    Ok(EntryOutcome::Written(target))
}

/// Join an index path onto `output`, refusing paths that are absolute or
/// climb above it.
fn resolve_target(output: &Path, entry: &str) -> anyhow::Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    bail!("Entry path {} escapes the output directory", entry);
                }
            }
            Component::RootDir | Component::Prefix(_) => bail!("Entry path {} is absolute", entry),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(anyhow!("Entry path {:?} names no file", entry));
    }
    Ok(output.join(relative))
}
