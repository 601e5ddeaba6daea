//! Pre- and postprocessing chains layered over a registry.
//!
//! Every format in a registry can be wrapped in a [`ProcessedFormat`] that
//! runs an extra transform after the wrapped format's own hook. Wrapping is
//! repeated once per processor, so for processors registered as
//! `[P1, P2, ..., Pn]` the stream passes through `Pn` first and `P1` last.
//!
//! A processor vetoes an archive (or a single output file) by closing the
//! stream it returns. Outer wrappers see the closed stream and hand it on
//! without calling their own processor.

use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::core::format::{ArchiveFormat, EntryStream, Index, OffsetKey, OnError};
use crate::core::stream::{ArchiveStream, BoxedSink, BoxedStream};
use crate::registry::Registry;

pub type Preprocessor = Arc<dyn Fn(BoxedStream) -> Result<BoxedStream> + Send + Sync>;
pub type Postprocessor = Arc<dyn Fn(BoxedSink) -> Result<BoxedSink> + Send + Sync>;

/// Ordered processors to chain onto every format of a registry.
#[derive(Clone, Default)]
pub struct PipelineSpec {
    preprocessors: Vec<Preprocessor>,
    postprocessors: Vec<Postprocessor>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preprocess<F>(mut self, processor: F) -> Self
    where
        F: Fn(BoxedStream) -> Result<BoxedStream> + Send + Sync + 'static,
    {
        self.preprocessors.push(Arc::new(processor));
        self
    }

    pub fn postprocess<F>(mut self, processor: F) -> Self
    where
        F: Fn(BoxedSink) -> Result<BoxedSink> + Send + Sync + 'static,
    {
        self.postprocessors.push(Arc::new(processor));
        self
    }

    pub fn with_postprocessor(mut self, processor: Postprocessor) -> Self {
        self.postprocessors.push(processor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.preprocessors.is_empty() && self.postprocessors.is_empty()
    }

    /// Build a new registry with this pipeline applied to every format.
    pub fn apply(&self, registry: &Registry) -> Registry {
        compose(registry, &self.preprocessors, &self.postprocessors)
    }
}

/// A format with one extra pre- and/or postprocessing step.
///
/// Detection, locating, index decoding and extraction go straight to the
/// wrapped format.
pub struct ProcessedFormat {
    inner: Arc<dyn ArchiveFormat>,
    preprocessor: Option<Preprocessor>,
    postprocessor: Option<Postprocessor>,
}

impl ProcessedFormat {
    pub fn new(
        inner: Arc<dyn ArchiveFormat>,
        preprocessor: Option<Preprocessor>,
        postprocessor: Option<Postprocessor>,
    ) -> Self {
        Self {
            inner,
            preprocessor,
            postprocessor,
        }
    }

    pub fn inner(&self) -> &Arc<dyn ArchiveFormat> {
        &self.inner
    }
}

impl ArchiveFormat for ProcessedFormat {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn detect(&self, archive: &mut dyn ArchiveStream) -> Result<bool> {
        self.inner.detect(archive)
    }

    fn locate(&self, archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        self.inner.locate(archive)
    }

    fn decode_index(&self, archive: &mut dyn ArchiveStream, offset_key: OffsetKey) -> Result<Index> {
        self.inner.decode_index(archive, offset_key)
    }

    fn extract<'a>(
        &self,
        index: Index,
        archive: &'a mut dyn ArchiveStream,
        on_error: &'a mut OnError<'a>,
    ) -> Result<Box<dyn EntryStream + 'a>> {
        self.inner.extract(index, archive, on_error)
    }

    fn preprocess(&self, source: BoxedStream) -> Result<BoxedStream> {
        if source.is_closed() {
            return Ok(source);
        }
        let source = self.inner.preprocess(source)?;
        match &self.preprocessor {
            Some(processor) if !source.is_closed() => processor(source),
            _ => Ok(source),
        }
    }

    fn postprocess(&self, sink: BoxedSink) -> Result<BoxedSink> {
        if sink.is_closed() {
            return Ok(sink);
        }
        let sink = self.inner.postprocess(sink)?;
        match &self.postprocessor {
            Some(processor) if !sink.is_closed() => processor(sink),
            _ => Ok(sink),
        }
    }
}

/// Wrap every format of `registry` with at most one pre- and one
/// postprocessor. `registry` itself is left untouched.
pub fn inject(registry: &Registry, preprocessor: Option<Preprocessor>, postprocessor: Option<Postprocessor>) -> Registry {
    debug!(
        "Injecting processors (pre: {}, post: {}) into registry {:?}",
        preprocessor.is_some(),
        postprocessor.is_some(),
        registry
    );

    registry
        .formats()
        .map(|format| {
            Arc::new(ProcessedFormat::new(
                Arc::clone(format),
                preprocessor.clone(),
                postprocessor.clone(),
            )) as Arc<dyn ArchiveFormat>
        })
        .collect()
}

/// Chain several processors onto every format of `registry` by repeated
/// [`inject`], last registered first.
pub fn compose(registry: &Registry, preprocessors: &[Preprocessor], postprocessors: &[Postprocessor]) -> Registry {
    let mut current = registry.clone();
    for processor in preprocessors.iter().rev() {
        current = inject(&current, Some(Arc::clone(processor)), None);
    }
    for processor in postprocessors.iter().rev() {
        current = inject(&current, None, Some(Arc::clone(processor)));
    }
    current
}

/// Postprocessor that drops output files with one of `extensions`.
pub fn exclude_extensions<S: AsRef<str>>(extensions: &[S]) -> Postprocessor {
    let extensions = normalize_extensions(extensions);
    Arc::new(move |mut sink: BoxedSink| -> Result<BoxedSink> {
        if has_extension(sink.target(), &extensions) {
            debug!("Skipping {} (excluded extension)", sink.target().display());
            sink.close();
        }
        Ok(sink)
    })
}

/// Postprocessor that keeps only output files with one of `extensions`.
pub fn include_extensions<S: AsRef<str>>(extensions: &[S]) -> Postprocessor {
    let extensions = normalize_extensions(extensions);
    Arc::new(move |mut sink: BoxedSink| -> Result<BoxedSink> {
        if !has_extension(sink.target(), &extensions) {
            debug!("Skipping {} (extension not included)", sink.target().display());
            sink.close();
        }
        Ok(sink)
    })
}

fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn has_extension(path: &std::path::Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
        .unwrap_or(false)
}
