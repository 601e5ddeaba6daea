mod common;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use common::{build_archive, index_blob, segment_table, Revision, TestFile};
use renrestore_core::core::stream::{ArchiveStream, BoxedSink, BoxedStream, MemoryStream, OutputSink};
use renrestore_core::formats::rpa::{Rpa1, Rpa2};
use renrestore_core::orchestrator::{ExtractOverrides, Extractor, ExtractorSettings};
use renrestore_core::pipeline::{self, PipelineSpec};
use renrestore_core::{ArchiveFormat, ExtractError, OffsetKey, Registry, Stage};
use tempfile::TempDir;

fn write_archive(dir: &TempDir, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = dir.path().join(name);
    fs::write(&path, data)?;
    Ok(path)
}

fn settings(output: &Path) -> ExtractorSettings {
    ExtractorSettings {
        output_path: output.to_path_buf(),
        ..Default::default()
    }
}

fn entry_path(output: &Path, index_path: &str) -> PathBuf {
    index_path.split('/').fold(output.to_path_buf(), |acc, part| acc.join(part))
}

#[test]
fn test_minimal_archive_extracts_hello() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("out");
    fs::create_dir(&output)?;

    // Ten bytes of padding, the file body, then the index.
    let mut data = b"0123456789hello".to_vec();
    data.extend_from_slice(&index_blob(&[("a/b.txt".to_string(), 10, 5, Vec::new())]));
    let archive = write_archive(&dir, "data.rpi", &data)?;

    let overrides = ExtractOverrides {
        offset_key: Some(OffsetKey::plain(15)),
        ..Default::default()
    };
    let report = Extractor::new(settings(&output)).extract_files(&archive, &overrides)?;

    assert_eq!(report.format, "RPA-1.0");
    assert_eq!(fs::read(entry_path(&output, "a/b.txt"))?, b"hello");
    assert_eq!(report.written.len(), 1);
    Ok(())
}

#[test]
fn test_obfuscated_archive_extracts_every_file() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![
        TestFile::new("script.rpyc", b"compiled script bytes"),
        TestFile::new("images/bg/room.png", b"\x89PNG fake image").with_prefix(b"\x89PNG"),
        TestFile::new("audio/theme.ogg", b"OggS"),
    ];
    let archive = write_archive(&dir, "archive.rpa", &build_archive(&Revision::Rpa3 { key: 0x42424242 }, &files))?;

    let report = Extractor::new(settings(dir.path())).extract_files(&archive, &ExtractOverrides::default())?;

    assert_eq!(report.format, "RPA-3.0");
    assert!(report.failed.is_empty());
    for file in &files {
        assert_eq!(fs::read(entry_path(dir.path(), &file.path))?, file.expected(), "{}", file.path);
    }
    assert_eq!(report.written.len(), files.len());
    Ok(())
}

#[test]
fn test_continue_on_error_skips_truncated_entry() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("out");
    let files = vec![
        TestFile::new("a.txt", b"first"),
        TestFile::new("b.txt", b"broken").truncated(),
        TestFile::new("c.txt", b"third"),
    ];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;

    let extractor = Extractor::new(ExtractorSettings {
        output_path: output.clone(),
        create_output_directory: true,
        continue_on_error: true,
    });
    let report = extractor.extract_files(&archive, &ExtractOverrides::default())?;

    assert_eq!(fs::read(output.join("a.txt"))?, b"first");
    assert_eq!(fs::read(output.join("c.txt"))?, b"third");
    assert!(!output.join("b.txt").exists());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "b.txt");
    assert!(report.failed[0].message.contains("Unexpected end of archive"));
    Ok(())
}

#[test]
fn test_truncated_entry_aborts_without_continue() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![
        TestFile::new("a.txt", b"first"),
        TestFile::new("b.txt", b"broken").truncated(),
        TestFile::new("c.txt", b"third"),
    ];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;
    let output = dir.path().join("out");
    fs::create_dir(&output)?;

    let err = Extractor::new(settings(&output))
        .extract_files(&archive, &ExtractOverrides::default())
        .unwrap_err();

    match &err {
        ExtractError::Extraction { path, .. } => assert_eq!(path, "b.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_fatal());
    // Nothing is rolled back.
    assert!(output.join("a.txt").exists());
    assert!(!output.join("c.txt").exists());
    Ok(())
}

#[test]
fn test_entry_without_segments_follows_error_policy() -> Result<()> {
    let dir = TempDir::new()?;
    let header_len = format!("RPA-2.0 {:016x}\n", 0).len() as u64;
    let mut data = format!("RPA-2.0 {:016x}\n", header_len + 4).into_bytes();
    data.extend_from_slice(b"real");
    data.extend_from_slice(&segment_table(&[("ghost.txt", vec![]), ("real.txt", vec![(header_len, 4)])]));
    let archive = write_archive(&dir, "game.rpa", &data)?;

    let output = dir.path().join("out");
    let strict = Extractor::new(ExtractorSettings {
        output_path: output.clone(),
        create_output_directory: true,
        continue_on_error: false,
    });
    match strict.extract_files(&archive, &ExtractOverrides::default()) {
        Err(ExtractError::Extraction { path, .. }) => assert_eq!(path, "ghost.txt"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!output.join("real.txt").exists());

    let lenient = Extractor::new(ExtractorSettings {
        output_path: output.clone(),
        create_output_directory: true,
        continue_on_error: true,
    });
    let report = lenient.extract_files(&archive, &ExtractOverrides::default())?;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "ghost.txt");
    assert!(report.failed[0].message.contains("no segments"));
    assert_eq!(fs::read(output.join("real.txt"))?, b"real");
    Ok(())
}

#[test]
fn test_detection_unknown_and_ambiguous() -> Result<()> {
    let dir = TempDir::new()?;
    let registry: Registry = vec![Arc::new(Rpa1) as Arc<dyn ArchiveFormat>, Arc::new(Rpa2)]
        .into_iter()
        .collect();
    let extractor = Extractor::new(settings(dir.path())).with_registry(registry);

    let neither = write_archive(&dir, "plain.bin", b"nothing to see here")?;
    let err = extractor.detect_format(&neither, true, &Registry::empty()).unwrap_err();
    assert!(matches!(err, ExtractError::UnknownFormat { .. }));
    assert!(err.candidates().is_empty());

    let both = write_archive(&dir, "contrived.rpi", b"RPA-2.0 0000000000000000\n")?;
    let err = extractor.detect_format(&both, true, &Registry::empty()).unwrap_err();
    assert!(matches!(err, ExtractError::AmbiguousFormat { .. }));
    assert_eq!(err.candidates(), ["RPA-1.0".to_string(), "RPA-2.0".to_string()]);

    // Only the additional formats are tried when the registry is not used.
    let only_rpa2: Registry = std::iter::once(Arc::new(Rpa2) as Arc<dyn ArchiveFormat>).collect();
    assert_eq!(extractor.detect_format(&both, false, &only_rpa2)?.name(), "RPA-2.0");
    Ok(())
}

/// Claims every archive under the RPA-2.0 name.
struct Impostor;

impl ArchiveFormat for Impostor {
    fn name(&self) -> &str {
        "RPA-2.0"
    }

    fn detect(&self, _archive: &mut dyn ArchiveStream) -> Result<bool> {
        Ok(true)
    }

    fn locate(&self, _archive: &mut dyn ArchiveStream) -> Result<OffsetKey> {
        Ok(OffsetKey::plain(0))
    }
}

#[test]
fn test_same_name_from_another_implementation_is_ambiguous() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![TestFile::new("a.txt", b"a")];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;

    let registry: Registry = std::iter::once(Arc::new(Rpa2) as Arc<dyn ArchiveFormat>).collect();
    let extra: Registry = std::iter::once(Arc::new(Impostor) as Arc<dyn ArchiveFormat>).collect();
    let extractor = Extractor::new(settings(dir.path()))
        .with_registry(registry)
        .with_extra_formats(extra);
    assert_eq!(extractor.formats().len(), 2);

    let err = extractor.detect_format(&archive, true, &Registry::empty()).unwrap_err();
    assert!(matches!(err, ExtractError::AmbiguousFormat { .. }));
    assert_eq!(err.candidates(), ["RPA-2.0".to_string(), "RPA-2.0".to_string()]);

    // The same instances offered twice are still one candidate each.
    let builtin = Registry::builtin();
    let extractor = Extractor::new(settings(dir.path())).with_registry(builtin.clone());
    assert_eq!(extractor.detect_format(&archive, true, &builtin)?.name(), "RPA-2.0");
    Ok(())
}

#[test]
fn test_variant_headers_share_one_name() -> Result<()> {
    let dir = TempDir::new()?;
    for magic in ["RPA-3.2", "RPA-4.0"] {
        let files = vec![TestFile::new("readme.txt", magic.as_bytes())];
        let revision = Revision::Variant { magic, key: 0xdeadbeef };
        let archive = write_archive(&dir, "variant.rpa", &build_archive(&revision, &files))?;
        let output = dir.path().join(magic);

        let extractor = Extractor::new(ExtractorSettings {
            output_path: output.clone(),
            create_output_directory: true,
            continue_on_error: false,
        });
        let report = extractor.extract_files(&archive, &ExtractOverrides::default())?;

        assert_eq!(report.format, "RPA-3.2/4.0");
        assert_eq!(fs::read(output.join("readme.txt"))?, magic.as_bytes());
    }
    Ok(())
}

#[test]
fn test_postprocess_veto_skips_file() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![
        TestFile::new("script.rpy", b"label start:"),
        TestFile::new("images/title.png", b"png data"),
    ];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa3 { key: 7 }, &files))?;

    let registry = PipelineSpec::new()
        .with_postprocessor(pipeline::exclude_extensions(&["png"]))
        .apply(&Registry::builtin());
    let report = Extractor::new(settings(dir.path()))
        .with_registry(registry)
        .extract_files(&archive, &ExtractOverrides::default())?;

    assert!(dir.path().join("script.rpy").exists());
    assert!(!entry_path(dir.path(), "images/title.png").exists());
    assert_eq!(report.vetoed.len(), 1);
    assert_eq!(report.written.len(), 1);
    Ok(())
}

#[test]
fn test_preprocessor_veto_skips_whole_archive() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("out");
    fs::create_dir(&output)?;
    let files = vec![TestFile::new("a.txt", b"a"), TestFile::new("b.txt", b"b")];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;

    let registry = PipelineSpec::new()
        .preprocess(|mut source: BoxedStream| {
            source.close();
            Ok(source)
        })
        .apply(&Registry::builtin());
    let extractor = Extractor::new(settings(&output)).with_registry(registry);

    let report = extractor.extract_files(&archive, &ExtractOverrides::default())?;
    assert_eq!(report.format, "RPA-2.0");
    assert!(report.written.is_empty());
    assert!(report.vetoed.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(fs::read_dir(&output)?.count(), 0);

    let listing = extractor.read_index(&archive, &ExtractOverrides::default())?;
    assert!(listing.index.is_empty());
    assert!(listing.offset_key.is_none());
    Ok(())
}

/// Closes itself once more than `limit` bytes went through it.
struct ClosingSink {
    inner: BoxedSink,
    limit: usize,
    written: usize,
}

impl Write for ClosingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n;
        if self.written > self.limit {
            self.inner.close();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OutputSink for ClosingSink {
    fn target(&self) -> &Path {
        self.inner.target()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn take_contents(&mut self) -> Vec<u8> {
        self.inner.take_contents()
    }
}

#[test]
fn test_sink_closed_while_writing_is_a_veto() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("out");
    fs::create_dir(&output)?;
    // Several chunks, a single chunk past the limit, and one under it.
    let big = vec![0xabu8; 200 * 1024];
    let medium = vec![0xcdu8; 5000];
    let files = vec![
        TestFile::new("big.bin", &big),
        TestFile::new("medium.bin", &medium),
        TestFile::new("small.txt", b"tiny"),
    ];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa3 { key: 0x99 }, &files))?;

    let registry = PipelineSpec::new()
        .postprocess(|sink: BoxedSink| {
            Ok(Box::new(ClosingSink {
                inner: sink,
                limit: 1000,
                written: 0,
            }) as BoxedSink)
        })
        .apply(&Registry::builtin());
    let report = Extractor::new(settings(&output))
        .with_registry(registry)
        .extract_files(&archive, &ExtractOverrides::default())?;

    assert_eq!(report.vetoed, vec!["big.bin".to_string(), "medium.bin".to_string()]);
    assert!(!output.join("big.bin").exists());
    assert!(!output.join("medium.bin").exists());
    assert_eq!(fs::read(output.join("small.txt"))?, b"tiny");
    assert!(report.failed.is_empty());
    Ok(())
}

#[test]
fn test_preprocessor_can_decrypt_archive() -> Result<()> {
    const MASK: u8 = 0x5a;
    let dir = TempDir::new()?;
    let files = vec![TestFile::new("secret.txt", b"plain text")];
    let scrambled: Vec<u8> = build_archive(&Revision::Rpa2, &files)
        .into_iter()
        .map(|b| b ^ MASK)
        .collect();
    let archive = write_archive(&dir, "scrambled.rpa", &scrambled)?;

    let registry = PipelineSpec::new()
        .preprocess(|mut source: BoxedStream| {
            let buffered = MemoryStream::buffer(source.as_mut())?;
            let clear = buffered.get_ref().iter().map(|b| b ^ MASK).collect();
            Ok(Box::new(MemoryStream::new(source.name(), clear)) as BoxedStream)
        })
        .apply(&Registry::builtin());
    let overrides = ExtractOverrides {
        format: registry.get("RPA-2.0"),
        ..Default::default()
    };

    Extractor::new(settings(dir.path()))
        .with_registry(registry)
        .extract_files(&archive, &overrides)?;

    assert_eq!(fs::read(dir.path().join("secret.txt"))?, b"plain text");
    Ok(())
}

#[test]
fn test_corrupt_index_is_fatal_even_when_continuing() -> Result<()> {
    let dir = TempDir::new()?;
    let mut data = b"RPA-2.0 0000000000000019\n".to_vec();
    data.extend_from_slice(b"this is not a zlib stream");
    let archive = write_archive(&dir, "broken.rpa", &data)?;

    let extractor = Extractor::new(ExtractorSettings {
        output_path: dir.path().to_path_buf(),
        create_output_directory: false,
        continue_on_error: true,
    });
    let err = extractor
        .extract_files(&archive, &ExtractOverrides::default())
        .unwrap_err();

    assert!(err.is_fatal());
    match err {
        ExtractError::Format { format, stage, .. } => {
            assert_eq!(format, "RPA-2.0");
            assert_eq!(stage, Stage::DecodeIndex);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_missing_output_directory() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![TestFile::new("a.txt", b"a")];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;
    let missing = dir.path().join("missing");

    let err = Extractor::new(settings(&missing))
        .extract_files(&archive, &ExtractOverrides::default())
        .unwrap_err();
    assert!(matches!(err, ExtractError::NotADirectory(_)));

    let overrides = ExtractOverrides {
        output: Some(dir.path().join("elsewhere")),
        ..Default::default()
    };
    let extractor = Extractor::new(ExtractorSettings {
        output_path: missing.clone(),
        create_output_directory: true,
        continue_on_error: false,
    });
    extractor.extract_files(&archive, &overrides)?;
    assert!(dir.path().join("elsewhere").join("a.txt").exists());
    assert!(!missing.exists());
    Ok(())
}

#[test]
fn test_read_index_and_progress() -> Result<()> {
    let dir = TempDir::new()?;
    let files = vec![
        TestFile::new("one.txt", b"1"),
        TestFile::new("two.txt", b"22").with_prefix(b"p"),
    ];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa3 { key: 0x1234 }, &files))?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let extractor = Extractor::new(settings(dir.path())).with_progress(Arc::new(
        move |current: usize, total: usize, path: &str| {
            sink.lock().unwrap().push((current, total, path.to_string()));
        },
    ));

    let listing = extractor.read_index(&archive, &ExtractOverrides::default())?;
    assert_eq!(listing.format, "RPA-3.0");
    assert_eq!(listing.offset_key.and_then(|k| k.key), Some(0x1234));
    let two = &listing.index["two.txt"][0];
    assert_eq!((two.length, two.prefix.as_slice()), (3, b"p".as_slice()));

    extractor.extract_files(&archive, &ExtractOverrides::default())?;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(1, 2, "one.txt".to_string()), (2, 2, "two.txt".to_string())]
    );
    Ok(())
}

#[test]
fn test_index_path_escaping_output_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("out");
    let files = vec![TestFile::new("../escape.txt", b"nope"), TestFile::new("ok.txt", b"fine")];
    let archive = write_archive(&dir, "game.rpa", &build_archive(&Revision::Rpa2, &files))?;

    let report = Extractor::new(ExtractorSettings {
        output_path: output.clone(),
        create_output_directory: true,
        continue_on_error: true,
    })
    .extract_files(&archive, &ExtractOverrides::default())?;

    assert!(!dir.path().join("escape.txt").exists());
    assert_eq!(fs::read(output.join("ok.txt"))?, b"fine");
    assert_eq!(report.failed.len(), 1);
    Ok(())
}
