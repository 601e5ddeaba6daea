//! RenRestore - Ren'Py archive extractor

use anyhow::{anyhow, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use renrestore_core::orchestrator::{ExtractOverrides, Extractor, ExtractorSettings};
use renrestore_core::pipeline::{self, PipelineSpec};
use renrestore_core::{ArchiveFormat, OffsetKey, Registry};
use std::sync::Arc;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Extract {
            archive,
            output,
            create_output,
            continue_on_error,
            format,
            offset,
            key,
            exclude_ext,
        } => {
            let mut settings = ExtractorSettings {
                create_output_directory: create_output,
                continue_on_error,
                ..Default::default()
            };
            if let Some(output) = output {
                settings.output_path = output;
            }

            let mut registry = Registry::builtin();
            if !exclude_ext.is_empty() {
                registry = PipelineSpec::new()
                    .with_postprocessor(pipeline::exclude_extensions(&exclude_ext))
                    .apply(&registry);
            }

            let overrides = ExtractOverrides {
                output: None,
                format: format.as_deref().map(|name| find_format(&registry, name)).transpose()?,
                offset_key: offset.map(|offset| OffsetKey::new(offset, key)),
            };

            println!("RenRestore - Extracting archive: {}", archive.display());
            println!("  Output: {}", settings.output_path.display());
            println!();

            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );

            let pb_clone = pb.clone();
            let progress_fn = Arc::new(move |current: usize, total: usize, msg: &str| {
                pb_clone.set_length(total as u64);
                pb_clone.set_position(current as u64);
                pb_clone.set_message(msg.to_string());
            });

            let extractor = Extractor::new(settings)
                .with_registry(registry)
                .with_progress(progress_fn);
            let report = extractor.extract_files(&archive, &overrides)?;

            pb.finish_with_message("Complete");
            println!();
            println!("Extraction complete!");
            println!("  Format: {}", report.format);
            println!("  Written: {} files", report.written.len());
            if !report.vetoed.is_empty() {
                println!("  Skipped (filtered): {} files", report.vetoed.len());
            }
            if !report.failed.is_empty() {
                println!("  Failed: {} files", report.failed.len());
                for failure in &report.failed {
                    println!("    {}: {}", failure.path, failure.message);
                }
            }

            Ok(())
        }

        Commands::Detect { archive } => {
            let extractor = Extractor::new(ExtractorSettings::default());
            let format = extractor.detect_format(&archive, true, &Registry::empty())?;
            println!("{}: {}", archive.display(), format.name());
            Ok(())
        }

        Commands::List { archive, format } => {
            let registry = Registry::builtin();
            let overrides = ExtractOverrides {
                format: format.as_deref().map(|name| find_format(&registry, name)).transpose()?,
                ..Default::default()
            };

            let extractor = Extractor::new(ExtractorSettings::default()).with_registry(registry);
            let listing = extractor.read_index(&archive, &overrides)?;

            println!("Archive: {} ({})", archive.display(), listing.format);
            if let Some(offset_key) = listing.offset_key {
                println!("Index: {}", offset_key);
            }
            println!();
            println!("{:>12} {:>12} {:>6}  Path", "Offset", "Length", "Prefix");
            for (path, segments) in &listing.index {
                match segments.first() {
                    Some(first) => {
                        println!("{:>12x} {:>12} {:>6}  {}", first.offset, first.length, first.prefix.len(), path)
                    }
                    None => println!("{:>12} {:>12} {:>6}  {}", "-", "-", "-", path),
                }
            }
            println!();
            println!("{} files", listing.index.len());
            Ok(())
        }

        Commands::Formats => {
            for name in Registry::builtin().names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn find_format(registry: &Registry, name: &str) -> Result<Arc<dyn ArchiveFormat>> {
    registry
        .get(name)
        .ok_or_else(|| anyhow!("Unknown format '{}', available: {}", name, registry.names().join(", ")))
}
