//! Command-line interface for RenRestore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "renrestore")]
#[command(about = "RenRestore - Ren'Py archive (RPA) extractor", long_about = None)]
pub struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract every file of an archive
    Extract {
        /// Archive file
        archive: PathBuf,

        /// Output directory (defaults to the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Create the output directory if it does not exist
        #[arg(long)]
        create_output: bool,

        /// Skip files that fail to extract instead of stopping
        #[arg(long)]
        continue_on_error: bool,

        /// Format name to use instead of detecting it (see `formats`)
        #[arg(long)]
        format: Option<String>,

        /// Index offset in hex, skips locating the index
        #[arg(long, value_parser = parse_hex)]
        offset: Option<u64>,

        /// Obfuscation key in hex, used with --offset
        #[arg(long, value_parser = parse_hex, requires = "offset")]
        key: Option<u64>,

        /// Do not write files with these extensions (can be repeated)
        #[arg(long = "exclude-ext", value_name = "EXT")]
        exclude_ext: Vec<String>,
    },

    /// Print the detected format of an archive
    Detect {
        /// Archive file
        archive: PathBuf,
    },

    /// List archive contents
    List {
        /// Archive file
        archive: PathBuf,

        /// Format name to use instead of detecting it
        #[arg(long)]
        format: Option<String>,
    },

    /// List the supported formats
    Formats,
}

fn parse_hex(value: &str) -> Result<u64, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", value, e))
}
