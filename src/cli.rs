use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Input image or block device
    #[arg(short, long, required_unless_present = "list_formats")]
    pub input: Option<PathBuf>,

    /// Output directory for carved files and metadata
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Limit carving to these formats (comma-separated list)
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<String>>,

    /// Increase verbosity (-v lists directories, -vv traces headers)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Treat short size-based files as bad instead of truncated
    #[arg(long)]
    pub paranoid: bool,

    /// Scan granularity in bytes (multiple of 512)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Keep output of files classified as bad
    #[arg(long)]
    pub keep_bad: bool,

    /// Scan without writing carved files or metadata
    #[arg(long)]
    pub dry_run: bool,

    /// Provide evidence SHA-256 (hex) for metadata output
    #[arg(long)]
    pub evidence_sha256: Option<String>,

    /// Compute evidence SHA-256 before scanning (extra full pass)
    #[arg(long)]
    pub compute_evidence_sha256: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Print the built-in formats and exit
    #[arg(long)]
    pub list_formats: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
