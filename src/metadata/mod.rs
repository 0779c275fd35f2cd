pub mod jsonl;

use std::path::Path;

use thiserror::Error;

use crate::engine::CarvedFile;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub bytes_scanned: u64,
    pub chunks_processed: u64,
    pub headers_found: u64,
    pub files_ok: u64,
    pub files_truncated: u64,
    pub files_bad: u64,
    pub files_skipped: u64,
    pub resource_denied: u64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn files_carved(&self) -> u64 {
        self.files_ok + self.files_truncated
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

/// Metadata output sink for carved files.
///
/// # Example
/// ```rust
/// use sectorcarve::config;
/// use sectorcarve::metadata::{self, MetadataSink, RunSummary};
/// use std::path::PathBuf;
///
/// let loaded = config::load_config(None).unwrap();
/// let run_output_dir = std::env::temp_dir().join("sectorcarve_meta_example");
/// std::fs::create_dir_all(&run_output_dir).unwrap();
///
/// let sink = metadata::build_sink(
///     "example_run",
///     "0.1.0",
///     &loaded.config_hash,
///     PathBuf::from("image.raw").as_path(),
///     "",
///     &run_output_dir,
/// )
/// .unwrap();
///
/// let summary = RunSummary {
///     run_id: "example_run".to_string(),
///     ..RunSummary::default()
/// };
/// sink.record_run_summary(&summary).unwrap();
/// sink.flush().unwrap();
/// ```
pub trait MetadataSink: Send + Sync {
    fn record_file(&self, file: &CarvedFile) -> Result<(), MetadataError>;
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError>;
    fn flush(&self) -> Result<(), MetadataError>;
}

/// A no-op sink for dry-run mode that doesn't write any files
pub struct DryRunSink;

impl MetadataSink for DryRunSink {
    fn record_file(&self, _file: &CarvedFile) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_run_summary(&self, _summary: &RunSummary) -> Result<(), MetadataError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

pub fn build_sink(
    run_id: &str,
    tool_version: &str,
    config_hash: &str,
    evidence_path: &Path,
    evidence_sha256: &str,
    run_output_dir: &Path,
) -> Result<Box<dyn MetadataSink>, MetadataError> {
    Ok(Box::new(jsonl::JsonlSink::new(
        run_id,
        tool_version,
        config_hash,
        evidence_path,
        evidence_sha256,
        run_output_dir,
    )?))
}

/// Build a dry-run sink that doesn't write any files
pub fn build_dry_run_sink() -> Box<dyn MetadataSink> {
    Box::new(DryRunSink)
}
