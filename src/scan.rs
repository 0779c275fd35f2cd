//! Reference scan driver.
//!
//! Walks an evidence source block by block, asks the [`Carver`] about every
//! position, feeds it the block, and settles whatever it hands back. A
//! truncated candidate makes the scan rewind to where its bytes end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::chunk::{ScanChunk, align_up};
use crate::classify::Classification;
use crate::config::Config;
use crate::engine::{Carver, EngineOptions, EngineStatus, FeedStatus, FinishedFile};
use crate::evidence::EvidenceSource;
use crate::metadata::{MetadataSink, RunSummary};
use crate::registry::SignatureRegistry;
use crate::sink::SinkFactory;

/// Scan `evidence` with a fresh carver built from `cfg`.
pub fn run_scan(
    cfg: &Config,
    evidence: &dyn EvidenceSource,
    registry: Arc<SignatureRegistry>,
    sinks: Arc<dyn SinkFactory>,
    meta: &dyn MetadataSink,
    cancel: &AtomicBool,
) -> Result<RunSummary> {
    let carver = Carver::new(registry, EngineOptions::from_config(cfg), sinks.clone())
        .with_retry_policy(cfg.retry_policy());
    scan_with(carver, cfg, evidence, sinks.as_ref(), meta, cancel)
}

/// Scan with a caller-configured carver.
pub fn scan_with(
    mut carver: Carver,
    cfg: &Config,
    evidence: &dyn EvidenceSource,
    sinks: &dyn SinkFactory,
    meta: &dyn MetadataSink,
    cancel: &AtomicBool,
) -> Result<RunSummary> {
    let block = cfg.block_size as u64;
    let window_size = cfg.window_size;
    let total = evidence.len();
    let mut driver = Driver {
        cfg,
        sinks,
        meta,
        summary: RunSummary {
            run_id: cfg.run_id.clone(),
            ..RunSummary::default()
        },
    };

    info!(
        "scanning {total} bytes (block={block} window={window_size} chunk={})",
        cfg.chunk_size
    );

    let mut chunk: Option<ScanChunk> = None;
    let mut next_chunk_id = 0u64;
    let mut pos = 0u64;
    let mut furthest = 0u64;

    while pos < total {
        if cancel.load(Ordering::Relaxed) {
            warn!("scan cancelled at offset {pos}");
            driver.summary.cancelled = true;
            break;
        }

        if !chunk.as_ref().is_some_and(|c| c.contains(pos)) {
            let loaded = ScanChunk::load(
                evidence,
                next_chunk_id,
                pos,
                cfg.chunk_size,
                window_size as u64,
            )
            .with_context(|| format!("reading evidence at offset {pos}"))?;
            next_chunk_id += 1;
            driver.summary.chunks_processed += 1;
            debug!(
                "chunk {} start={} valid={}",
                loaded.id, loaded.start, loaded.valid_length
            );
            if loaded.valid_length == 0 {
                warn!("evidence ended early at offset {pos}");
                break;
            }
            chunk = Some(loaded);
        }
        let Some(current_chunk) = chunk.as_ref() else {
            break;
        };

        let window = current_chunk.window_at(pos, window_size);
        let outcome = carver.check_header(window, pos);
        if outcome.header.is_some() {
            driver.summary.headers_found += 1;
        }
        let status = outcome.status;
        let rewind = outcome.truncated_pending();
        if let Some(finished) = outcome.finished {
            let target = rewind_target(&finished, block);
            driver.settle(finished)?;
            if rewind {
                debug!("rewinding scan from {pos} to {target}");
                pos = target;
                continue;
            }
        }
        if status == EngineStatus::ResourceDenied {
            driver.summary.resource_denied += 1;
            pos += block;
            continue;
        }

        let block_len = window.len().min(block as usize);
        match carver.feed(&window[..block_len]) {
            FeedStatus::Complete(file) | FeedStatus::WriteFailed(file) => driver.settle(file)?,
            FeedStatus::Idle | FeedStatus::Continue => {}
        }
        pos += block;
        furthest = furthest.max(pos.min(total));
    }

    if let Some(file) = carver.finalize() {
        driver.settle(file)?;
    }

    let mut summary = driver.summary;
    summary.bytes_scanned = furthest;
    meta.record_run_summary(&summary).context("writing run summary")?;
    meta.flush().context("flushing metadata")?;

    info!(
        "scan finished: {} ok, {} truncated, {} bad, {} skipped, {} denied",
        summary.files_ok,
        summary.files_truncated,
        summary.files_bad,
        summary.files_skipped,
        summary.resource_denied
    );
    Ok(summary)
}

/// First block boundary after the truncated candidate's last byte, but
/// always past its header block.
fn rewind_target(file: &FinishedFile, block: u64) -> u64 {
    let candidate = file.candidate();
    let start = candidate.start();
    align_up(start + candidate.written(), block).max(start + block)
}

struct Driver<'a> {
    cfg: &'a Config,
    sinks: &'a dyn SinkFactory,
    meta: &'a dyn MetadataSink,
    summary: RunSummary,
}

impl Driver<'_> {
    fn settle(&mut self, file: FinishedFile) -> Result<()> {
        let classification = file.classification();
        let recoverable = file.candidate().format().is_some_and(|f| f.recover);
        let report = match file.settle(&self.cfg.run_id) {
            Ok(report) => report,
            Err(err) => {
                warn!("could not close truncated output: {err}");
                self.summary.files_bad += 1;
                return Ok(());
            }
        };

        if !recoverable {
            debug!(
                "skipped {} block at offset {} ({} bytes)",
                report.file_type, report.global_start, report.size
            );
            self.summary.files_skipped += 1;
            return Ok(());
        }

        match classification {
            Classification::Ok => self.summary.files_ok += 1,
            Classification::OkTruncated => self.summary.files_truncated += 1,
            Classification::Bad => {
                self.summary.files_bad += 1;
                if !self.cfg.keep_bad {
                    if let Some(path) = &report.path {
                        if let Err(err) = self.sinks.discard(path) {
                            warn!("failed to discard bad output {path}: {err}");
                        }
                    }
                    return Ok(());
                }
            }
        }

        info!(
            "carved {} at offset {} ({} bytes, {:?})",
            report.file_type, report.global_start, report.size, classification
        );
        self.meta
            .record_file(&report)
            .with_context(|| format!("recording {}", report.file_type))?;
        Ok(())
    }
}
