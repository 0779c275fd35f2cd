//! The carving state machine.
//!
//! A [`Carver`] owns at most one open [`CandidateFile`]. The caller drives it
//! with two calls per scanned position: [`Carver::check_header`] decides
//! whether a new file starts at the window, and [`Carver::feed`] appends the
//! position's block to whatever candidate is open afterwards.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::candidate::{AppendStatus, CandidateFile};
use crate::classify::{self, Classification};
use crate::config::Config;
use crate::format::{FormatDescriptor, FormatRole};
use crate::listing::{ListingReporter, TracingListing};
use crate::registry::SignatureRegistry;
use crate::sink::{FileNamer, OffsetNamer, RetryPolicy, SinkError, SinkFactory, open_with_retry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineStatus {
    #[default]
    Ok,
    /// The sink for a new candidate could not be created; nothing was adopted.
    ResourceDenied,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub verbose: u8,
    pub paranoid: bool,
    /// Bytes kept from each window for the archive lookbehind.
    pub block_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            verbose: 0,
            paranoid: false,
            block_size: 512,
        }
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            verbose: cfg.verbose,
            paranoid: cfg.paranoid,
            block_size: cfg.block_size,
        }
    }
}

/// A closed (or, when truncated, pending) candidate handed back to the caller.
#[derive(Debug)]
pub struct FinishedFile {
    classification: Classification,
    candidate: CandidateFile,
}

impl FinishedFile {
    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn candidate(&self) -> &CandidateFile {
        &self.candidate
    }

    /// Truncated candidates keep their sink open until settled.
    pub fn is_pending(&self) -> bool {
        self.candidate.has_open_sink()
    }

    /// Close a still-open sink and describe the result.
    pub fn settle(mut self, run_id: &str) -> Result<CarvedFile, SinkError> {
        self.candidate.close_output()?;
        Ok(self.report(run_id))
    }

    pub fn report(&self, run_id: &str) -> CarvedFile {
        let candidate = &self.candidate;
        let size = candidate.written();
        let global_start = candidate.start();
        let global_end = if size == 0 {
            global_start
        } else {
            global_start + size - 1
        };
        let summary = candidate.summary();
        CarvedFile {
            run_id: run_id.to_string(),
            file_type: candidate.format().map(|f| f.id).unwrap_or_default().to_string(),
            path: candidate.output_name().map(str::to_string),
            extension: candidate.extension().to_string(),
            global_start,
            global_end,
            size,
            classification: self.classification,
            md5: summary.map(|s| s.md5.clone()),
            sha256: summary.map(|s| s.sha256.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CarvedFile {
    pub run_id: String,
    pub file_type: String,
    /// Sink name relative to the output root; `None` for skipped formats.
    pub path: Option<String>,
    pub extension: String,
    pub global_start: u64,
    pub global_end: u64,
    pub size: u64,
    pub classification: Classification,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

/// Result of one [`Carver::check_header`] call.
#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub status: EngineStatus,
    /// Format of the candidate adopted at this offset.
    pub header: Option<&'static FormatDescriptor>,
    /// The previously open candidate, closed because a header was found.
    pub finished: Option<FinishedFile>,
    /// An open archive claimed the window; the registry was not consulted.
    pub continued: bool,
    /// Set with [`EngineStatus::ResourceDenied`].
    pub resume_offset: Option<u64>,
}

impl CheckOutcome {
    pub fn classification(&self) -> Option<Classification> {
        self.finished.as_ref().map(FinishedFile::classification)
    }

    /// The open candidate came out truncated and the new header was not
    /// adopted; the caller has to settle it and rescan.
    pub fn truncated_pending(&self) -> bool {
        self.classification() == Some(Classification::OkTruncated)
    }
}

#[derive(Debug)]
pub enum FeedStatus {
    /// No candidate is open.
    Idle,
    Continue,
    Complete(FinishedFile),
    /// The sink rejected a write; the candidate was closed on the bytes that
    /// made it out.
    WriteFailed(FinishedFile),
}

pub struct Carver {
    registry: Arc<SignatureRegistry>,
    options: EngineOptions,
    sinks: Arc<dyn SinkFactory>,
    namer: Box<dyn FileNamer>,
    listing: Box<dyn ListingReporter>,
    retry: RetryPolicy,
    current: Option<CandidateFile>,
    resume_offset: Option<u64>,
    previous_block: Option<(u64, Vec<u8>)>,
}

impl std::fmt::Debug for Carver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Carver")
            .field("options", &self.options)
            .field("current", &self.current)
            .field("resume_offset", &self.resume_offset)
            .finish()
    }
}

impl Carver {
    pub fn new(
        registry: Arc<SignatureRegistry>,
        options: EngineOptions,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            registry,
            options,
            sinks,
            namer: Box::new(OffsetNamer),
            listing: Box::new(TracingListing),
            retry: RetryPolicy::platform_default(),
            current: None,
            resume_offset: None,
            previous_block: None,
        }
    }

    pub fn with_namer(mut self, namer: Box<dyn FileNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn with_listing(mut self, listing: Box<dyn ListingReporter>) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn current(&self) -> Option<&CandidateFile> {
        self.current.as_ref()
    }

    /// Offset at which the last denied header should be retried.
    pub fn resume_offset(&self) -> Option<u64> {
        self.resume_offset
    }

    /// Decide what the window at `offset` means for the open candidate.
    pub fn check_header(&mut self, window: &[u8], offset: u64) -> CheckOutcome {
        if self.archive_continues(window, offset) {
            if self.options.verbose > 1 {
                info!("archive continues at offset {offset}");
            }
            self.remember_block(window, offset);
            return CheckOutcome {
                continued: true,
                ..CheckOutcome::default()
            };
        }

        let mut new = CandidateFile::new(offset);
        let mut found = None;
        for entry in self.registry.find_candidates(window) {
            if entry
                .validator()
                .validate(window, false, self.current.as_ref(), &mut new)
            {
                found = Some(entry.format());
                break;
            }
        }
        let Some(format) = found else {
            self.remember_block(window, offset);
            return CheckOutcome::default();
        };

        if self.options.verbose > 1 {
            info!("{} header found at offset {offset}", format.id);
        } else {
            debug!("{} header found at offset {offset}", format.id);
        }

        let mut finished = None;
        if let Some(old) = self.current.take() {
            let file = self.close(old);
            if file.classification == Classification::OkTruncated {
                self.remember_block(window, offset);
                return CheckOutcome {
                    finished: Some(file),
                    ..CheckOutcome::default()
                };
            }
            finished = Some(file);
        }

        if self.options.verbose > 0 {
            if let FormatRole::DirectoryListing(decoder) = &format.role {
                let mut entries = decoder.entries(window);
                self.listing.report(offset, &mut entries);
            }
        }

        new.adopt(format, offset);
        if format.recover {
            let name = self.namer.name_for(&new);
            match open_with_retry(self.sinks.as_ref(), &name, &self.retry) {
                Ok(stream) => new.attach(stream),
                Err(err) => {
                    warn!("skipping {} header at offset {offset}: {err}", format.id);
                    self.resume_offset = Some(offset);
                    self.remember_block(window, offset);
                    return CheckOutcome {
                        status: EngineStatus::ResourceDenied,
                        finished,
                        resume_offset: Some(offset),
                        ..CheckOutcome::default()
                    };
                }
            }
        }

        self.current = Some(new);
        self.resume_offset = None;
        self.remember_block(window, offset);
        CheckOutcome {
            header: Some(format),
            finished,
            ..CheckOutcome::default()
        }
    }

    /// Append the block at the current position to the open candidate.
    pub fn feed(&mut self, block: &[u8]) -> FeedStatus {
        let Some(current) = self.current.as_mut() else {
            return FeedStatus::Idle;
        };
        match current.append(block) {
            Ok(AppendStatus::Continue) => FeedStatus::Continue,
            Ok(AppendStatus::Complete) => match self.current.take() {
                Some(done) => FeedStatus::Complete(self.close(done)),
                None => FeedStatus::Idle,
            },
            Err(err) => {
                warn!(
                    "write to candidate at offset {} failed: {err}",
                    current.start()
                );
                match self.current.take() {
                    Some(failed) => FeedStatus::WriteFailed(self.close(failed)),
                    None => FeedStatus::Idle,
                }
            }
        }
    }

    /// Close the open candidate at end of scan or on cancellation.
    pub fn finalize(&mut self) -> Option<FinishedFile> {
        self.previous_block = None;
        let current = self.current.take()?;
        Some(self.close(current))
    }

    fn close(&self, mut candidate: CandidateFile) -> FinishedFile {
        let classification = classify::finish(&mut candidate, self.options.paranoid);
        debug!(
            "closed {} candidate at offset {} ({} bytes): {:?}",
            candidate.extension(),
            candidate.start(),
            candidate.written(),
            classification
        );
        FinishedFile {
            classification,
            candidate,
        }
    }

    fn archive_continues(&self, window: &[u8], offset: u64) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        let Some(FormatRole::StreamedArchive(continuation)) = current.role() else {
            return false;
        };
        let lookbehind = match &self.previous_block {
            Some((prev_offset, block)) if prev_offset + block.len() as u64 == offset => {
                Some(block.as_slice())
            }
            _ => None,
        };
        continuation.accepts(window, lookbehind, current)
    }

    fn remember_block(&mut self, window: &[u8], offset: u64) {
        let len = window.len().min(self.options.block_size);
        match &mut self.previous_block {
            Some((prev_offset, block)) => {
                *prev_offset = offset;
                block.clear();
                block.extend_from_slice(&window[..len]);
            }
            None => self.previous_block = Some((offset, window[..len].to_vec())),
        }
    }
}
