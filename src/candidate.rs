//! In-progress recovery state.
//!
//! A [`CandidateFile`] is created empty for a scan position, populated by a
//! header validator, extended block by block through [`CandidateFile::append`],
//! and finally classified by [`crate::classify::finish`].

use std::fmt;

use crate::format::{FormatDescriptor, FormatRole};
use crate::sink::{CarveStream, SinkError, StreamSummary};

/// Verdict of a [`ContentCheck`] on freshly appended bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVerdict {
    Continue,
    /// The file ends after this many bytes of the inspected block.
    EndsAt(usize),
}

/// Structural check for formats whose size cannot be computed from the header.
pub trait ContentCheck: Send + Sync {
    fn check_data(&mut self, block: &[u8]) -> DataVerdict;

    /// Final verdict once the candidate is being closed.
    fn check_file(&self, written: u64) -> bool;

    /// True when the next byte to arrive is known to belong to the file body.
    fn in_payload(&self) -> bool {
        false
    }
}

/// How a candidate decides it is complete and whether its content is sane.
pub enum CheckStrategy {
    /// Complete once exactly `calculated_size` bytes are written.
    Size,
    /// No end marker; the size is whatever was written when it got closed.
    Unbounded,
    Custom(Box<dyn ContentCheck>),
}

impl fmt::Debug for CheckStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStrategy::Size => f.write_str("Size"),
            CheckStrategy::Unbounded => f.write_str("Unbounded"),
            CheckStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Output {
    None,
    Open(CarveStream),
    Closed(StreamSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    Continue,
    Complete,
}

#[derive(Debug)]
pub struct CandidateFile {
    format: Option<&'static FormatDescriptor>,
    extension: &'static str,
    start: u64,
    pub min_size: u64,
    /// `None` while the size is still being discovered.
    pub calculated_size: Option<u64>,
    pub strategy: CheckStrategy,
    pub(crate) output: Output,
    written: u64,
}

impl CandidateFile {
    pub fn new(start: u64) -> Self {
        Self {
            format: None,
            extension: "",
            start,
            min_size: 0,
            calculated_size: None,
            strategy: CheckStrategy::Unbounded,
            output: Output::None,
            written: 0,
        }
    }

    /// Clear every field a header validator is responsible for.
    pub fn reset(&mut self) {
        self.extension = "";
        self.min_size = 0;
        self.calculated_size = None;
        self.strategy = CheckStrategy::Unbounded;
    }

    pub fn set_extension(&mut self, extension: &'static str) {
        self.extension = extension;
    }

    /// Bind a validated candidate to its format and device position.
    pub(crate) fn adopt(&mut self, format: &'static FormatDescriptor, start: u64) {
        self.format = Some(format);
        self.start = start;
        self.written = 0;
        self.output = Output::None;
        if self.extension.is_empty() {
            self.extension = format.extension;
        }
    }

    pub(crate) fn attach(&mut self, stream: CarveStream) {
        self.output = Output::Open(stream);
    }

    pub fn format(&self) -> Option<&'static FormatDescriptor> {
        self.format
    }

    pub fn role(&self) -> Option<&'static FormatRole> {
        self.format.map(|f| &f.role)
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn has_open_sink(&self) -> bool {
        matches!(self.output, Output::Open(_))
    }

    pub fn output_name(&self) -> Option<&str> {
        match &self.output {
            Output::None => None,
            Output::Open(stream) => Some(stream.name()),
            Output::Closed(summary) => Some(&summary.name),
        }
    }

    pub fn summary(&self) -> Option<&StreamSummary> {
        match &self.output {
            Output::Closed(summary) => Some(summary),
            _ => None,
        }
    }

    /// Upper bound on bytes this candidate may still take.
    fn limit(&self) -> Option<u64> {
        let max = self.format.map(|f| f.max_filesize);
        let calculated = match self.strategy {
            CheckStrategy::Size => self.calculated_size,
            _ => None,
        };
        match (calculated, max) {
            (Some(c), Some(m)) => Some(c.min(m)),
            (c, m) => c.or(m),
        }
    }

    /// Extend the candidate with the next block of device bytes.
    ///
    /// Never writes beyond the calculated size (for size-based candidates)
    /// or the format's maximum size. On a write error the bytes are not
    /// counted.
    pub fn append(&mut self, block: &[u8]) -> Result<AppendStatus, SinkError> {
        let limit = self.limit();
        let mut take = block.len();
        let mut status = AppendStatus::Continue;

        if let Some(limit) = limit {
            let remaining = limit.saturating_sub(self.written);
            if (take as u64) >= remaining {
                take = remaining as usize;
                status = AppendStatus::Complete;
            }
        }

        if let CheckStrategy::Custom(check) = &mut self.strategy {
            if let DataVerdict::EndsAt(end) = check.check_data(&block[..take]) {
                take = take.min(end);
                status = AppendStatus::Complete;
            }
        }

        if take > 0 {
            if let Output::Open(stream) = &mut self.output {
                stream.write_bytes(&block[..take])?;
            }
            self.written = self.written.saturating_add(take as u64);
        }
        Ok(status)
    }

    /// Flush and close the sink, if one is open.
    pub(crate) fn close_output(&mut self) -> Result<(), SinkError> {
        match std::mem::replace(&mut self.output, Output::None) {
            Output::Open(stream) => {
                self.output = Output::Closed(stream.finish()?);
                Ok(())
            }
            other => {
                self.output = other;
                Ok(())
            }
        }
    }
}
