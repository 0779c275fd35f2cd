//! Output sinks for carved candidates.
//!
//! The engine never builds paths itself: a [`FileNamer`] names the candidate
//! and a [`SinkFactory`] turns the name into a writable destination.
//! Creation goes through [`open_with_retry`] because a freshly created file
//! can be briefly held by something else (live antivirus scanners on
//! Windows being the usual culprit).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::candidate::CandidateFile;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot create {name} after {attempts} attempt(s): {source}")]
    Denied {
        name: String,
        attempts: usize,
        #[source]
        source: io::Error,
    },
}

pub trait SinkFactory: Send + Sync {
    fn open_for_write(&self, name: &str) -> io::Result<Box<dyn Write + Send>>;

    /// Remove whatever was written under `name`. Used by callers that drop
    /// bad candidates; the engine itself never deletes output.
    fn discard(&self, name: &str) -> io::Result<()>;
}

/// Produces the output name for a candidate about to be opened.
pub trait FileNamer: Send + Sync {
    fn name_for(&self, candidate: &CandidateFile) -> String;
}

/// `<ext>/<ext>_<start as 12 hex digits>.<ext>`
#[derive(Debug, Default, Clone, Copy)]
pub struct OffsetNamer;

impl FileNamer for OffsetNamer {
    fn name_for(&self, candidate: &CandidateFile) -> String {
        let ext = sanitize_extension(candidate.extension());
        format!("{ext}/{ext}_{:012X}.{ext}", candidate.start())
    }
}

pub fn sanitize_extension(ext: &str) -> String {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() { "bin".to_string() } else { ext }
}

/// Writes each sink as a file below `root`.
#[derive(Debug, Clone)]
pub struct DirSinkFactory {
    root: PathBuf,
}

impl DirSinkFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SinkFactory for DirSinkFactory {
    fn open_for_write(&self, name: &str) -> io::Result<Box<dyn Write + Send>> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(File::create(path)?))
    }

    fn discard(&self, name: &str) -> io::Result<()> {
        std::fs::remove_file(self.root.join(name))
    }
}

/// Discards everything; used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn open_for_write(&self, _name: &str) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(io::sink()))
    }

    fn discard(&self, _name: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use memory::MemorySinkFactory;


/// Delay before each creation attempt. The first entry is normally zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        let mut delays: Vec<Duration> = delays.into_iter().collect();
        if delays.is_empty() {
            delays.push(Duration::ZERO);
        }
        Self { delays }
    }

    pub fn single_attempt() -> Self {
        Self::new([Duration::ZERO])
    }

    /// Three attempts, 0s/1s/2s apart, on Windows; one attempt elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new([
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
            ])
        } else {
            Self::single_attempt()
        }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::platform_default()
    }
}

pub fn open_with_retry(
    factory: &dyn SinkFactory,
    name: &str,
    policy: &RetryPolicy,
) -> Result<CarveStream, SinkError> {
    let mut last_err = None;
    for (attempt, delay) in policy.delays().iter().enumerate() {
        if !delay.is_zero() {
            thread::sleep(*delay);
        }
        match factory.open_for_write(name) {
            Ok(writer) => return Ok(CarveStream::new(name.to_string(), writer)),
            Err(err) => {
                debug!("sink creation attempt {} for {name} failed: {err}", attempt + 1);
                last_err = Some(err);
            }
        }
    }
    let source = last_err.unwrap_or_else(|| io::Error::other("no creation attempt made"));
    Err(SinkError::Denied {
        name: name.to_string(),
        attempts: policy.attempts(),
        source,
    })
}

/// An open sink plus running digests of everything written to it.
pub struct CarveStream {
    name: String,
    writer: BufWriter<Box<dyn Write + Send>>,
    written: u64,
    md5: md5::Context,
    sha256: Sha256,
}

impl std::fmt::Debug for CarveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarveStream")
            .field("name", &self.name)
            .field("written", &self.written)
            .finish()
    }
}

/// What remains of a [`CarveStream`] once it has been flushed and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub name: String,
    pub written: u64,
    pub md5: String,
    pub sha256: String,
}

impl CarveStream {
    pub(crate) fn new(name: String, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name,
            writer: BufWriter::new(writer),
            written: 0,
            md5: md5::Context::new(),
            sha256: Sha256::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub(crate) fn write_bytes(&mut self, buf: &[u8]) -> Result<(), SinkError> {
        self.writer.write_all(buf)?;
        self.md5.consume(buf);
        self.sha256.update(buf);
        self.written = self.written.saturating_add(buf.len() as u64);
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<StreamSummary, SinkError> {
        if let Err(err) = self.writer.flush() {
            warn!("flush of {} failed: {err}", self.name);
            return Err(err.into());
        }
        Ok(StreamSummary {
            name: self.name,
            written: self.written,
            md5: format!("{:x}", self.md5.compute()),
            sha256: hex::encode(self.sha256.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyFactory {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SinkFactory for FlakyFactory {
        fn open_for_write(&self, _name: &str) -> io::Result<Box<dyn Write + Send>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "held"));
            }
            Ok(Box::new(io::sink()))
        }

        fn discard(&self, _name: &str) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn retries_until_creation_succeeds() {
        let factory = FlakyFactory {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        };
        let policy = RetryPolicy::new([Duration::ZERO; 3]);
        let stream = open_with_retry(&factory, "x.bin", &policy).expect("opened");
        assert_eq!(stream.name(), "x.bin");
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_policy_is_exhausted() {
        let factory = FlakyFactory {
            failures_left: AtomicUsize::new(5),
            calls: AtomicUsize::new(0),
        };
        let policy = RetryPolicy::new([Duration::ZERO; 3]);
        let err = open_with_retry(&factory, "x.bin", &policy).unwrap_err();
        assert!(matches!(err, SinkError::Denied { attempts: 3, .. }));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn platform_default_matches_target() {
        let policy = RetryPolicy::platform_default();
        if cfg!(windows) {
            assert_eq!(
                policy.delays(),
                &[Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
            );
        } else {
            assert_eq!(policy.attempts(), 1);
        }
    }

    #[test]
    fn stream_digests_written_bytes() {
        let factory = MemorySinkFactory::new();
        let mut stream =
            open_with_retry(&factory, "a/a.bin", &RetryPolicy::single_attempt()).expect("open");
        stream.write_bytes(b"abc").expect("write");
        let summary = stream.finish().expect("finish");
        assert_eq!(summary.written, 3);
        assert_eq!(summary.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            summary.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(factory.contents("a/a.bin").as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn memory_factory_tracks_and_discards_outputs() {
        let factory = MemorySinkFactory::new();
        let mut writer = factory.open_for_write("tar/a.tar").expect("open");
        writer.write_all(b"xy").expect("write");
        factory.open_for_write("gct/b.gct").expect("open");
        assert_eq!(factory.names(), vec!["gct/b.gct", "tar/a.tar"]);

        factory.discard("tar/a.tar").expect("discard");
        assert_eq!(factory.names(), vec!["gct/b.gct"]);
        assert!(factory.contents("tar/a.tar").is_none());
    }

    #[test]
    fn dir_factory_creates_nested_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = DirSinkFactory::new(dir.path());
        let mut writer = factory.open_for_write("gct/gct_000000000000.gct").expect("open");
        writer.write_all(b"data").expect("write");
        drop(writer);
        assert!(dir.path().join("gct/gct_000000000000.gct").exists());
        factory.discard("gct/gct_000000000000.gct").expect("discard");
        assert!(!dir.path().join("gct/gct_000000000000.gct").exists());
    }
}
