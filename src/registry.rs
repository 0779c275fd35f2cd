//! Signature registry.
//!
//! Entries are grouped by the offset of their expected bytes and, inside a
//! group, bucketed by the first expected byte. A lookup reads one window
//! byte per group, walks only that bucket, and full-compares each entry.
//! Zero-length entries are wildcards: they match any window long enough to
//! reach their offset. Results from all groups are merged back into global
//! registration order.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::candidate::CandidateFile;
use crate::format::FormatDescriptor;

const BUCKETS: usize = 256;

/// Decides whether a window that matched a signature really is the format,
/// and fills in the carving parameters of the new candidate.
///
/// Implementations must reset every field they own (see
/// [`CandidateFile::reset`]) and must not keep references into `window`.
/// `safe_header_only` means only the header bytes are backed by device
/// content; the rest of the window must not be trusted.
pub trait HeaderValidator: Send + Sync {
    fn validate(
        &self,
        window: &[u8],
        safe_header_only: bool,
        current: Option<&CandidateFile>,
        new: &mut CandidateFile,
    ) -> bool;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("signature for {format} ends at {end}, past the {window_size}-byte window")]
    OutOfWindow {
        format: &'static str,
        end: usize,
        window_size: usize,
    },
}

#[derive(Clone)]
pub struct SignatureEntry {
    seq: u64,
    offset: usize,
    expected: Vec<u8>,
    format: &'static FormatDescriptor,
    validator: Arc<dyn HeaderValidator>,
}

impl fmt::Debug for SignatureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureEntry")
            .field("seq", &self.seq)
            .field("offset", &self.offset)
            .field("expected", &hex::encode(&self.expected))
            .field("format", &self.format.id)
            .finish()
    }
}

impl SignatureEntry {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    pub fn format(&self) -> &'static FormatDescriptor {
        self.format
    }

    pub fn validator(&self) -> &dyn HeaderValidator {
        self.validator.as_ref()
    }

    fn matches(&self, window: &[u8]) -> bool {
        let end = self.offset + self.expected.len();
        if self.expected.is_empty() {
            return !window.is_empty() && window.len() >= self.offset;
        }
        window.len() >= end && window[self.offset..end] == self.expected[..]
    }
}

struct BucketGroup {
    key_offset: usize,
    buckets: Vec<Vec<SignatureEntry>>,
}

impl BucketGroup {
    fn new(key_offset: usize) -> Self {
        Self {
            key_offset,
            buckets: (0..BUCKETS).map(|_| Vec::new()).collect(),
        }
    }
}

pub struct RegistryBuilder {
    window_size: usize,
    groups: Vec<BucketGroup>,
    wildcards: Vec<SignatureEntry>,
    formats: Vec<&'static FormatDescriptor>,
    next_seq: u64,
}

impl RegistryBuilder {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            groups: Vec::new(),
            wildcards: Vec::new(),
            formats: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn register(
        &mut self,
        offset: usize,
        expected: &[u8],
        format: &'static FormatDescriptor,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<(), RegistryError> {
        let end = offset.saturating_add(expected.len());
        if end > self.window_size || (expected.is_empty() && offset >= self.window_size) {
            return Err(RegistryError::OutOfWindow {
                format: format.id,
                end,
                window_size: self.window_size,
            });
        }

        let entry = SignatureEntry {
            seq: self.next_seq,
            offset,
            expected: expected.to_vec(),
            format,
            validator,
        };
        self.next_seq += 1;
        if !self.formats.iter().any(|f| f.id == format.id) {
            self.formats.push(format);
        }

        let Some(&key) = expected.first() else {
            self.wildcards.push(entry);
            return Ok(());
        };
        let idx = match self.groups.iter().position(|g| g.key_offset == offset) {
            Some(idx) => idx,
            None => {
                self.groups.push(BucketGroup::new(offset));
                self.groups.len() - 1
            }
        };
        self.groups[idx].buckets[key as usize].push(entry);
        Ok(())
    }

    pub fn build(self) -> SignatureRegistry {
        SignatureRegistry {
            window_size: self.window_size,
            groups: self.groups,
            wildcards: self.wildcards,
            formats: self.formats,
            len: self.next_seq as usize,
        }
    }
}

/// Immutable, shareable signature table.
pub struct SignatureRegistry {
    window_size: usize,
    groups: Vec<BucketGroup>,
    wildcards: Vec<SignatureEntry>,
    formats: Vec<&'static FormatDescriptor>,
    len: usize,
}

impl fmt::Debug for SignatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureRegistry")
            .field("window_size", &self.window_size)
            .field("entries", &self.len)
            .field("formats", &self.formats.iter().map(|f| f.id).collect::<Vec<_>>())
            .finish()
    }
}

impl SignatureRegistry {
    pub fn builder(window_size: usize) -> RegistryBuilder {
        RegistryBuilder::new(window_size)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Formats with at least one registered signature, in registration order.
    pub fn formats(&self) -> &[&'static FormatDescriptor] {
        &self.formats
    }

    /// Every entry whose expected bytes match `window`, in registration order.
    pub fn find_candidates<'r, 'w>(&'r self, window: &'w [u8]) -> Candidates<'r, 'w> {
        Candidates {
            registry: self,
            window,
            after: None,
        }
    }
}

/// Lazy merge of the buckets selected for one window.
///
/// Buckets hold entries in ascending `seq`, so each step takes the smallest
/// head past the last returned sequence number across all groups.
pub struct Candidates<'r, 'w> {
    registry: &'r SignatureRegistry,
    window: &'w [u8],
    after: Option<u64>,
}

fn first_after(lane: &[SignatureEntry], after: Option<u64>) -> Option<&SignatureEntry> {
    let idx = match after {
        Some(seq) => lane.partition_point(|e| e.seq <= seq),
        None => 0,
    };
    lane.get(idx)
}

impl<'r> Iterator for Candidates<'r, '_> {
    type Item = &'r SignatureEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.window.is_empty() {
            return None;
        }
        let registry = self.registry;
        loop {
            let after = self.after;
            let window = self.window;
            let entry = registry
                .groups
                .iter()
                .filter_map(|group| {
                    let &key = window.get(group.key_offset)?;
                    first_after(&group.buckets[key as usize], after)
                })
                .chain(first_after(&registry.wildcards, after))
                .min_by_key(|entry| entry.seq)?;
            self.after = Some(entry.seq);
            if entry.matches(window) {
                return Some(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatDescriptor, FormatRole};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_register(_: &mut RegistryBuilder) -> Result<(), RegistryError> {
        Ok(())
    }

    static ALPHA: FormatDescriptor = FormatDescriptor {
        id: "alpha",
        extension: "a",
        description: "test format alpha",
        max_filesize: 1 << 20,
        recover: true,
        enable_by_default: true,
        role: FormatRole::Plain,
        register: noop_register,
    };

    static BETA: FormatDescriptor = FormatDescriptor {
        id: "beta",
        extension: "b",
        description: "test format beta",
        max_filesize: 1 << 20,
        recover: true,
        enable_by_default: true,
        role: FormatRole::Plain,
        register: noop_register,
    };

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        accept: bool,
    }

    impl HeaderValidator for Counting {
        fn validate(
            &self,
            _window: &[u8],
            _safe_header_only: bool,
            _current: Option<&CandidateFile>,
            new: &mut CandidateFile,
        ) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            new.reset();
            self.accept
        }
    }

    fn counting(accept: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            accept,
        })
    }

    fn ids<'a>(it: impl Iterator<Item = &'a SignatureEntry>) -> Vec<&'static str> {
        it.map(|e| e.format().id).collect()
    }

    #[test]
    fn bucket_collision_requires_full_match() {
        let mut builder = SignatureRegistry::builder(64);
        let fds = counting(true);
        let fake = counting(true);
        builder.register(0, b"FDS\x1a", &ALPHA, fds.clone()).unwrap();
        builder.register(0, b"FOO!", &BETA, fake.clone()).unwrap();
        let registry = builder.build();

        let mut window = vec![0u8; 64];
        window[..5].copy_from_slice(b"FDS\x1a\x02");
        let found: Vec<_> = registry.find_candidates(&window).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].format().id, "alpha");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn merges_groups_in_registration_order() {
        let mut builder = SignatureRegistry::builder(1024);
        builder.register(257, b"ustar", &BETA, counting(true)).unwrap();
        builder.register(0, b"AB", &ALPHA, counting(true)).unwrap();
        builder.register(0, b"", &BETA, counting(true)).unwrap();
        builder.register(0, b"A", &ALPHA, counting(true)).unwrap();
        let registry = builder.build();

        let mut window = vec![0u8; 512];
        window[..2].copy_from_slice(b"AB");
        window[257..262].copy_from_slice(b"ustar");
        let found: Vec<_> = registry.find_candidates(&window).map(|e| e.offset()).collect();
        assert_eq!(found, vec![257, 0, 0, 0]);
        let seqs: Vec<_> = registry.find_candidates(&window).map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn interleaved_bucket_entries_keep_sequence_order() {
        let mut builder = SignatureRegistry::builder(64);
        builder.register(0, b"A", &ALPHA, counting(true)).unwrap();
        builder.register(4, b"X", &BETA, counting(true)).unwrap();
        builder.register(0, b"AB", &ALPHA, counting(true)).unwrap();
        builder.register(4, b"XY", &BETA, counting(true)).unwrap();
        builder.register(0, b"", &BETA, counting(true)).unwrap();
        builder.register(0, b"AC", &ALPHA, counting(true)).unwrap();
        builder.register(0, b"A", &ALPHA, counting(true)).unwrap();
        let registry = builder.build();

        let window = b"AB\0\0XY\0\0";
        let mut found = registry.find_candidates(window);
        let seqs: Vec<_> = found.by_ref().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 6]);
        assert!(found.next().is_none());
    }

    #[test]
    fn short_window_never_matches_or_panics() {
        let mut builder = SignatureRegistry::builder(1024);
        builder.register(0, b"JLGEN2XFI", &ALPHA, counting(true)).unwrap();
        builder.register(257, b"ustar", &BETA, counting(true)).unwrap();
        let registry = builder.build();

        assert!(registry.find_candidates(b"JLGEN2X").next().is_none());
        assert!(registry.find_candidates(&[]).next().is_none());
        let mut short = vec![0u8; 260];
        short[257..260].copy_from_slice(b"ust");
        assert!(registry.find_candidates(&short).next().is_none());
    }

    #[test]
    fn wildcard_matches_any_nonempty_window() {
        let mut builder = SignatureRegistry::builder(16);
        builder.register(0, b"", &ALPHA, counting(true)).unwrap();
        let registry = builder.build();
        assert_eq!(ids(registry.find_candidates(b"\x00")), vec!["alpha"]);
        assert_eq!(ids(registry.find_candidates(b"zz")), vec!["alpha"]);
        assert!(registry.find_candidates(b"").next().is_none());
    }

    #[test]
    fn rejects_signature_past_window() {
        let mut builder = SignatureRegistry::builder(16);
        let err = builder
            .register(10, b"0123456789", &ALPHA, counting(true))
            .unwrap_err();
        assert!(matches!(err, RegistryError::OutOfWindow { end: 20, .. }));
        assert!(builder.register(6, b"0123456789", &ALPHA, counting(true)).is_ok());
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SignatureRegistry>();
    }

    #[test]
    fn tracks_formats_once() {
        let mut builder = SignatureRegistry::builder(16);
        builder.register(0, b"A", &ALPHA, counting(true)).unwrap();
        builder.register(0, b"B", &ALPHA, counting(true)).unwrap();
        builder.register(0, b"C", &BETA, counting(true)).unwrap();
        let registry = builder.build();
        assert_eq!(registry.len(), 3);
        let ids: Vec<_> = registry.formats().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
