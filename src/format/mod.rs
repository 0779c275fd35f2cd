//! Format plugins.
//!
//! Each plugin exposes one static [`FormatDescriptor`] whose `register`
//! function inserts its signatures into a [`RegistryBuilder`]. Nothing is
//! registered globally: [`build_registry`] walks [`builtin_formats`] once
//! and produces an immutable [`SignatureRegistry`].

pub mod fat_dir;
pub mod fds;
pub mod gct;
pub mod tar;

use std::fmt;

use anyhow::Result;
use tracing::debug;

use crate::candidate::CandidateFile;
use crate::config::Config;
use crate::listing::DirEntryRecord;
use crate::registry::{RegistryBuilder, RegistryError, SignatureRegistry};

/// Upper bound used by formats that do not know better (4 GiB - 1).
pub const DEFAULT_MAX_FILESIZE: u64 = u32::MAX as u64;

/// Decides whether a window is the next chunk of an open archive rather
/// than the start of a new file.
pub trait ContinuationCheck: Send + Sync {
    /// `previous_block` is the block right before `window` when the caller
    /// scans contiguously.
    fn accepts(
        &self,
        window: &[u8],
        previous_block: Option<&[u8]>,
        current: &CandidateFile,
    ) -> bool;
}

/// Reconstructs directory entries from a window, for reporting only.
pub trait DirectoryDecoder: Send + Sync {
    fn entries<'w>(&self, window: &'w [u8]) -> Box<dyn Iterator<Item = DirEntryRecord> + 'w>;
}

/// Capabilities beyond plain header matching.
pub enum FormatRole {
    Plain,
    /// Payload may contain any other format's magic; only the archive can
    /// tell its own continuation apart from a new header.
    StreamedArchive(&'static dyn ContinuationCheck),
    DirectoryListing(&'static dyn DirectoryDecoder),
}

impl fmt::Debug for FormatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatRole::Plain => f.write_str("Plain"),
            FormatRole::StreamedArchive(_) => f.write_str("StreamedArchive"),
            FormatRole::DirectoryListing(_) => f.write_str("DirectoryListing"),
        }
    }
}

pub struct FormatDescriptor {
    pub id: &'static str,
    pub extension: &'static str,
    pub description: &'static str,
    pub max_filesize: u64,
    /// Non-recoverable formats are matched only to be skipped over.
    pub recover: bool,
    pub enable_by_default: bool,
    pub role: FormatRole,
    pub register: fn(&mut RegistryBuilder) -> Result<(), RegistryError>,
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("id", &self.id)
            .field("extension", &self.extension)
            .field("recover", &self.recover)
            .field("enable_by_default", &self.enable_by_default)
            .field("role", &self.role)
            .finish()
    }
}

impl PartialEq for FormatDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FormatDescriptor {}

/// Every built-in plugin, in registration (priority) order.
pub fn builtin_formats() -> &'static [&'static FormatDescriptor] {
    static FORMATS: [&FormatDescriptor; 4] = [&fat_dir::DIR, &fds::FDS, &gct::GCT, &tar::TAR];
    &FORMATS
}

pub fn find_format(id: &str) -> Option<&'static FormatDescriptor> {
    builtin_formats()
        .iter()
        .copied()
        .find(|f| f.id.eq_ignore_ascii_case(id))
}

/// Register every enabled built-in format into a fresh registry.
pub fn build_registry(cfg: &Config) -> Result<SignatureRegistry> {
    build_registry_from(cfg, builtin_formats())
}

pub fn build_registry_from(
    cfg: &Config,
    formats: &[&'static FormatDescriptor],
) -> Result<SignatureRegistry> {
    let mut builder = RegistryBuilder::new(cfg.window_size);
    for format in formats {
        if !cfg.format_enabled(format.id, format.enable_by_default) {
            debug!("format {} disabled", format.id);
            continue;
        }
        (format.register)(&mut builder)?;
    }
    let registry = builder.build();
    debug!(
        "signature registry built: {} entries over {} formats",
        registry.len(),
        registry.formats().len()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn default_config_skips_formats_disabled_by_default() {
        let cfg = load_config(None).expect("config").config;
        let registry = build_registry(&cfg).expect("registry");
        let ids: Vec<_> = registry.formats().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["dir", "gct", "tar"]);
    }

    #[test]
    fn overrides_enable_and_disable_formats() {
        let mut cfg = load_config(None).expect("config").config;
        cfg.formats.insert("fds".to_string(), true);
        cfg.formats.insert("tar".to_string(), false);
        let registry = build_registry(&cfg).expect("registry");
        let ids: Vec<_> = registry.formats().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["dir", "fds", "gct"]);
    }

    #[test]
    fn too_small_window_fails_registration() {
        let mut cfg = load_config(None).expect("config").config;
        cfg.window_size = 128;
        assert!(build_registry(&cfg).is_err());
    }

    #[test]
    fn finds_formats_case_insensitively() {
        assert_eq!(find_format("GCT").map(|f| f.id), Some("gct"));
        assert!(find_format("jpeg").is_none());
    }
}
