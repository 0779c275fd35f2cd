//! # Utility Module
//!
//! Helpers shared by the binary: output directory checks and the `--types`
//! format filter.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::config::Config;
use crate::format::{builtin_formats, find_format};

/// Ensure output directory exists and is writable, warning on unsafe permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "output path is not a directory: {}",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }

    let probe_path = path.join(".sectorcarve_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }

    Ok(())
}

/// Restrict the enabled formats to `allow_list`.
///
/// Every built-in format not named is disabled, overriding both its default
/// and the config file. Returns the names that match no format.
pub fn filter_formats(cfg: &mut Config, allow_list: Option<&[String]>) -> Vec<String> {
    let Some(list) = allow_list else {
        return Vec::new();
    };

    let mut unknown = Vec::new();
    let mut allow = HashSet::new();
    for entry in list {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        match find_format(trimmed) {
            Some(format) => {
                allow.insert(format.id);
            }
            None => unknown.push(trimmed.to_ascii_lowercase()),
        }
    }

    for format in builtin_formats() {
        let enabled = allow.contains(format.id);
        debug!("format {} enabled={enabled} (--types)", format.id);
        cfg.formats.insert(format.id.to_string(), enabled);
    }
    unknown
}

/// Ids of the formats that would be registered under `cfg`.
pub fn enabled_formats(cfg: &Config) -> Vec<&'static str> {
    builtin_formats()
        .iter()
        .filter(|f| cfg.format_enabled(f.id, f.enable_by_default))
        .map(|f| f.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn types_filter_disables_everything_else() {
        let mut cfg = load_config(None).unwrap().config;
        let types = vec!["FDS".to_string(), " ".to_string(), "jpeg".to_string()];
        let unknown = filter_formats(&mut cfg, Some(types.as_slice()));
        assert_eq!(unknown, vec!["jpeg"]);
        assert_eq!(enabled_formats(&cfg), vec!["fds"]);
    }

    #[test]
    fn no_filter_keeps_defaults() {
        let mut cfg = load_config(None).unwrap().config;
        assert!(filter_formats(&mut cfg, None).is_empty());
        assert_eq!(enabled_formats(&cfg), vec!["dir", "gct", "tar"]);
    }

    #[test]
    fn output_dir_is_created_and_probed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out");
        ensure_output_dir(&out).unwrap();
        assert!(out.is_dir());
        assert!(!out.join(".sectorcarve_write_probe").exists());

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_output_dir(&file).is_err());
    }
}
