//! FAT directory clusters.
//!
//! A subdirectory cluster starts with the `.` and `..` entries. Such blocks
//! are never worth recovering as files, but matching them lets the carver
//! skip over them and, when verbose, list their entries.

use std::sync::Arc;

use crate::candidate::{CandidateFile, CheckStrategy, ContentCheck, DataVerdict};
use crate::format::{DEFAULT_MAX_FILESIZE, DirectoryDecoder, FormatDescriptor, FormatRole};
use crate::listing::DirEntryRecord;
use crate::registry::{HeaderValidator, RegistryBuilder, RegistryError};

const ENTRY_SIZE: usize = 32;
const DOT_ENTRY: &[u8; 11] = b".          ";
const DOTDOT_ENTRY: &[u8; 11] = b"..         ";
const ATTR_OFFSET: usize = 11;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = 0x0F;
const ATTR_RESERVED: u8 = 0xC0;
const DELETED_MARK: u8 = 0xE5;

/// Long-name fragments are marked by the low six attribute bits alone.
fn is_long_name(attributes: u8) -> bool {
    attributes & 0x3F == ATTR_LFN
}

pub static DIR: FormatDescriptor = FormatDescriptor {
    id: "dir",
    extension: "dir",
    description: "FAT subdirectory",
    max_filesize: DEFAULT_MAX_FILESIZE,
    recover: false,
    enable_by_default: true,
    role: FormatRole::DirectoryListing(&FatDirDecoder),
    register: register_dir,
};

fn register_dir(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(0, DOT_ENTRY, &DIR, Arc::new(FatDirHeader))
}

pub struct FatDirHeader;

impl HeaderValidator for FatDirHeader {
    fn validate(
        &self,
        window: &[u8],
        _safe_header_only: bool,
        _current: Option<&CandidateFile>,
        new: &mut CandidateFile,
    ) -> bool {
        if window.len() < 2 * ENTRY_SIZE {
            return false;
        }
        let dot = &window[..ENTRY_SIZE];
        let dotdot = &window[ENTRY_SIZE..2 * ENTRY_SIZE];
        if &dot[..11] != DOT_ENTRY || &dotdot[..11] != DOTDOT_ENTRY {
            return false;
        }
        if dot[ATTR_OFFSET] & ATTR_DIRECTORY == 0 || dotdot[ATTR_OFFSET] & ATTR_DIRECTORY == 0 {
            return false;
        }
        new.reset();
        new.set_extension(DIR.extension);
        new.min_size = (2 * ENTRY_SIZE) as u64;
        new.strategy = CheckStrategy::Custom(Box::new(FatDirCheck::default()));
        true
    }
}

/// Walks 32-byte entries until the end-of-directory marker or garbage.
#[derive(Debug, Default)]
pub struct FatDirCheck {
    carry: Vec<u8>,
    entries: u64,
}

impl ContentCheck for FatDirCheck {
    fn check_data(&mut self, block: &[u8]) -> DataVerdict {
        let mut pos = 0usize;
        while pos < block.len() {
            let entry_start = if self.carry.is_empty() { pos } else { 0 };
            let n = (ENTRY_SIZE - self.carry.len()).min(block.len() - pos);
            self.carry.extend_from_slice(&block[pos..pos + n]);
            pos += n;
            if self.carry.len() < ENTRY_SIZE {
                break;
            }
            let first = self.carry[0];
            let attr = self.carry[ATTR_OFFSET];
            self.carry.clear();

            if first == 0 {
                // rest of the block belongs to the cluster
                return DataVerdict::EndsAt(block.len());
            }
            if !is_long_name(attr) && attr & ATTR_RESERVED != 0 {
                return DataVerdict::EndsAt(entry_start);
            }
            self.entries += 1;
        }
        DataVerdict::Continue
    }

    fn check_file(&self, written: u64) -> bool {
        self.entries >= 2 && written >= (2 * ENTRY_SIZE) as u64
    }
}

pub struct FatDirDecoder;

impl DirectoryDecoder for FatDirDecoder {
    fn entries<'w>(&self, window: &'w [u8]) -> Box<dyn Iterator<Item = DirEntryRecord> + 'w> {
        Box::new(FatDirEntries::new(window))
    }
}

/// Lazily decodes live short-name entries of a directory block.
pub struct FatDirEntries<'w> {
    window: &'w [u8],
    pos: usize,
}

impl<'w> FatDirEntries<'w> {
    pub fn new(window: &'w [u8]) -> Self {
        Self { window, pos: 0 }
    }
}

impl Iterator for FatDirEntries<'_> {
    type Item = DirEntryRecord;

    fn next(&mut self) -> Option<DirEntryRecord> {
        while self.pos + ENTRY_SIZE <= self.window.len() {
            let entry = &self.window[self.pos..self.pos + ENTRY_SIZE];
            self.pos += ENTRY_SIZE;
            if entry[0] == 0 {
                self.pos = self.window.len();
                return None;
            }
            let attributes = entry[ATTR_OFFSET];
            if entry[0] == DELETED_MARK || is_long_name(attributes) {
                continue;
            }
            let size = u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]);
            return Some(DirEntryRecord {
                name: short_name(entry),
                size,
                attributes,
            });
        }
        None
    }
}

fn short_name(entry: &[u8]) -> String {
    let mut base = entry[..8].to_vec();
    // 0x05 stands for a leading 0xE5 byte in the real name
    if base[0] == 0x05 {
        base[0] = DELETED_MARK;
    }
    let base = String::from_utf8_lossy(&base).trim_end().to_string();
    let ext = String::from_utf8_lossy(&entry[8..11]).trim_end().to_string();
    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

#[cfg(test)]
pub(crate) fn dir_entry(name: &[u8; 11], attributes: u8, size: u32) -> [u8; ENTRY_SIZE] {
    let mut entry = [0u8; ENTRY_SIZE];
    entry[..11].copy_from_slice(name);
    entry[ATTR_OFFSET] = attributes;
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

/// A 512-byte subdirectory block with one file, one deleted entry and one
/// long-name fragment.
#[cfg(test)]
pub(crate) fn sample_dir_block() -> Vec<u8> {
    let mut block = Vec::with_capacity(512);
    block.extend_from_slice(&dir_entry(DOT_ENTRY, ATTR_DIRECTORY, 0));
    block.extend_from_slice(&dir_entry(DOTDOT_ENTRY, ATTR_DIRECTORY, 0));
    block.extend_from_slice(&dir_entry(b"\xE5ONE    TXT", 0x20, 7));
    block.extend_from_slice(&dir_entry(b"Aa\0b\0c\0d\0e\0", ATTR_LFN, 0));
    block.extend_from_slice(&dir_entry(b"REPORT  PDF", 0x20, 1234));
    block.resize(512, 0);
    block
}
