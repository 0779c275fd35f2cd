//! POSIX/GNU tar archives.
//!
//! TAR archives consist of 512-byte headers followed by file data, padded
//! to 512 bytes. The archive ends with two consecutive zero blocks. While a
//! tar candidate is open its member payloads must not be mistaken for new
//! files, so the format acts as a streamed archive with its own
//! continuation check.

use std::sync::Arc;

use crate::candidate::{CandidateFile, CheckStrategy, ContentCheck, DataVerdict};
use crate::format::{ContinuationCheck, DEFAULT_MAX_FILESIZE, FormatDescriptor, FormatRole};
use crate::registry::{HeaderValidator, RegistryBuilder, RegistryError};

pub const TAR_BLOCK_SIZE: usize = 512;
const TAR_USTAR_OFFSET: usize = 257;
const TAR_USTAR_MAGIC: &[u8; 5] = b"ustar";
const SIZE_FIELD: std::ops::Range<usize> = 124..136;
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

pub static TAR: FormatDescriptor = FormatDescriptor {
    id: "tar",
    extension: "tar",
    description: "tar archive",
    max_filesize: DEFAULT_MAX_FILESIZE,
    recover: true,
    enable_by_default: true,
    role: FormatRole::StreamedArchive(&TarContinuation),
    register: register_tar,
};

fn register_tar(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(TAR_USTAR_OFFSET, TAR_USTAR_MAGIC, &TAR, Arc::new(TarHeader))
}

pub struct TarHeader;

impl HeaderValidator for TarHeader {
    fn validate(
        &self,
        window: &[u8],
        _safe_header_only: bool,
        _current: Option<&CandidateFile>,
        new: &mut CandidateFile,
    ) -> bool {
        if window.len() < TAR_BLOCK_SIZE || !is_tar_header(&window[..TAR_BLOCK_SIZE]) {
            return false;
        }
        new.reset();
        new.set_extension(TAR.extension);
        new.min_size = TAR_BLOCK_SIZE as u64;
        new.strategy = CheckStrategy::Custom(Box::new(TarStream::default()));
        true
    }
}

pub struct TarContinuation;

impl ContinuationCheck for TarContinuation {
    fn accepts(
        &self,
        window: &[u8],
        previous_block: Option<&[u8]>,
        current: &CandidateFile,
    ) -> bool {
        if let CheckStrategy::Custom(check) = &current.strategy {
            if check.in_payload() {
                return true;
            }
        }
        if window.len() >= TAR_BLOCK_SIZE {
            let block = &window[..TAR_BLOCK_SIZE];
            if is_zero_block(block) || is_tar_header(block) {
                return true;
            }
        }
        // Once the stream has seen the header it knows whether a payload
        // follows; the lookbehind only speaks for a stream fed nothing yet.
        current.written() == 0
            && previous_block
                .filter(|prev| prev.len() >= TAR_BLOCK_SIZE)
                .is_some_and(|prev| is_tar_header(&prev[..TAR_BLOCK_SIZE]))
    }
}

/// Follows member headers and payloads as bytes are appended.
#[derive(Debug, Default)]
pub struct TarStream {
    header: Vec<u8>,
    payload_left: u64,
    zero_blocks: u8,
    members: u64,
}

impl TarStream {
    pub fn members(&self) -> u64 {
        self.members
    }
}

impl ContentCheck for TarStream {
    fn check_data(&mut self, block: &[u8]) -> DataVerdict {
        let mut pos = 0usize;
        while pos < block.len() {
            if self.payload_left > 0 {
                let available = (block.len() - pos) as u64;
                let n = available.min(self.payload_left);
                self.payload_left -= n;
                pos += n as usize;
                continue;
            }

            // A header split across blocks cannot be cut before this block.
            let record_start = if self.header.is_empty() { pos } else { 0 };
            let n = (TAR_BLOCK_SIZE - self.header.len()).min(block.len() - pos);
            self.header.extend_from_slice(&block[pos..pos + n]);
            pos += n;
            if self.header.len() < TAR_BLOCK_SIZE {
                break;
            }

            if is_zero_block(&self.header) {
                self.header.clear();
                self.zero_blocks += 1;
                if self.zero_blocks >= 2 {
                    return DataVerdict::EndsAt(pos);
                }
                continue;
            }

            let payload = member_payload(&self.header);
            self.header.clear();
            match payload {
                Some(size) if self.zero_blocks == 0 => {
                    self.members += 1;
                    self.payload_left = size.div_ceil(TAR_BLOCK_SIZE as u64)
                        .saturating_mul(TAR_BLOCK_SIZE as u64);
                }
                _ => return DataVerdict::EndsAt(record_start),
            }
        }
        DataVerdict::Continue
    }

    fn check_file(&self, written: u64) -> bool {
        self.members > 0 && written >= TAR_BLOCK_SIZE as u64
    }

    fn in_payload(&self) -> bool {
        self.payload_left > 0
    }
}

fn member_payload(header: &[u8]) -> Option<u64> {
    if !is_tar_header(header) {
        return None;
    }
    parse_octal(&header[SIZE_FIELD]).ok()
}

pub fn is_tar_header(block: &[u8]) -> bool {
    block.len() >= TAR_BLOCK_SIZE
        && block[0] != 0
        && !is_zero_block(block)
        && validate_checksum(block).unwrap_or(false)
        && parse_octal(&block[SIZE_FIELD]).is_ok()
}

fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0)
}

#[derive(Debug)]
struct BadOctal;

fn parse_octal(field: &[u8]) -> Result<u64, BadOctal> {
    let mut value = 0u64;
    let mut seen = false;
    for &b in field {
        if b == 0 || b == b' ' || b == b'\n' {
            if seen {
                break;
            }
            continue;
        }
        if !(b'0'..=b'7').contains(&b) {
            return Err(BadOctal);
        }
        seen = true;
        value = value.saturating_mul(8).saturating_add((b - b'0') as u64);
    }
    Ok(value)
}

fn validate_checksum(header: &[u8]) -> Result<bool, BadOctal> {
    if header.len() < TAR_BLOCK_SIZE {
        return Ok(false);
    }
    let stored = parse_octal(&header[CHECKSUM_FIELD])? as u32;
    let mut sum = 0u32;
    for (idx, &b) in header[..TAR_BLOCK_SIZE].iter().enumerate() {
        if CHECKSUM_FIELD.contains(&idx) {
            sum = sum.saturating_add(0x20);
        } else {
            sum = sum.saturating_add(b as u32);
        }
    }
    Ok(sum == stored)
}

/// Build a ustar header for `name` with a payload of `size` bytes.
#[cfg(test)]
pub(crate) fn build_header(name: &str, size: u64) -> Vec<u8> {
    let mut header = vec![0u8; TAR_BLOCK_SIZE];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[100..108].copy_from_slice(b"0000644\0");
    header[108..116].copy_from_slice(b"0000000\0");
    header[116..124].copy_from_slice(b"0000000\0");
    header[124..136].copy_from_slice(format!("{:011o}\0", size).as_bytes());
    header[136..148].copy_from_slice(b"00000000000\0");
    header[156] = b'0';
    header[257..262].copy_from_slice(b"ustar");
    header[263..265].copy_from_slice(b"00");

    let mut sum = 0u32;
    for (idx, &b) in header.iter().enumerate() {
        if CHECKSUM_FIELD.contains(&idx) {
            sum = sum.saturating_add(0x20);
        } else {
            sum = sum.saturating_add(b as u32);
        }
    }
    header[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
    header
}

/// A one-member archive: header, payload padded to a block, two zero blocks.
#[cfg(test)]
pub(crate) fn build_archive(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut tar = build_header(name, payload.len() as u64);
    tar.extend_from_slice(payload);
    let padded = payload.len().div_ceil(TAR_BLOCK_SIZE) * TAR_BLOCK_SIZE;
    tar.resize(TAR_BLOCK_SIZE + padded, 0);
    tar.extend_from_slice(&[0u8; 2 * TAR_BLOCK_SIZE]);
    tar
}
