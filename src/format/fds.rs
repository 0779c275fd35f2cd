//! fwNES disk image with its 16-byte header.
//!
//! The header carries the number of disk sides; each side is a fixed
//! 65500 bytes.

use std::sync::Arc;

use crate::candidate::{CandidateFile, CheckStrategy};
use crate::format::{DEFAULT_MAX_FILESIZE, FormatDescriptor, FormatRole};
use crate::registry::{HeaderValidator, RegistryBuilder, RegistryError};

const FDS_MAGIC: [u8; 4] = [b'F', b'D', b'S', 0x1A];
const FDS_HEADER_SIZE: u64 = 16;
const FDS_SIDE_SIZE: u64 = 65500;
const SIDES_OFFSET: usize = 4;

pub static FDS: FormatDescriptor = FormatDescriptor {
    id: "fds",
    extension: "fds",
    description: "fwNES Disk Image (with header)",
    max_filesize: DEFAULT_MAX_FILESIZE,
    recover: true,
    enable_by_default: false,
    role: FormatRole::Plain,
    register: register_fds,
};

fn register_fds(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(0, &FDS_MAGIC, &FDS, Arc::new(FdsHeader))
}

pub struct FdsHeader;

impl HeaderValidator for FdsHeader {
    fn validate(
        &self,
        window: &[u8],
        _safe_header_only: bool,
        _current: Option<&CandidateFile>,
        new: &mut CandidateFile,
    ) -> bool {
        let Some(&sides) = window.get(SIDES_OFFSET) else {
            return false;
        };
        new.reset();
        new.set_extension(FDS.extension);
        new.min_size = FDS_HEADER_SIZE;
        new.calculated_size = Some(FDS_HEADER_SIZE + u64::from(sides) * FDS_SIDE_SIZE);
        new.strategy = CheckStrategy::Size;
        true
    }
}
