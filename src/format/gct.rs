//! XFI electronic fuel injection configuration image; always 2416 bytes.

use std::sync::Arc;

use crate::candidate::{CandidateFile, CheckStrategy};
use crate::format::{DEFAULT_MAX_FILESIZE, FormatDescriptor, FormatRole};
use crate::registry::{HeaderValidator, RegistryBuilder, RegistryError};

const GCT_MAGIC: &[u8; 9] = b"JLGEN2XFI";
const GCT_SIZE: u64 = 2416;

pub static GCT: FormatDescriptor = FormatDescriptor {
    id: "gct",
    extension: "gct",
    description: "XFI Electronic Fuel Injection Systems",
    max_filesize: DEFAULT_MAX_FILESIZE,
    recover: true,
    enable_by_default: true,
    role: FormatRole::Plain,
    register: register_gct,
};

fn register_gct(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(0, GCT_MAGIC, &GCT, Arc::new(GctHeader))
}

pub struct GctHeader;

impl HeaderValidator for GctHeader {
    fn validate(
        &self,
        _window: &[u8],
        _safe_header_only: bool,
        _current: Option<&CandidateFile>,
        new: &mut CandidateFile,
    ) -> bool {
        new.reset();
        new.set_extension(GCT.extension);
        new.calculated_size = Some(GCT_SIZE);
        new.strategy = CheckStrategy::Size;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_fixed_regardless_of_content() {
        for filler in [0x00u8, 0xFF, b'J'] {
            let mut window = vec![filler; 4096];
            window[..9].copy_from_slice(GCT_MAGIC);
            let mut new = CandidateFile::new(0);
            assert!(GctHeader.validate(&window, false, None, &mut new));
            assert_eq!(new.calculated_size, Some(2416));
            assert_eq!(new.min_size, 0);
        }
    }

    #[test]
    fn accepts_header_only_window() {
        let mut new = CandidateFile::new(0);
        assert!(GctHeader.validate(GCT_MAGIC, true, None, &mut new));
        assert_eq!(new.extension(), "gct");
    }
}
