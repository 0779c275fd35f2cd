//! Directory listings reconstructed from carved directory blocks.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryRecord {
    pub name: String,
    pub size: u32,
    pub attributes: u8,
}

impl DirEntryRecord {
    pub fn is_directory(&self) -> bool {
        self.attributes & 0x10 != 0
    }
}

/// Receives the entries of a directory block found at `offset`.
pub trait ListingReporter: Send {
    fn report(&mut self, offset: u64, entries: &mut dyn Iterator<Item = DirEntryRecord>);
}

/// Writes each entry to the log.
#[derive(Debug, Default)]
pub struct TracingListing;

impl ListingReporter for TracingListing {
    fn report(&mut self, offset: u64, entries: &mut dyn Iterator<Item = DirEntryRecord>) {
        info!("directory at offset {offset}");
        for entry in entries {
            let kind = if entry.is_directory() { "dir " } else { "file" };
            info!(
                "  {kind} {:<12} {:>10} attr=0x{:02x}",
                entry.name, entry.size, entry.attributes
            );
        }
    }
}

/// Keeps every reported listing in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingListing {
    listings: Arc<Mutex<Vec<(u64, Vec<DirEntryRecord>)>>>,
}

impl CollectingListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listings(&self) -> Vec<(u64, Vec<DirEntryRecord>)> {
        self.listings.lock().unwrap().clone()
    }
}

impl ListingReporter for CollectingListing {
    fn report(&mut self, offset: u64, entries: &mut dyn Iterator<Item = DirEntryRecord>) {
        let collected: Vec<_> = entries.collect();
        self.listings.lock().unwrap().push((offset, collected));
    }
}
