//! # sectorcarve
//!
//! Sector-level file carving: a bucketed signature registry, per-format header
//! validators, and the state machine that decides, block by block, whether a
//! new file starts, the open one continues, or the open one is finished.
//!
//! The [`engine::Carver`] is driven one scanned position at a time; the
//! [`scan`] module provides the reference driver that walks an
//! [`evidence::EvidenceSource`] and records finished files.

pub mod candidate;
pub mod chunk;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod evidence;
pub mod format;
pub mod listing;
pub mod logging;
pub mod metadata;
pub mod registry;
pub mod scan;
pub mod sink;
pub mod util;

pub use candidate::{CandidateFile, CheckStrategy};
pub use classify::Classification;
pub use engine::{
    CarvedFile, Carver, CheckOutcome, EngineOptions, EngineStatus, FeedStatus, FinishedFile,
};
pub use registry::{RegistryBuilder, SignatureEntry, SignatureRegistry};
