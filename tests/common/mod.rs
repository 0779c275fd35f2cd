//! Shared test infrastructure for scan tests.
//!
//! Builds small disk images in memory, runs the full scan driver over them
//! with the JSONL metadata backend and reads the results back.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;

use sectorcarve::config::{self, Config};
use sectorcarve::evidence::RawFileSource;
use sectorcarve::format;
use sectorcarve::metadata::{self, RunSummary};
use sectorcarve::scan;
use sectorcarve::sink::DirSinkFactory;

// ============================================================================
// Image builders
// ============================================================================

pub fn insert_bytes(target: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if end > target.len() {
        target.resize(end, 0u8);
    }
    target[offset..end].copy_from_slice(data);
}

/// Non-zero filler that contains none of the built-in signatures.
pub fn filler(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u32 * 7 + seed as u32) % 200) as u8 + 40)
        .collect()
}

pub fn gct_image() -> Vec<u8> {
    let mut gct = filler(2416, 3);
    gct[..9].copy_from_slice(b"JLGEN2XFI");
    gct
}

pub fn fds_image(sides: u8) -> Vec<u8> {
    let mut fds = filler(16 + sides as usize * 65500, 11);
    fds[..5].copy_from_slice(&[b'F', b'D', b'S', 0x1A, sides]);
    fds[5..16].fill(0);
    fds
}

pub fn tar_header(name: &str, size: u64) -> Vec<u8> {
    let mut header = vec![0u8; 512];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[100..108].copy_from_slice(b"0000644\0");
    header[108..116].copy_from_slice(b"0000000\0");
    header[116..124].copy_from_slice(b"0000000\0");
    header[124..136].copy_from_slice(format!("{:011o}\0", size).as_bytes());
    header[136..148].copy_from_slice(b"00000000000\0");
    header[156] = b'0';
    header[257..262].copy_from_slice(b"ustar");
    header[263..265].copy_from_slice(b"00");
    header[148..156].fill(b' ');
    let sum: u32 = header.iter().map(|b| *b as u32).sum();
    header[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
    header
}

pub fn tar_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar = Vec::new();
    for (name, payload) in members {
        tar.extend_from_slice(&tar_header(name, payload.len() as u64));
        tar.extend_from_slice(payload);
        let padded = payload.len().div_ceil(512) * 512;
        tar.resize(tar.len() + padded - payload.len(), 0);
    }
    tar.extend_from_slice(&[0u8; 1024]);
    tar
}

fn dir_entry(name: &[u8; 11], attributes: u8, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(name);
    entry[11] = attributes;
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

pub fn fat_dir_block() -> Vec<u8> {
    let mut block = Vec::with_capacity(512);
    block.extend_from_slice(&dir_entry(b".          ", 0x10, 0));
    block.extend_from_slice(&dir_entry(b"..         ", 0x10, 0));
    block.extend_from_slice(&dir_entry(b"NOTES   TXT", 0x20, 99));
    block.resize(512, 0);
    block
}

// ============================================================================
// Scan runner
// ============================================================================

pub struct ScanRun {
    _temp_dir: tempfile::TempDir,
    pub run_output_dir: PathBuf,
    pub summary: RunSummary,
    pub records: Vec<Value>,
}

impl ScanRun {
    pub fn of_type(&self, file_type: &str) -> Vec<&Value> {
        self.records
            .iter()
            .filter(|r| r.get("file_type").and_then(|v| v.as_str()) == Some(file_type))
            .collect()
    }

    pub fn carved_bytes(&self, record: &Value) -> Vec<u8> {
        let path = record["path"].as_str().expect("path");
        fs::read(self.run_output_dir.join(path)).expect("carved file")
    }
}

pub fn run_scan_with_bytes(bytes: Vec<u8>, configure: impl FnOnce(&mut Config)) -> ScanRun {
    run_scan_with_cancel(bytes, configure, false)
}

pub fn run_scan_with_cancel(
    bytes: Vec<u8>,
    configure: impl FnOnce(&mut Config),
    cancelled: bool,
) -> ScanRun {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let input_path = temp_dir.path().join("input.bin");
    fs::write(&input_path, bytes).expect("write input");

    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.run_id = "scan_test".to_string();
    cfg.retry_delays_ms = Some(vec![0]);
    configure(&mut cfg);
    cfg.validate().expect("valid config");

    let evidence = RawFileSource::open(&input_path).expect("evidence");

    let run_output_dir = temp_dir.path().join("run");
    fs::create_dir_all(&run_output_dir).expect("output dir");

    let meta_sink = metadata::build_sink(
        &cfg.run_id,
        env!("CARGO_PKG_VERSION"),
        &loaded.config_hash,
        &input_path,
        "",
        &run_output_dir,
    )
    .expect("metadata sink");

    let registry = Arc::new(format::build_registry(&cfg).expect("registry"));
    let cancel = AtomicBool::new(cancelled);

    let summary = scan::run_scan(
        &cfg,
        &evidence,
        registry,
        Arc::new(DirSinkFactory::new(&run_output_dir)),
        meta_sink.as_ref(),
        &cancel,
    )
    .expect("scan");

    let meta_path = run_output_dir.join("metadata").join("carved_files.jsonl");
    let content = fs::read_to_string(meta_path).expect("metadata read");
    let records = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json"))
        .collect();

    ScanRun {
        _temp_dir: temp_dir,
        run_output_dir,
        summary,
        records,
    }
}
