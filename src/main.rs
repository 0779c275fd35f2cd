use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use sectorcarve::sink::{DirSinkFactory, NullSinkFactory, SinkFactory};
use sectorcarve::{cli, config, evidence, format, logging, metadata, scan, util};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_json);

    if cli_opts.list_formats {
        for f in format::builtin_formats() {
            println!(
                "{:<5} {:<5} default={:<5} recover={:<5} {}",
                f.id, f.extension, f.enable_by_default, f.recover, f.description
            );
        }
        return Ok(());
    }

    let Some(input) = cli_opts.input.clone() else {
        bail!("--input is required");
    };

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    cfg.verbose = cfg.verbose.max(cli_opts.verbose);
    cfg.paranoid |= cli_opts.paranoid;
    cfg.keep_bad |= cli_opts.keep_bad;
    if let Some(block_size) = cli_opts.block_size {
        cfg.block_size = block_size;
    }
    cfg.validate().context("invalid configuration")?;

    let unknown_types = util::filter_formats(&mut cfg, cli_opts.types.as_deref());
    for unknown in unknown_types {
        warn!("unknown format in --types: {unknown}");
    }
    let enabled = util::enabled_formats(&cfg);
    if enabled.is_empty() {
        bail!("no formats enabled");
    }

    let run_output_dir = cli_opts.output.join(&cfg.run_id);
    if !cli_opts.dry_run {
        util::ensure_output_dir(&run_output_dir)?;
    }

    let tool_version = env!("CARGO_PKG_VERSION");

    info!(
        "starting run_id={} input={} output={} formats={} block={}",
        cfg.run_id,
        input.display(),
        run_output_dir.display(),
        enabled.join(","),
        cfg.block_size
    );

    let evidence_source = evidence::open_source(&input)
        .with_context(|| format!("opening {}", input.display()))?;

    if cli_opts.evidence_sha256.is_some() && cli_opts.compute_evidence_sha256 {
        bail!("set either --evidence-sha256 or --compute-evidence-sha256, not both");
    }

    let evidence_sha256 = if let Some(hash) = cli_opts.evidence_sha256.as_ref() {
        hash.trim().to_string()
    } else if cli_opts.compute_evidence_sha256 {
        info!("computing evidence sha256 (full pass)");
        let hash = evidence::compute_sha256(evidence_source.as_ref(), 8 * 1024 * 1024)?;
        info!("evidence sha256={hash}");
        hash
    } else {
        String::new()
    };

    let meta_sink: Box<dyn metadata::MetadataSink>;
    let sinks: Arc<dyn SinkFactory>;
    if cli_opts.dry_run {
        info!("dry run: no files or metadata will be written");
        meta_sink = metadata::build_dry_run_sink();
        sinks = Arc::new(NullSinkFactory);
    } else {
        meta_sink = metadata::build_sink(
            &cfg.run_id,
            tool_version,
            &loaded.config_hash,
            &input,
            &evidence_sha256,
            &run_output_dir,
        )?;
        sinks = Arc::new(DirSinkFactory::new(&run_output_dir));
    }

    let registry = Arc::new(format::build_registry(&cfg)?);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl-C handler")?;
    }

    let summary = scan::run_scan(
        &cfg,
        evidence_source.as_ref(),
        registry,
        sinks,
        meta_sink.as_ref(),
        &cancel,
    )?;

    if summary.cancelled {
        warn!("run cancelled after {} bytes", summary.bytes_scanned);
    }
    info!(
        "sectorcarve run finished: {} files carved, {} bytes scanned",
        summary.files_carved(),
        summary.bytes_scanned
    );
    Ok(())
}
