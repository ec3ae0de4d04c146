//! Main entry point for the zipshrink CLI application.
//!
//! Publishing side: `shrink` and `diff`. Consuming side: `fetch` (download
//! then repack) and `repack` (local blocks only).

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use zipshrink::cli::{Command, DiffArgs, FetchArgs, RepackArgs, ShrinkArgs};
use zipshrink::codec::{RepackSummary, ResourceLocator};
use zipshrink::diff::ChangeKind;
use zipshrink::io::{is_http_url, origin_of};
use zipshrink::{
    BlockSource, BlockStore, Cli, DownloadConfig, Downloader, HttpBlockSource, LocalBlockSource,
    Repacker, ShrinkConfig, ShrinkError, Shrinker,
};

/// Exit status for a reconstructed stream that does not match its trailer.
const EXIT_INTEGRITY: u8 = 2;
/// Exit status when some blocks could not be downloaded.
const EXIT_DOWNLOAD: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            match e.downcast_ref::<ShrinkError>() {
                Some(ShrinkError::IntegrityMismatch { .. }) => ExitCode::from(EXIT_INTEGRITY),
                Some(ShrinkError::DownloadFailed { .. }) => ExitCode::from(EXIT_DOWNLOAD),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Shrink(args) => shrink(args, cli.is_quiet()),
        Command::Repack(args) => repack(args, cli.is_quiet()),
        Command::Fetch(args) => fetch(args, cli.is_quiet()).await,
        Command::Diff(args) => diff(args),
    }
}

fn shrink(args: &ShrinkArgs, quiet: bool) -> Result<()> {
    let config = ShrinkConfig::new(args.threshold.threshold);
    let archive = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let store = BlockStore::open(&args.blocks)?;

    let mut locators: Vec<ResourceLocator> =
        args.locate.iter().map(ResourceLocator::new).collect();

    let summary = write_atomically(&args.output, |out| {
        Shrinker::new(config)
            .with_store(&store)
            .shrink(&archive, out, locators.as_mut_slice())
    })?;

    if !args.no_verify {
        let stub = fs::read(&args.output)?;
        Repacker::new(config, &store)
            .repack(&stub, &mut std::io::sink())
            .context("stub does not repack to the original archive")?;
    }

    if !quiet {
        println!("origin digest => {}", summary.trailer);
        println!(
            "extracted {} entries ({} new blocks), {} -> {}",
            summary.extracted,
            summary.new_blocks,
            format_size(summary.original_size),
            format_size(summary.stub_size)
        );
        for locator in &locators {
            match locator.block_path(&store) {
                Some(path) => println!("{} => {}", locator.name(), path.display()),
                None => println!("{} => (not extracted)", locator.name()),
            }
        }
    }

    Ok(())
}

fn repack(args: &RepackArgs, quiet: bool) -> Result<()> {
    let config = ShrinkConfig::new(args.threshold.threshold);
    let stub = fs::read(&args.stub)
        .with_context(|| format!("failed to read {}", args.stub.display()))?;
    let store = BlockStore::open(&args.blocks)?;

    let summary = write_atomically(&args.output, |out| Repacker::new(config, &store).repack(&stub, out));
    report_repack(summary, quiet)
}

async fn fetch(args: &FetchArgs, quiet: bool) -> Result<()> {
    let stub = zipshrink::read_archive_source(&args.source)
        .await
        .with_context(|| format!("failed to read stub {}", args.source))?;
    let store = BlockStore::open(&args.cache)?;

    let config = DownloadConfig::default()
        .with_workers(args.jobs)
        .with_max_attempts(args.attempts)
        .with_retry_delay(Duration::from_millis(args.retry_delay_ms));
    let shrink = ShrinkConfig::new(args.threshold.threshold);
    let output = args.output_path();

    let base = match &args.blocks_url {
        Some(base) => base.clone(),
        None if is_http_url(&args.source) => origin_of(&args.source)?,
        None => anyhow::bail!("--blocks-url is required when SOURCE is a local path"),
    };

    if is_http_url(&base) {
        let source = Arc::new(HttpBlockSource::new(base)?);
        fetch_with(source.clone(), store, shrink, config, &stub, &output, quiet).await?;
        if !quiet {
            println!(
                "Total bytes transferred: {}",
                format_size(source.transferred_bytes())
            );
        }
        Ok(())
    } else {
        let source = Arc::new(LocalBlockSource::new(Path::new(&base)));
        fetch_with(source, store, shrink, config, &stub, &output, quiet).await
    }
}

async fn fetch_with<S: BlockSource + 'static>(
    source: Arc<S>,
    store: BlockStore,
    shrink: ShrinkConfig,
    config: DownloadConfig,
    stub: &[u8],
    output: &Path,
    quiet: bool,
) -> Result<()> {
    let downloader = Downloader::new(source, store, shrink, config);

    // Failed blocks are logged one by one before the error surfaces.
    let report = downloader.require_blocks(stub).await?;
    if !quiet {
        println!("{} blocks downloaded", report.downloaded());
        println!("repacking...");
    }

    let summary = write_atomically(output, |out| {
        Repacker::new(shrink, downloader.store()).repack(stub, out)
    });
    report_repack(summary, quiet)?;

    if !quiet {
        println!("all done: {}", output.display());
    }
    Ok(())
}

/// Print both digests of a repack; a mismatch is still reported before it
/// becomes the command's error.
fn report_repack(result: zipshrink::Result<RepackSummary>, quiet: bool) -> Result<()> {
    match result {
        Ok(summary) => {
            if !quiet {
                println!("origin digest => {}", summary.recorded);
                println!("repack digest => {}", summary.computed);
            }
            Ok(())
        }
        Err(ShrinkError::IntegrityMismatch { expected, actual }) => {
            println!("origin digest => {expected}");
            println!("repack digest => {actual}");
            Err(ShrinkError::IntegrityMismatch { expected, actual }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn diff(args: &DiffArgs) -> Result<()> {
    let base = fs::read(&args.base)
        .with_context(|| format!("failed to read {}", args.base.display()))?;
    let target = fs::read(&args.target)
        .with_context(|| format!("failed to read {}", args.target.display()))?;

    let report = zipshrink::diff_archives(&base, &target, ShrinkConfig::new(args.threshold.threshold))?;

    for change in &report.changes {
        let tag = match change.kind {
            ChangeKind::Added => "new ",
            ChangeKind::Modified => "diff",
        };
        println!("{tag} => {}\t{}", change.size, change.name);
    }
    println!("{} => {}", args.base.display(), report.base_digest);
    println!("{} => {}", args.target.display(), report.target_digest);
    println!(
        "{} changed entries, {}",
        report.changes.len(),
        format_size(report.changed_bytes())
    );

    Ok(())
}

/// Run `write` against a temporary file next to `dest` and move it into
/// place only if `write` succeeds.
fn write_atomically<T, F>(dest: &Path, write: F) -> zipshrink::Result<T>
where
    F: FnOnce(&mut dyn Write) -> zipshrink::Result<T>,
{
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let tmp = tempfile::NamedTempFile::new_in(&dir)?;
    let mut out = BufWriter::new(tmp);
    let value = write(&mut out)?;
    let tmp = out.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(value)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
