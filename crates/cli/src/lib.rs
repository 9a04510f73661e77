use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pageflow_core::cache::{Collection, EngineConfig, FileListResolver, ImageDecoder};
use pageflow_core::scheduler::QueueStatus;
use pageflow_core::PrefetchEngine;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pageflow")]
#[command(about = "Prefetch and decode cache engine")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the effective engine configuration as JSON.
    Config {
        /// Read the configuration from this file instead of the environment.
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
        /// Also save the effective configuration to this file.
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,
    },
    /// Simulate reading a directory of images and report the cache state.
    Simulate {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        /// Focus indices visited in order.
        #[arg(long = "focus", value_name = "INDEX", default_value = "0")]
        focus: Vec<usize>,
        /// Visible grid range, as START:END.
        #[arg(long, value_name = "START:END", value_parser = parse_range)]
        visible: Option<(usize, usize)>,
        /// Time to let work settle after each step.
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
        /// Read the configuration from this file instead of the environment.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    directory: String,
    items: usize,
    queue: QueueStatus,
    cached_indices: Vec<usize>,
    pooled: usize,
    thumbnail_batch: Option<Vec<usize>>,
    cache: CacheReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheReport {
    capacity: usize,
    hits: u64,
    misses: u64,
    decodes: u64,
    failures: u64,
    evictions: u64,
    discarded: u64,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Config { file, write } => run_config(file.as_deref(), write.as_deref()),
        Commands::Simulate { dir, focus, visible, settle_ms, config } => {
            let config = load_config(config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let report = runtime.block_on(simulate(
                &dir,
                config,
                &focus,
                visible,
                Duration::from_millis(settle_ms),
            ))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(file: Option<&Path>) -> Result<EngineConfig> {
    match file {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => EngineConfig::from_env().context("invalid configuration in environment"),
    }
}

fn run_config(file: Option<&Path>, write: Option<&Path>) -> Result<()> {
    let config = load_config(file)?;

    if let Some(path) = write {
        config
            .save_to_file(path)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn parse_range(value: &str) -> Result<(usize, usize), String> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got `{value}`"))?;
    let start = start.trim().parse().map_err(|_| format!("invalid start `{start}`"))?;
    let end = end.trim().parse().map_err(|_| format!("invalid end `{end}`"))?;
    Ok((start, end))
}

/// Directory entries sorted by name; subdirectories get a trailing `/`
fn list_entries(dir: &Path) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to list directory {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut paths = Vec::with_capacity(entries.len());
    let mut names = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        paths.push(entry.path());
        names.push(name);
    }
    Ok((paths, names))
}

async fn simulate(
    dir: &Path,
    config: EngineConfig,
    focus: &[usize],
    visible: Option<(usize, usize)>,
    settle: Duration,
) -> Result<SimulationReport> {
    let (paths, names) = list_entries(dir)?;
    let items = paths.len();

    let engine = PrefetchEngine::new(Arc::new(FileListResolver::new(paths)), Arc::new(ImageDecoder), config)
        .context("invalid engine configuration")?;
    engine.open_collection(Collection::from_entries(dir.display().to_string(), &names));

    for &index in focus {
        if index >= items {
            anyhow::bail!("focus index {index} is outside the directory ({items} entries)");
        }
        engine.notify_focus(index);
        tokio::time::sleep(settle).await;
    }

    if let Some((start, end)) = visible {
        engine.notify_visible_range(start, end);
        tokio::time::sleep(settle).await;
    }

    let stats = engine.cache_stats();
    let mut cached_indices = engine.cache().cached_indices();
    cached_indices.sort_unstable();

    Ok(SimulationReport {
        directory: dir.display().to_string(),
        items,
        queue: engine.queue_status(),
        cached_indices,
        pooled: engine.pool().len(),
        thumbnail_batch: engine.last_thumbnail_batch().map(|batch| batch.indices()),
        cache: CacheReport {
            capacity: stats.capacity,
            hits: stats.hits,
            misses: stats.misses,
            decodes: stats.decodes,
            failures: stats.failures,
            evictions: stats.evictions,
            discarded: stats.discarded,
        },
    })
}
