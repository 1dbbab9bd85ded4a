//! `statcollector` binary: loads a configuration document, wires a
//! Dispatcher with the built-in drivers, and drives it until SIGINT/SIGTERM
//! (`spec.md §6.4`, `SPEC_FULL.md` §2/§6.4a "ADDED").
//!
//! Configuration-file loading mechanics, full logging setup, and
//! daemonization are explicitly out of `spec.md`'s scope (§1) beyond the
//! minimal wiring needed to make this workspace a runnable program.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{error, info};
use serde::Deserialize;
use statcollector_core::Dispatcher;
use statcollector_types::config::{self, FilterConfig, ParserConfig, SourceConfig, StorageConfig};

/// Host telemetry collection agent.
#[derive(Parser)]
#[clap(version, author, about = "Sources, parsers, filters and storages glued by a single-threaded dispatcher")]
struct Opts {
    /// Path to the YAML configuration document.
    #[clap(long, default_value = "statcollector.yaml")]
    config: String,

    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Either an inline fragment or a glob/directory pattern resolved at load
/// time (`spec.md §6.3`: "may alternatively point to a filesystem glob or
/// directory; each matched file is loaded as one fragment").
#[derive(Deserialize)]
#[serde(untagged)]
enum FragmentSource<T> {
    Inline(T),
    Glob(String),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RootConfig {
    parsers: Vec<FragmentSource<ParserConfig>>,
    filters: Vec<FragmentSource<FilterConfig>>,
    storages: Vec<FragmentSource<StorageConfig>>,
    sources: Vec<FragmentSource<SourceConfig>>,
}

/// Expands every [`FragmentSource`] in `entries` into concrete fragments,
/// reading glob matches from disk and parsing each as a standalone
/// configuration fragment (`spec.md §6.3`).
fn resolve<T>(entries: Vec<FragmentSource<T>>, name_default: impl Fn(&mut T, &Path)) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            FragmentSource::Inline(value) => resolved.push(value),
            FragmentSource::Glob(pattern) => {
                let mut paths: Vec<_> = glob::glob(&pattern)
                    .with_context(|| format!("invalid glob pattern `{pattern}`"))?
                    .filter_map(Result::ok)
                    .collect();
                paths.sort();
                if paths.is_empty() {
                    log::warn!("glob pattern `{pattern}` matched no files");
                }
                for path in paths {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading fragment {}", path.display()))?;
                    let mut value: T = config::parse_fragment(&raw, &path.to_string_lossy())?;
                    name_default(&mut value, &path);
                    resolved.push(value);
                }
            }
        }
    }
    Ok(resolved)
}

fn load_config(path: &str) -> Result<RootConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading configuration file {path}"))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing configuration file {path}"))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(opts: Opts) -> Result<()> {
    let root = load_config(&opts.config)?;

    let parsers = resolve(root.parsers, |_cfg: &mut ParserConfig, _path| {})?;
    let filters = resolve(root.filters, |_cfg: &mut FilterConfig, _path| {})?;
    let storages = resolve(root.storages, |cfg: &mut StorageConfig, path| {
        if cfg.name.is_empty() {
            if let Some(name) = config::name_from_path(path) {
                cfg.name = name;
            }
        }
    })?;
    let sources = resolve(root.sources, |cfg: &mut SourceConfig, path| {
        if cfg.name.is_none() {
            cfg.name = config::name_from_path(path);
        }
    })?;

    let mut parser_factory = statcollector_core::ParserFactory::new("parser");
    statcollector_drivers::register_builtin_parsers(&mut parser_factory);
    let mut filter_factory = statcollector_core::FilterFactory::new("filter");
    statcollector_drivers::register_builtin_filters(&mut filter_factory);
    let mut storage_factory = statcollector_core::StorageFactory::new("storage");
    statcollector_drivers::register_builtin_storages(&mut storage_factory);
    let mut source_factory = statcollector_core::SourceFactory::new("source");
    statcollector_drivers::register_builtin_sources(&mut source_factory);

    let dispatcher = Dispatcher::new(parser_factory, filter_factory, storage_factory, source_factory)
        .context("constructing dispatcher")?;

    for cfg in parsers {
        let name = cfg.name.clone();
        if let Err(err) = dispatcher.register_parser(cfg) {
            error!("failed to register parser `{name}`: {err}");
        }
    }
    for cfg in filters {
        let name = cfg.name.clone();
        if let Err(err) = dispatcher.register_filter(cfg) {
            error!("failed to register filter `{name}`: {err}");
        }
    }
    for cfg in storages {
        let name = cfg.name.clone();
        if let Err(err) = dispatcher.register_storage(cfg) {
            error!("failed to register storage `{name}`: {err}");
        }
    }
    // Storages must exist before Sources start fetching, since a Source's
    // first fetch can land before `register_source` returns (spec.md §4.1).
    dispatcher.check_has_storages().context("no storages registered at end of initialization")?;
    for cfg in sources {
        let name = cfg.name.clone().unwrap_or_default();
        if let Err(err) = dispatcher.register_source(cfg) {
            error!("failed to register source `{name}`: {err}");
        }
    }

    info!(
        "statcollector running with {} storage(s); awaiting shutdown signal",
        dispatcher.storage_names().len()
    );
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining pipeline");
    dispatcher.shutdown();

    // Give in-flight deferral writes a moment to land on disk before exit.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}

/// Waits for SIGINT (`ctrl_c`) or, on unix, SIGTERM — either is the
/// external "shutdown" signal of `spec.md §6.4`.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(opts))
}
