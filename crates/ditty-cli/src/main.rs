//! ditty CLI - The `ditty` command.
//!
//! Loads loops from a TOML file and streams their start/stop triggers as
//! JSON lines, either live (`ditty run`) or offline (`ditty render`).

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use ditty_core::{
    Config, LoopChange, LoopFile, LoopRegistry, Runtime, ScheduledEvent, SharedRegistry,
};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// ditty - cyclic trigger scheduler
#[derive(Parser, Debug)]
#[command(name = "ditty")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turn cyclic loops into a timed stream of start/stop triggers", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a loop file in real time, printing events as JSON lines
    Run {
        /// Path to the loop file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Config file path (default: ~/.config/ditty/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tempo override in BPM
        #[arg(long)]
        bpm: Option<f64>,

        /// Stop after this long (e.g. "10s", "2m")
        #[arg(long = "for", value_name = "DURATION", value_parser = humantime::parse_duration)]
        run_for: Option<Duration>,

        /// Reload the loop file when it changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Schedule a loop file offline from beat 0
    Render(RenderArgs),

    /// Create a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the configuration file path
    ConfigPath,
}

/// Arguments for `ditty render`.
#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Path to the loop file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Number of beats to render
    #[arg(long, default_value_t = 32.0)]
    pub beats: f64,

    /// Window size in beats
    #[arg(long, default_value_t = 1.0)]
    pub window: f64,

    /// Tempo override in BPM
    #[arg(long)]
    pub bpm: Option<f64>,

    /// Write events to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run {
            file,
            config,
            bpm,
            run_for,
            watch,
        } => run_loop_file(&file, config.as_deref(), bpm, run_for, watch),
        Commands::Render(render_args) => render::render(render_args),
        Commands::Init { force } => {
            let path = Config::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            Ok(())
        }
        Commands::ConfigPath => {
            println!("{}", Config::config_path()?.display());
            Ok(())
        }
    }
}

/// Initialize logging to stderr; `RUST_LOG` overrides the default `info` level.
pub(crate) fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init();
}

/// Load the config from `path`, or from the default location if present.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load_or_default()),
    }
}

/// Write one event as a JSON line.
pub(crate) fn write_event<W: Write + ?Sized>(writer: &mut W, event: &ScheduledEvent) -> Result<()> {
    serde_json::to_writer(&mut *writer, event)?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn run_loop_file(
    file: &Path,
    config_path: Option<&Path>,
    bpm: Option<f64>,
    run_for: Option<Duration>,
    watch: bool,
) -> Result<()> {
    init_logger();

    let mut config = load_config(config_path)?;
    if let Some(bpm) = bpm {
        config.transport.bpm = bpm;
    }
    config.validate().context("Invalid settings")?;

    log::info!("Loading: {}", file.display());
    let loops = LoopFile::load(file)
        .with_context(|| format!("Failed to load loops from {}", file.display()))?;

    let registry = SharedRegistry::with_registry(LoopRegistry::with_default_length(
        config.loops.default_length,
    )?);
    let changes = registry.subscribe();
    registry.with_write(|r| loops.apply(r))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("Failed to install Ctrl+C handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted))
        .context("Failed to install SIGTERM handler")?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let runtime =
        Runtime::start(&config, registry.clone(), event_tx).context("Failed to start runtime")?;

    if watch {
        log::info!("Watching {} for changes (Ctrl+C to exit)", file.display());
    } else {
        log::info!("Running... (Ctrl+C to exit)");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stop_at = run_for.map(|d| Instant::now() + d);
    let mut last_modified = modified_time(file);
    let mut last_check = Instant::now();

    loop {
        if interrupted.load(Ordering::Relaxed) {
            log::info!("Interrupted by user");
            break;
        }
        if stop_at.is_some_and(|t| Instant::now() >= t) {
            break;
        }

        match event_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(event) => {
                write_event(&mut out, &event)?;
                out.flush()?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Runtime stopped unexpectedly");
                break;
            }
        }

        for change in changes.try_iter() {
            log_change(&change);
        }

        if watch && last_check.elapsed() >= Duration::from_millis(500) {
            last_check = Instant::now();
            let current = modified_time(file);
            if current != last_modified {
                last_modified = current;
                log::info!("File changed, reloading...");
                match reload(file, &registry) {
                    Ok(()) => log::info!("Reload successful"),
                    Err(e) => log::error!("Reload failed: {:#}", e),
                }
            }
        }
    }

    runtime.shutdown()?;
    for event in event_rx.try_iter() {
        write_event(&mut out, &event)?;
    }
    out.flush()?;
    Ok(())
}

/// Replace the registry contents with the loop file's, deleting loops that
/// are no longer defined.
fn reload(file: &Path, registry: &SharedRegistry) -> Result<()> {
    let loops = LoopFile::load(file)?;
    let defined: HashSet<&str> = loops.loops.iter().map(|entry| entry.id.as_str()).collect();
    registry.with_write(|r| {
        let stale: Vec<String> = r
            .ids()
            .iter()
            .filter(|id| !defined.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            r.remove(id);
        }
        loops.apply(r)?;
        let pruned = r.prune_tombstones();
        if pruned > 0 {
            log::debug!("Forgot {} deleted loops", pruned);
        }
        Ok::<_, ditty_core::Error>(())
    })?;
    Ok(())
}

fn log_change(change: &LoopChange) {
    match change {
        LoopChange::Updated(descriptor) => log::debug!(
            "loop '{}': {} events, length {}",
            descriptor.id,
            descriptor.events.len(),
            descriptor.length
        ),
        LoopChange::Deleted { id } => log::debug!("loop '{}' removed", id),
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ditty_core::{EventKind, EventTemplate};

    #[test]
    fn test_reload_removes_stale_loops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loops.toml");
        fs::write(
            &path,
            "[[loops]]\nid = \"b\"\nevents = [[1, 1]]\n\n[[loops]]\nid = \"c\"\nevents = [[0, 1]]\n",
        )
        .unwrap();

        let registry = SharedRegistry::new();
        registry
            .set_loop("a", vec![EventTemplate::new(0.0, 1.0)], None)
            .unwrap();
        registry
            .set_loop("b", vec![EventTemplate::new(0.0, 1.0)], None)
            .unwrap();
        let changes = registry.subscribe();

        reload(&path, &registry).unwrap();

        let ids: Vec<String> = registry.snapshot().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
        let received: Vec<LoopChange> = changes.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(received[0].is_deletion());
        assert_eq!(received[0].id(), "a");
        assert!(!registry.with_read(|r| r.is_tombstone("a")));
    }

    #[test]
    fn test_write_event_json_line() {
        let event = ScheduledEvent {
            id: "drums".to_string(),
            kind: EventKind::Start,
            position: 4.0,
            args: vec!["kick".into()],
            time: 2.0,
        };
        let mut buf = Vec::new();
        write_event(&mut buf, &event).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], "drums");
        assert_eq!(value["event"], "start");
        assert_eq!(value["args"][0], "kick");
    }

    #[test]
    fn test_load_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[transport]\nbpm = 90\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.transport.bpm, 90.0);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
