use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rotabot::config::{self as cfg, Node};
use rotabot::engine::{Cursor, EngineCallbacks, MacroEngine, Task};
use rotabot::io::{EnigoKeySender, ProfileEchoSampler};
use rotabot::watch;

/// Rotabot CLI
#[derive(Debug, Parser)]
#[command(
    name = rotabot::PKG_NAME,
    version = rotabot::PKG_VERSION,
    about = "A pixel-driven skill rotation engine built on Enigo key injection"
)]
struct Args {
    /// Path to the JSON bundle (settings, profile, preset)
    #[arg(short = 'c', long = "config", default_value = "config/bundle.json")]
    config: PathBuf,

    /// Log keys instead of injecting them
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Validate the preset, print the report and exit
    #[arg(long = "validate")]
    validate: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the bundle and exit
    #[arg(long = "print-schema")]
    print_schema: bool,

    /// Reload the profile whenever the bundle file changes
    #[arg(long = "watch")]
    watch: bool,
}

/// Logs engine callbacks on the main task.
struct LogCallbacks {
    stopped: AtomicBool,
}

impl EngineCallbacks for LogCallbacks {
    fn on_started(&self, preset_id: &str) {
        info!(preset = %preset_id, "Engine started");
    }

    fn on_stopped(&self, reason: &str) {
        info!(%reason, "Engine stopped");
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn on_node_executed(&self, cursor: &Cursor, node: &Node) {
        debug!(
            mode = cursor.mode_id.as_deref().unwrap_or("-"),
            track = %cursor.track_id,
            index = cursor.node_index,
            node = %node.id(),
            kind = node.kind(),
            "Node executed"
        );
    }

    fn on_error(&self, message: &str, detail: &str) {
        error!(%detail, "{message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.log_level.as_deref() {
        Some(level) => rotabot::init_tracing_with(rotabot::parse_level(level).unwrap_or(tracing::Level::INFO)),
        None => rotabot::init_tracing(),
    }

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(());
    }

    info!(
        version = rotabot::PKG_VERSION,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "Starting Rotabot"
    );

    let bundle = cfg::load_from_path_async(&args.config).await?;
    debug!(target: "rotabot", "Bundle loaded successfully");

    if args.validate {
        let report = cfg::validate_preset(&bundle.preset, Some(&bundle.profile));
        println!("{}", report.render());
        if report.has_errors() {
            bail!("Preset '{}' failed validation", bundle.preset.id);
        }
        return Ok(());
    }

    let cfg::Bundle {
        mut settings,
        profile,
        preset,
    } = bundle;

    // Screen capture is supplied by embedding hosts; the binary echoes the
    // recorded colors, so no pixel start or cast-bar change would ever show.
    let sampler = Arc::new(ProfileEchoSampler::new(&profile));
    if settings.disable_screen_signals() {
        warn!("No screen capture backend in the CLI; using start_signal_mode=none and cast_bar.mode=timer");
    }

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<Task>();
    let callbacks = Arc::new(LogCallbacks {
        stopped: AtomicBool::new(false),
    });
    let mut engine = MacroEngine::new(Arc::new(task_tx), callbacks.clone());

    if let Err(err) = engine.start(
        preset,
        profile,
        settings,
        Box::new(EnigoKeySender::new(args.dry_run)),
        sampler,
    ) {
        // The rendered report was queued through on_error.
        while let Ok(task) = task_rx.try_recv() {
            task();
        }
        bail!(err);
    }

    let cancel = CancellationToken::new();
    let (profile_tx, mut profile_rx) = mpsc::channel(4);
    let _watcher = if args.watch {
        Some(watch::spawn_bundle_watcher(&args.config, profile_tx, cancel.clone())?)
    } else {
        drop(profile_tx);
        None
    };

    loop {
        tokio::select! {
            task = task_rx.recv() => {
                let Some(task) = task else { break };
                task();
                if callbacks.stopped.load(Ordering::SeqCst) {
                    break;
                }
            }
            Some(profile) = profile_rx.recv() => {
                if let Err(err) = engine.reload_profile(profile) {
                    warn!(error = %err, "Profile reload ignored");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    cancel.cancel();
    if engine.is_running() {
        let stopped = tokio::task::spawn_blocking(move || engine.stop()).await?;
        if let Err(err) = stopped {
            warn!(error = %err, "Stop failed");
        }
        while let Ok(task) = task_rx.try_recv() {
            task();
        }
    }

    info!("Rotabot exited");
    Ok(())
}
