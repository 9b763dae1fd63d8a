//! Bundle file watcher.
//!
//! Watches the directory holding the bundle (editors often replace files
//! rather than write them in place) and forwards a freshly loaded
//! [`Profile`] whenever the bundle changes. The engine swaps it in between
//! ticks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Profile, load_from_path_async};

/// Keeps the underlying watcher alive. Dropping it stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Start watching `bundle` and send its profile on `profile_tx` after each
/// change. The forwarding task ends when `cancel` fires or the receiver is
/// dropped.
pub fn spawn_bundle_watcher(
    bundle: impl Into<PathBuf>,
    profile_tx: mpsc::Sender<Profile>,
    cancel: CancellationToken,
) -> Result<WatcherHandle> {
    let bundle = bundle.into();
    let bundle = bundle.canonicalize().unwrap_or(bundle);
    let dir = bundle
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("Bundle path {:?} has no parent directory", bundle))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(err) => eprintln!("rotabot: file watch error: {err}"),
        },
        Config::default(),
    )?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    info!(target: "rotabot::watch", path = %bundle.display(), "watching bundle for profile changes");

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if !touches(&event, &bundle) {
                continue;
            }
            debug!(target: "rotabot::watch", kind = ?event.kind, "bundle changed");

            match load_from_path_async(&bundle).await {
                Ok(loaded) => {
                    if profile_tx.send(loaded.profile).await.is_err() {
                        break;
                    }
                }
                // A half-written file is common mid-save; the next event retries.
                Err(err) => warn!(target: "rotabot::watch", error = %err, "failed to reload bundle"),
            }
        }
        debug!(target: "rotabot::watch", "bundle watcher ended");
    });

    Ok(WatcherHandle { _inner: watcher })
}

fn touches(event: &Event, bundle: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == bundle.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn only_writes_to_the_bundle_count() {
        let bundle = Path::new("/tmp/rot/bundle.json");
        let write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(bundle.to_path_buf());
        let other = Event::new(EventKind::Create(CreateKind::File)).add_path("/tmp/rot/notes.txt".into());
        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::Any)).add_path(bundle.to_path_buf());

        assert!(touches(&write, bundle));
        assert!(!touches(&other, bundle));
        assert!(!touches(&removed, bundle));
    }
}
