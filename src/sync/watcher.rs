use super::engine::{mode_str, SyncEngine, SyncPlan};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Directory names whose events never trigger a flush
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "out",
    "__pycache__",
    "target",
    "bin",
    "obj",
    "zig-out",
    ".next",
    ".svelte-kit",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    "vendor",
    "_build",
    "deps",
];

/// Editor droppings and other files not worth a flush
const EXCLUDED_SUFFIXES: &[&str] = &[".swp", ".swx", ".tmp", "~", ".pyc", ".o", ".class"];

/// Whether a changed path should be dropped instead of synced
pub fn is_excluded(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    for component in relative.components() {
        let name = component.as_os_str().to_string_lossy();
        if EXCLUDED_DIRS.contains(&name.as_ref()) {
            return true;
        }
    }
    let file_name = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    EXCLUDED_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

/// What the dashboard reports for an active session
#[derive(Debug, Clone, Serialize)]
pub struct SyncSessionInfo {
    pub deployment: String,
    pub namespace: String,
    pub src: String,
    pub dest: String,
    pub container: String,
    pub restart: bool,
    pub runtime: String,
    pub mode: &'static str,
    pub started_at: DateTime<Utc>,
}

/// A running watch session; dropping the stop sender ends it
pub struct SyncHandle {
    pub info: SyncSessionInfo,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the watcher to flush once more, tear down, and exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("sync session task panicked: {}", e);
        }
    }
}

/// Spawn the watch loop for a prepared session
pub fn spawn_session(engine: SyncEngine, plan: SyncPlan, debounce: Duration) -> SyncHandle {
    let info = SyncSessionInfo {
        deployment: engine.options.deployment.clone(),
        namespace: engine.options.namespace.clone(),
        src: engine.options.src.display().to_string(),
        dest: engine.options.dest.clone(),
        container: plan.container.clone(),
        restart: engine.options.restart,
        runtime: plan.detected.runtime.clone(),
        mode: mode_str(plan.detected.mode()),
        started_at: Utc::now(),
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        if let Err(e) = watch_and_sync(engine, plan, stop_rx, debounce).await {
            error!("sync session ended with error: {:#}", e);
        }
    });
    SyncHandle {
        info,
        stop: stop_tx,
        task,
    }
}

/// The watch loop: recursive filesystem events, debounced flushes, a final
/// flush on stop, then teardown. Flushes are serialised: the Nth flush
/// completes before the (N+1)th begins.
pub async fn watch_and_sync(
    engine: SyncEngine,
    mut plan: SyncPlan,
    mut stop_rx: watch::Receiver<bool>,
    debounce: Duration,
) -> Result<()> {
    let root = engine.options.src.clone();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

    // notify runs its own thread; forward create/write events into the loop
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    let _ = event_tx.send(event.paths);
                }
            }
            Err(e) => warn!("watch error: {}", e),
        }
    })
    .context("failed to create filesystem watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;
    info!("watching {} for changes", root.display());

    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            changed = stop_rx.changed() => {
                // Stop requested (or the handle was dropped): flush whatever
                // is pending once, then leave the loop for teardown.
                if changed.is_err() || *stop_rx.borrow() {
                    if !pending.is_empty() {
                        let files: Vec<PathBuf> = pending.drain().collect();
                        if let Err(e) = engine.flush(&mut plan, Some(files.as_slice())).await {
                            error!("final flush failed: {:#}", e);
                        }
                    }
                    break;
                }
            }
            paths = event_rx.recv() => {
                let Some(paths) = paths else { break };
                for path in paths {
                    if is_excluded(&root, &path) {
                        continue;
                    }
                    if path.is_file() {
                        debug!("queued {}", path.display());
                        pending.insert(path);
                    }
                }
                if !pending.is_empty() {
                    deadline = Some(Instant::now() + debounce);
                }
            }
            _ = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                deadline = None;
                let files: Vec<PathBuf> = pending.drain().collect();
                info!("syncing {} changed file(s)", files.len());
                if let Err(e) = engine.flush(&mut plan, Some(files.as_slice())).await {
                    error!("flush failed: {:#}", e);
                }
            }
        }
    }

    drop(watcher);
    engine.teardown(&plan).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_excluded_directories() {
        let root = Path::new("/src/app");
        assert!(is_excluded(root, Path::new("/src/app/.git/HEAD")));
        assert!(is_excluded(root, Path::new("/src/app/node_modules/x/index.js")));
        assert!(is_excluded(root, Path::new("/src/app/deep/__pycache__/m.pyc")));
        assert!(is_excluded(root, Path::new("/src/app/target/debug/demo")));
        assert!(!is_excluded(root, Path::new("/src/app/src/main.js")));
        assert!(!is_excluded(root, Path::new("/src/app/server.py")));
    }

    #[test]
    fn test_is_excluded_suffixes() {
        let root = Path::new("/src/app");
        assert!(is_excluded(root, Path::new("/src/app/main.py.swp")));
        assert!(is_excluded(root, Path::new("/src/app/notes~")));
        assert!(is_excluded(root, Path::new("/src/app/cache.pyc")));
        assert!(!is_excluded(root, Path::new("/src/app/swp.rs")));
    }
}
