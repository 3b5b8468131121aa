//! Filesystem watcher for the configured calendar directories.
//!
//! Forwards create/modify/delete/rename events for `.ics` files into a
//! channel; a debounce loop coalesces bursts (sync tools often rewrite a
//! file several times in quick succession) before touching the store.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use icswatch_core::{ics, EventStore};

/// Coalescing window for filesystem event bursts.
const DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileOp::Created => "created",
            FileOp::Modified => "modified",
            FileOp::Deleted => "deleted",
            FileOp::Renamed => "renamed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub op: FileOp,
}

/// Start watching `directories` (non-recursive) and forward `.ics` changes
/// into `tx`. The returned watcher must be kept alive for the daemon's
/// lifetime.
pub fn start(
    directories: Vec<PathBuf>,
    tx: mpsc::Sender<FileChange>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: std::result::Result<notify::Event, notify::Error>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "filesystem watcher error");
                    return;
                }
            };
            let op = match event.kind {
                EventKind::Create(_) => FileOp::Created,
                EventKind::Modify(ModifyKind::Name(_)) => FileOp::Renamed,
                EventKind::Modify(_) => FileOp::Modified,
                EventKind::Remove(_) => FileOp::Deleted,
                _ => return,
            };
            for path in event.paths {
                if !is_ics_path(&path) {
                    continue;
                }
                if tx.try_send(FileChange { path, op }).is_err() {
                    warn!("filesystem event queue full; dropping change");
                }
            }
        },
        notify::Config::default(),
    )
    .context("failed to create filesystem watcher")?;

    for dir in &directories {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch directory {}", dir.display()))?;
        info!(directory = %dir.display(), "watching for calendar changes");
    }

    Ok(watcher)
}

/// `.ics` by extension; a deleted file cannot be `stat`ed, so only the
/// name is checked here.
fn is_ics_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ics"))
        .unwrap_or(false)
}

/// Debounce loop: collect changes for a short window, deduplicate by
/// path (last operation wins), then apply them to the store.
pub async fn process_changes(
    mut rx: mpsc::Receiver<FileChange>,
    store: Arc<EventStore>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            change = rx.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let mut pending: HashMap<PathBuf, FileOp> = HashMap::new();
        pending.insert(first.path, first.op);

        sleep(Duration::from_millis(DEBOUNCE_MS)).await;
        while let Ok(change) = rx.try_recv() {
            pending.insert(change.path, change.op);
        }

        for (path, op) in pending {
            apply_change(&store, &path, op);
        }
    }
    debug!("filesystem change loop stopped");
}

fn apply_change(store: &EventStore, path: &Path, op: FileOp) {
    debug!(file = %path.display(), %op, "calendar file changed");
    match op {
        FileOp::Created | FileOp::Modified => reparse(store, path),
        FileOp::Deleted => {
            store.delete_by_file(path);
            info!(file = %path.display(), "removed events for deleted file");
        }
        // A rename reports the path that changed; whichever side still
        // exists decides whether this is an add or a removal.
        FileOp::Renamed => {
            if path.exists() {
                reparse(store, path);
            } else {
                store.delete_by_file(path);
                info!(file = %path.display(), "removed events for renamed file");
            }
        }
    }
}

/// Re-parse one file and swap its events into the store. Parse failures
/// leave the previously loaded events in place.
fn reparse(store: &EventStore, path: &Path) {
    let Some(dir) = path.parent() else {
        return;
    };
    let Some(calendar) = store.calendar(dir) else {
        debug!(file = %path.display(), "change outside any configured calendar; ignoring");
        return;
    };
    match ics::parse_calendar_file(path, &calendar) {
        Ok(events) => {
            info!(file = %path.display(), events = events.len(), "reloaded calendar file");
            store.upsert_events_for_file(path, events);
        }
        Err(err) => {
            warn!(file = %path.display(), %err, "failed to parse changed file; keeping previous events");
        }
    }
}
