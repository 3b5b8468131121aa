//! Persistent daemon state.
//!
//! A single small JSON file under the user-state directory holding the
//! last completed minute tick. Losing it is harmless (the daemon reseeds
//! with "now"), but keeping it correct across suspend and restart is what
//! makes catch-up possible.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IcsWatchError, IcsWatchResult};

/// The persisted state record. `version` is a schema tag for forward
/// compatibility, not the binary version at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub last_alert_tick: DateTime<Utc>,
    pub version: String,
}

impl DaemonState {
    fn seeded(now: DateTime<Utc>) -> DaemonState {
        DaemonState {
            last_alert_tick: now,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Loads and persists [`DaemonState`] with atomic writes.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: RwLock<DaemonState>,
    first_run: bool,
}

impl StateStore {
    /// Open the state file at the default user-state location, seeding it
    /// when missing or unreadable.
    pub fn open() -> IcsWatchResult<StateStore> {
        StateStore::open_at(default_state_path()?)
    }

    /// Open a state file at an explicit path. Missing or corrupt files
    /// seed with the current instant and are immediately rewritten.
    pub fn open_at(path: PathBuf) -> IcsWatchResult<StateStore> {
        let now = Utc::now();
        let first_run = !path.exists();

        let (state, needs_rewrite) = if first_run {
            (DaemonState::seeded(now), true)
        } else {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<DaemonState>(&bytes) {
                    Ok(state) => (state, false),
                    Err(err) => {
                        warn!(path = %path.display(), %err, "state file corrupt; reseeding with now");
                        (DaemonState::seeded(now), true)
                    }
                },
                Err(err) => {
                    return Err(IcsWatchError::StateIo(format!(
                        "failed to read state file {}: {err}",
                        path.display()
                    )))
                }
            }
        };

        let store = StateStore {
            path,
            state: RwLock::new(state),
            first_run,
        };
        if needs_rewrite {
            store.save()?;
        }
        Ok(store)
    }

    /// Whether no state file existed before this load. Lets higher layers
    /// suppress a "missed everything since epoch" catch-up on a fresh
    /// install.
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_alert_tick(&self) -> DateTime<Utc> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_alert_tick
    }

    /// Update the last tick and persist immediately.
    pub fn set_last_alert_tick(&self, tick: DateTime<Utc>) -> IcsWatchResult<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_alert_tick = tick;
        self.save()
    }

    /// Write the current state: temp file in the same directory, fsync,
    /// atomic rename into place.
    pub fn save(&self) -> IcsWatchResult<()> {
        let state = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                IcsWatchError::StateIo(format!(
                    "failed to create state directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let data = serde_json::to_vec_pretty(&state)
            .map_err(|err| IcsWatchError::StateIo(format!("failed to serialize state: {err}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = fs::File::create(&tmp_path).map_err(|err| {
            IcsWatchError::StateIo(format!(
                "failed to create temp state file {}: {err}",
                tmp_path.display()
            ))
        })?;
        tmp.write_all(&data)
            .and_then(|_| tmp.sync_all())
            .map_err(|err| {
                IcsWatchError::StateIo(format!(
                    "failed to write temp state file {}: {err}",
                    tmp_path.display()
                ))
            })?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            IcsWatchError::StateIo(format!(
                "failed to move state file into place at {}: {err}",
                self.path.display()
            ))
        })
    }
}

/// `$XDG_STATE_HOME/icswatch/state.json`, falling back to
/// `~/.local/state/icswatch/state.json`.
fn default_state_path() -> IcsWatchResult<PathBuf> {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .map(|dir| dir.join("icswatch").join("state.json"))
        .ok_or_else(|| IcsWatchError::StateIo("could not determine state directory".to_string()))
}
