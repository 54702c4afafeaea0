use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::model::{OwnerId, PreferenceSet, PreferenceUpdate};
use crate::subscription::Subscription;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Source of display preferences plus live change notifications.
pub trait SettingsStore: Send + Sync {
    fn current(&self, owner: &OwnerId) -> Result<PreferenceSet, Error>;

    /// Field-level preference deltas; absent fields mean "unchanged".
    fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<(Receiver<PreferenceUpdate>, Subscription), Error>;
}

/// Fixed preferences with no live updates. Used when the deployment has no
/// settings file to watch.
pub struct StaticSettings {
    preferences: PreferenceSet,
}

impl StaticSettings {
    pub fn new(preferences: PreferenceSet) -> Self {
        Self { preferences }
    }
}

impl SettingsStore for StaticSettings {
    fn current(&self, _owner: &OwnerId) -> Result<PreferenceSet, Error> {
        Ok(self.preferences.clone())
    }

    fn subscribe(
        &self,
        _owner: &OwnerId,
    ) -> Result<(Receiver<PreferenceUpdate>, Subscription), Error> {
        let (tx, rx) = mpsc::channel(1);
        // The sender lives inside the subscription so the stream stays open
        // (and quiet) until disposal.
        Ok((rx, Subscription::new(move || drop(tx))))
    }
}

/// Preferences read from a YAML file and re-read whenever the file changes.
/// Each change is reduced to the delta against the last good parse, so the
/// engine's merge path sees only fields that actually moved.
pub struct YamlSettingsStore {
    path: PathBuf,
}

impl YamlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn read_preferences(path: &Path) -> Result<PreferenceSet, Error> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// Re-read the file and diff against `last`. A malformed or unreadable file
/// is never fatal: the previous good preferences simply stay in effect.
fn reload_delta(path: &Path, last: &PreferenceSet) -> Option<(PreferenceSet, PreferenceUpdate)> {
    match read_preferences(path) {
        Ok(fresh) => {
            let delta = fresh.diff_from(last);
            if delta.is_empty() {
                None
            } else {
                Some((fresh, delta))
            }
        }
        Err(err) => {
            warn!(path = %path.display(), "ignoring unreadable settings update: {err}");
            None
        }
    }
}

impl SettingsStore for YamlSettingsStore {
    fn current(&self, _owner: &OwnerId) -> Result<PreferenceSet, Error> {
        read_preferences(&self.path)
    }

    fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<(Receiver<PreferenceUpdate>, Subscription), Error> {
        let (tx, rx) = mpsc::channel::<PreferenceUpdate>(EVENT_CHANNEL_CAPACITY);
        let path = self.path.clone();
        let mut last = self.current(owner).unwrap_or_default();

        let watched = path.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_)
                ) {
                    return;
                }
                if let Some((fresh, delta)) = reload_delta(&path, &last) {
                    debug!(?delta, "settings file changed");
                    last = fresh;
                    let _ = tx.blocking_send(delta);
                }
            }
            Err(err) => warn!("settings watch error: {err}"),
        })?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        info!(watching = %watched.display(), "settings watcher initialized");

        Ok((rx, Subscription::new(move || drop(watcher))))
    }
}
