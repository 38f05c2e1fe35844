// ─── Settings Store ───
// Durable key/value state shared across supervisor generations. Every set is
// written through to disk immediately: an ungraceful process death must not
// lose watchdog sections or queued commands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

const SETTINGS_FILE: &str = "settings.json";

/// Well-known keys in the store.
pub mod keys {
    /// Install location used when a generation starts with `install_loc=far`.
    pub const FAR_PATH: &str = "launcher/far-path";
    /// Version marker refreshed at startup and after a successful install.
    pub const CURRENT_VERSION: &str = "launcher/current-version";
    pub const OS_VERSION: &str = "launcher/os-version";
    pub const IS_ADMIN: &str = "launcher/is-admin";
    /// Installation directory of the target game.
    pub const GAME_PATH: &str = "game/path";
    /// Queued restart command record (tab-separated fields).
    pub const ON_RESTART: &str = "update/on-restart";
    /// Command to execute once the target process has exited.
    pub const ON_QUIT: &str = "update/on-quit";
    /// Directory the last update archive was extracted to.
    pub const STAGING_DIR: &str = "update/staging-dir";
    /// Serialized map of date -> downloaded content bundle path.
    pub const CONTENT_QUEUE: &str = "content/install-queue";
    pub const CONTENT_UPDATED: &str = "content/updated";
    pub const LAST_CRASH_INFO: &str = "diagnostics/last-crash-info";
    /// Help topic to open in a browser after the target exits.
    pub const PENDING_SOLUTION: &str = "diagnostics/pending-solution";
}

/// Durable, process-external key/value store.
///
/// Injected into every component that needs cross-generation state so tests
/// can substitute [`MemorySettingsStore`] without touching real storage.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);

    /// Missing or unparsable values read as 0.
    fn get_int(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, &value.to_string());
    }
}

/// Production store: a flat string map persisted as pretty-printed JSON in
/// the data directory.
pub struct JsonSettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonSettingsStore {
    /// Load the store from `<data_dir>/settings.json`; a missing or corrupt
    /// file starts empty rather than blocking the launch.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    warn!("Discarding corrupt settings file {:?}: {}", path, err);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self { path, values }
    }

    fn persist(&self) {
        let json = match serde_json::to_string_pretty(&self.values) {
            Ok(json) => json,
            Err(err) => {
                warn!("Could not serialize settings: {}", err);
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::write(&self.path, json) {
            warn!("Could not persist settings to {:?}: {}", self.path, err);
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.persist();
    }

    fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.persist();
        }
    }
}

/// In-memory store for tests and for environments without a writable data
/// directory. Loses everything on process exit.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: BTreeMap<String, String>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}
