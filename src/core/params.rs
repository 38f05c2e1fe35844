// ─── Restart Parameter Map ───
// The small key/value state handed from one supervisor generation to the
// next through the command line, e.g. `install_stage=copy_files&silent_opt=no`.

use serde::{Deserialize, Serialize};

pub const KEY_INSTALL_STAGE: &str = "install_stage";
pub const KEY_INSTALL_LOCATION: &str = "install_loc";
pub const KEY_ADMIN_STATE: &str = "admin_state";
pub const KEY_SILENT_OPT: &str = "silent_opt";
/// Marker appended when relaunching after ERROR_ELEVATION_REQUIRED, so the
/// elevated generation does not try to elevate again.
pub const KEY_DONE_ADMIN: &str = "done_admin";

const PAIR_SEPARATOR: char = '&';
const KEY_VALUE_SEPARATOR: char = '=';

/// Install stage of the current generation — strongly typed, no magic strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Crashed,
    Initial,
    CopyFiles,
    Launch,
}

impl std::fmt::Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallStage::Crashed => write!(f, "crashed"),
            InstallStage::Initial => write!(f, "initial"),
            InstallStage::CopyFiles => write!(f, "copy_files"),
            InstallStage::Launch => write!(f, "launch"),
        }
    }
}

impl InstallStage {
    /// Values outside the enumerated set fail open toward "just run the
    /// target" and normalize to `Launch`.
    pub fn from_value(raw: &str) -> Self {
        match raw {
            "crashed" => InstallStage::Crashed,
            "initial" => InstallStage::Initial,
            "copy_files" => InstallStage::CopyFiles,
            _ => InstallStage::Launch,
        }
    }
}

/// Where this generation was started from: `near` is the executable's own
/// directory, `far` is the location recorded in the settings store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallLocation {
    Near,
    Far,
}

impl std::fmt::Display for InstallLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallLocation::Near => write!(f, "near"),
            InstallLocation::Far => write!(f, "far"),
        }
    }
}

impl InstallLocation {
    pub fn from_value(raw: &str) -> Self {
        match raw {
            "far" => InstallLocation::Far,
            _ => InstallLocation::Near,
        }
    }
}

/// Whether the current generation holds elevated rights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Yes,
    No,
}

impl std::fmt::Display for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminState::Yes => write!(f, "yes"),
            AdminState::No => write!(f, "no"),
        }
    }
}

impl AdminState {
    pub fn from_value(raw: &str) -> Self {
        match raw {
            "yes" => AdminState::Yes,
            _ => AdminState::No,
        }
    }
}

/// Ordered string map with a reversible command-line serialization.
///
/// Unknown keys pass through parse/serialize untouched so newer generations
/// can hand markers to older ones. Keys are unique; `set` overwrites in
/// place, preserving first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `key1=value1&key2=value2...`. Segments without a separator become
    /// keys with an empty value; empty segments are skipped. Defaulting of the
    /// recognized keys is a separate caller step, see [`ParamMap::apply_defaults`].
    pub fn parse(raw: &str) -> Self {
        let mut map = Self::new();
        for segment in raw.trim().split(PAIR_SEPARATOR) {
            if segment.is_empty() {
                continue;
            }
            match segment.split_once(KEY_VALUE_SEPARATOR) {
                Some((key, value)) => map.set(key, value),
                None => map.set(segment, ""),
            }
        }
        map
    }

    /// Inverse of [`ParamMap::parse`] for maps whose keys and values contain
    /// no separator characters.
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}{KEY_VALUE_SEPARATOR}{value}"))
            .collect::<Vec<_>>()
            .join(&PAIR_SEPARATOR.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Overwrite every key present in `overrides` (additive union, override wins).
    pub fn merge(&mut self, overrides: &ParamMap) {
        for (key, value) in &overrides.entries {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fill the four recognized keys so the invariant "every handed-off map is
    /// fully populated" holds downstream.
    pub fn apply_defaults(&mut self) {
        if !self.contains(KEY_INSTALL_STAGE) {
            self.set(KEY_INSTALL_STAGE, "initial");
        }
        if !self.contains(KEY_INSTALL_LOCATION) {
            self.set(KEY_INSTALL_LOCATION, "near");
        }
        if !self.contains(KEY_ADMIN_STATE) {
            // Could be yes, but assuming 'no' works best.
            self.set(KEY_ADMIN_STATE, "no");
        }
        if !self.contains(KEY_SILENT_OPT) {
            self.set(KEY_SILENT_OPT, "no");
        }
    }

    // ── Typed accessors ──

    pub fn stage(&self) -> InstallStage {
        InstallStage::from_value(self.get(KEY_INSTALL_STAGE).unwrap_or(""))
    }

    pub fn location(&self) -> InstallLocation {
        InstallLocation::from_value(self.get(KEY_INSTALL_LOCATION).unwrap_or(""))
    }

    pub fn admin(&self) -> AdminState {
        AdminState::from_value(self.get(KEY_ADMIN_STATE).unwrap_or(""))
    }

    pub fn silent(&self) -> bool {
        matches!(self.get(KEY_SILENT_OPT), Some(value) if value != "no")
    }

    pub fn set_stage(&mut self, stage: InstallStage) {
        self.set(KEY_INSTALL_STAGE, &stage.to_string());
    }

    pub fn set_location(&mut self, location: InstallLocation) {
        self.set(KEY_INSTALL_LOCATION, &location.to_string());
    }

    pub fn set_admin(&mut self, admin: AdminState) {
        self.set(KEY_ADMIN_STATE, &admin.to_string());
    }
}

impl std::fmt::Display for ParamMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}
