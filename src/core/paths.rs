// ─── Path Resolution ───
// Near/far supervisor directory selection and the game-path policy.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::params::InstallLocation;
use crate::core::settings::{keys, SettingsStore};

pub const APP_DIR_NAME: &str = "Redline";
pub const LAUNCHER_EXE_NAME: &str = "Redline.exe";
pub const TARGET_EXE_NAME: &str = "velocity.exe";
pub const SUPPORT_DIR_NAME: &str = "redline";
pub const CORE_MODULE_NAME: &str = "redline_core.dll";

/// Directories the current generation operates from, resolved once at
/// process entry.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    launcher_dir: PathBuf,
    data_dir: PathBuf,
}

impl RuntimePaths {
    /// `near` resolves to the running executable's directory. `far` reads the
    /// recorded install location from the store and falls back to near when
    /// the record is missing or stale.
    pub fn resolve(location: InstallLocation, store: &dyn SettingsStore) -> Self {
        let near = module_dir();
        let launcher_dir = match location {
            InstallLocation::Near => near,
            InstallLocation::Far => match store.get(keys::FAR_PATH).map(PathBuf::from) {
                Some(recorded) if recorded.is_dir() => recorded,
                recorded => {
                    warn!(
                        "Far install location {:?} unusable, falling back to module location",
                        recorded
                    );
                    near
                }
            },
        };

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        let _ = std::fs::create_dir_all(&data_dir);

        Self {
            launcher_dir,
            data_dir,
        }
    }

    pub fn launcher_dir(&self) -> &Path {
        &self.launcher_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the support module and companion files, also the
    /// working directory the target process is created with.
    pub fn support_dir(&self) -> PathBuf {
        self.launcher_dir.join(SUPPORT_DIR_NAME)
    }

    pub fn launcher_exe(&self) -> PathBuf {
        self.launcher_dir.join(LAUNCHER_EXE_NAME)
    }

    pub fn core_module(&self) -> PathBuf {
        self.support_dir().join(CORE_MODULE_NAME)
    }

    #[cfg(test)]
    pub fn for_tests(launcher_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            launcher_dir,
            data_dir,
        }
    }
}

fn module_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Installation directory of the target game, from the settings store.
///
/// A missing record and a non-ASCII path are distinct fatal conditions; a
/// semicolon in the path is a warning handled by the caller.
pub fn game_path(store: &dyn SettingsStore) -> LauncherResult<PathBuf> {
    let raw = store
        .get(keys::GAME_PATH)
        .filter(|value| !value.is_empty())
        .ok_or(LauncherError::GamePathMissing)?;
    if !raw.is_ascii() {
        return Err(LauncherError::GamePathNotAscii(PathBuf::from(raw)));
    }
    Ok(PathBuf::from(raw))
}
