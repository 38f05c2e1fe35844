// ─── File Installer ───
// Installs the staged update tree over the current installation. The
// extraction mechanics live outside the supervisor; this collaborator only
// copies whatever the restart-command check staged.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::settings::{keys, SettingsStore};

/// Seam for the installation collaborator so state-machine tests can script
/// success and failure.
pub trait FileInstaller {
    /// Returns whether the installation concluded cleanly. A `false` result
    /// is what triggers the admin-escalation path in the stage machine.
    fn install_files(&mut self, store: &dyn SettingsStore, silent: bool) -> bool;
}

/// Production installer: copies the staged tree recorded by the update check
/// into the install directory, overwriting existing files.
pub struct StagingInstaller {
    install_dir: PathBuf,
}

impl StagingInstaller {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }
}

impl FileInstaller for StagingInstaller {
    fn install_files(&mut self, store: &dyn SettingsStore, silent: bool) -> bool {
        let Some(staging) = store
            .get(keys::STAGING_DIR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
        else {
            info!("No staged update tree recorded, nothing to install");
            return true;
        };
        if !staging.is_dir() {
            warn!("Staged update tree {:?} has vanished", staging);
            return false;
        }

        if !silent {
            info!("Installing update files from {:?}", staging);
        }
        match copy_dir_recursive(&staging, &self.install_dir) {
            Ok(()) => true,
            Err(err) => {
                warn!("Install failed: {}", err);
                false
            }
        }
    }
}

/// Copy `source` into `destination`, replacing files that already exist.
/// Fails on the first conflict it cannot resolve (typically a locked file).
pub fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination).map_err(|source_err| LauncherError::Io {
        path: destination.to_path_buf(),
        source: source_err,
    })?;

    for entry in std::fs::read_dir(source).map_err(|source_err| LauncherError::Io {
        path: source.to_path_buf(),
        source: source_err,
    })? {
        let entry = entry.map_err(|source_err| LauncherError::Io {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry.file_type().map_err(|source_err| LauncherError::Io {
            path: src_path.clone(),
            source: source_err,
        })?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            if dst_path.exists() {
                std::fs::remove_file(&dst_path).map_err(|source_err| LauncherError::Io {
                    path: dst_path.clone(),
                    source: source_err,
                })?;
            }
            std::fs::copy(&src_path, &dst_path).map_err(|source_err| LauncherError::Io {
                path: dst_path.clone(),
                source: source_err,
            })?;
        }
    }

    Ok(())
}
