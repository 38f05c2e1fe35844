use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the supervisor backend.
/// Every fallible module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Game path ───────────────────────────────────────
    #[error("Game installation path is not recorded")]
    GamePathMissing,

    #[error("Game installation path contains non-ASCII characters: {0:?}")]
    GamePathNotAscii(PathBuf),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

/// Process exit codes of the supervisor itself.
///
/// When the target process ran, the supervisor exits with the target's own
/// exit code instead. Each launch precondition failure gets its own code so
/// report logs from different generations can be correlated.
pub mod exit_code {
    /// Clean target exit, or a clean supervisor stop before launch.
    pub const CLEAN: i32 = 0;
    /// A stray instance of the target was running and could not be cleared.
    pub const INSTANCE_BLOCKED: i32 = 1;
    /// A companion data or module file is missing.
    pub const DATA_FILES_MISSING: i32 = 2;
    /// A forbidden file is present in the game directory.
    pub const FILE_CLASH: i32 = 3;
    /// The support module is missing or failed its probe load.
    pub const CORE_UNUSABLE: i32 = 4;
    /// The game path is missing or contains non-ASCII characters.
    pub const GAME_PATH: i32 = 5;
    /// Target process creation failed for a non-elevation reason.
    pub const SPAWN_FAILED: i32 = 6;
    /// An elevated relaunch was issued; this generation retires.
    pub const ELEVATION_PENDING: i32 = 7;
}
