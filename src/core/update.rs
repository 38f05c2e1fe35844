// ─── Update Plumbing ───
// Restart-command handling, content-bundle installation, cache cleanup and
// the on-quit command record. Downloading is somebody else's job; everything
// here works on files that already landed on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::dialogs::Dialogs;
use crate::core::launch::spawn::{LaunchVerb, ProcessSpawner};
use crate::core::params::{InstallLocation, ParamMap};
use crate::core::paths::LAUNCHER_EXE_NAME;
use crate::core::settings::{keys, SettingsStore};
use crate::core::state::SupervisorContext;

const SOLUTION_URL_BASE: &str = "https://redline.network/solution";
const CONTENT_MANIFEST_NAME: &str = "manifest.json";

/// Outcome of the pending-restart-command check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartCommand {
    Install {
        location: InstallLocation,
        silent: bool,
    },
    NoUpdate,
    Unrecognized(String),
}

/// A persisted shell command record: operation, file, parameters, directory,
/// show-mode, tab-separated. Well-formed means all five fields are present
/// and the operation is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub operation: String,
    pub file: String,
    pub parameters: String,
    pub directory: String,
    pub show_mode: String,
}

impl CommandRecord {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('\t').collect();
        if parts.len() < 5 || parts[0].is_empty() {
            return None;
        }
        Some(Self {
            operation: parts[0].to_string(),
            file: parts[1].to_string(),
            parameters: parts[2].to_string(),
            directory: parts[3].to_string(),
            show_mode: parts[4].to_string(),
        })
    }
}

/// Read and consume a command record stored under `key`.
fn take_command_record(store: &mut dyn SettingsStore, key: &str) -> Option<CommandRecord> {
    let raw = store.get(key)?;
    store.remove(key);
    CommandRecord::parse(&raw)
}

/// Query the queued restart command and, for an update, extract the archive
/// into a fresh staging directory beside it.
///
/// Reports `install far` when the extracted tree carries its own supervisor
/// executable (that copy completes the install), `install near` otherwise.
pub fn check_on_restart_command(ctx: &mut SupervisorContext) -> RestartCommand {
    let _ = std::env::set_current_dir(ctx.paths.launcher_dir());

    let Some(record) = take_command_record(ctx.store.as_mut(), keys::ON_RESTART) else {
        return RestartCommand::NoUpdate;
    };

    if record.operation != "files" && record.operation != "silent" {
        ctx.report.add(
            5052,
            format!("check_on_restart_command: unknown operation '{}'", record.operation),
        );
        return RestartCommand::Unrecognized(record.operation);
    }

    let silent = record.operation == "silent";
    let archive = PathBuf::from(&record.file);
    let archive_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "update".to_string());
    let parent = archive
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let staging = make_unique_path(&parent.join(format!("_{archive_name}_tmp_")));
    if std::fs::create_dir_all(&staging).is_err() {
        ctx.report.add(
            5053,
            format!("check_on_restart_command: could not create {:?}", staging),
        );
        return RestartCommand::Unrecognized("staging-dir-failed".to_string());
    }

    // A far relaunch resolves the staged executable from the working
    // directory, so move there before extracting.
    if std::env::set_current_dir(&staging).is_err() {
        ctx.report.add(
            5054,
            format!("check_on_restart_command: could not enter {:?}", staging),
        );
        return RestartCommand::Unrecognized("staging-chdir-failed".to_string());
    }

    if !silent {
        ctx.dialogs.message("Extracting files...");
    }

    // The update archive is self-extracting; `-s` unpacks into the working
    // directory.
    ctx.spawner.shell_execute(
        LaunchVerb::Open,
        &archive,
        "-s",
        Some(staging.as_path()),
        None,
        true,
    );

    ctx.store
        .set(keys::STAGING_DIR, &staging.to_string_lossy());

    let location = if staging.join(LAUNCHER_EXE_NAME).exists() {
        // A newer supervisor arrived with the update; let it finish the job.
        InstallLocation::Far
    } else {
        InstallLocation::Near
    };
    RestartCommand::Install { location, silent }
}

/// Append `_2`, `_3`, ... until the path does not exist yet.
pub fn make_unique_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let mut counter = 2u32;
    loop {
        let candidate = PathBuf::from(format!("{}_{counter}", base.display()));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Install queued content bundles (date -> downloaded archive) into the data
/// directory. Best-effort: a failed bundle is a report-log entry, never a
/// launch blocker.
pub fn install_content_items(ctx: &mut SupervisorContext) {
    let queue_raw = ctx
        .store
        .get(keys::CONTENT_QUEUE)
        .unwrap_or_default();
    if queue_raw.is_empty() {
        return;
    }
    ctx.store.remove(keys::CONTENT_QUEUE);

    let queue = ParamMap::parse(&queue_raw);
    for (date, archive) in queue.iter() {
        let target_dir = ctx.paths.data_dir().join("content").join(date);
        if std::fs::create_dir_all(&target_dir).is_err() {
            ctx.report.add(
                4048,
                format!("install_content_items failed with '{date}' '{archive}' '{}'", target_dir.display()),
            );
            continue;
        }

        ctx.spawner.shell_execute(
            LaunchVerb::Open,
            Path::new(archive),
            "-s",
            Some(target_dir.as_path()),
            None,
            true,
        );

        if target_dir.join(CONTENT_MANIFEST_NAME).exists() {
            ctx.store.set(keys::CONTENT_UPDATED, "1");
            ctx.report
                .add(2051, format!("install_content_items ok for '{date}'"));
        } else {
            ctx.report.add(
                4048,
                format!("install_content_items failed with '{date}' '{archive}' '{}'", target_dir.display()),
            );
        }
    }
}

/// Remove the consumed staging tree and leftover extraction caches.
/// Best-effort; failures are log lines only.
pub fn clean_download_cache(ctx: &mut SupervisorContext) {
    if let Some(staging) = ctx.store.get(keys::STAGING_DIR).map(PathBuf::from) {
        ctx.store.remove(keys::STAGING_DIR);
        if staging.is_dir() {
            if let Err(err) = std::fs::remove_dir_all(&staging) {
                warn!("Could not remove staging dir {:?}: {}", staging, err);
            }
        }
    }

    let cache_dir = ctx.paths.data_dir().join("cache");
    if cache_dir.is_dir() {
        if let Err(err) = std::fs::remove_dir_all(&cache_dir) {
            warn!("Could not clean cache dir {:?}: {}", cache_dir, err);
        }
    }
}

/// Clear any on-quit command left over from a previous run, so a crash does
/// not replay it.
pub fn clear_on_quit_command(store: &mut dyn SettingsStore) {
    store.remove(keys::ON_QUIT);
}

/// Execute the on-quit command recorded by the target during its run. The
/// synthetic `restart` operation resolves to relaunching the supervisor.
pub fn run_on_quit_command(ctx: &mut SupervisorContext) {
    let Some(mut record) = take_command_record(ctx.store.as_mut(), keys::ON_QUIT) else {
        return;
    };

    if record.operation == "restart" {
        record.operation = "open".to_string();
        record.file = ctx.paths.launcher_exe().to_string_lossy().into_owned();
    }
    if record.file.is_empty() {
        return;
    }

    let verb = LaunchVerb::from_operation(&record.operation);
    let directory = (!record.directory.is_empty()).then(|| PathBuf::from(&record.directory));
    let show_mode = record.show_mode.parse::<i32>().ok();

    ctx.report.add(
        1047,
        format!("run_on_quit_command: '{}' '{}'", record.operation, record.file),
    );
    ctx.spawner.shell_execute(
        verb,
        Path::new(&record.file),
        &record.parameters,
        directory.as_deref(),
        show_mode,
        false,
    );
}

// ── Pending solution pages ──

pub fn queue_pending_solution(store: &mut dyn SettingsStore, topic: &str) {
    store.set(keys::PENDING_SOLUTION, topic);
}

pub fn clear_pending_solution(store: &mut dyn SettingsStore) {
    store.remove(keys::PENDING_SOLUTION);
}

/// Open the help page queued by a remediation offer, if any.
pub fn open_pending_solution(ctx: &mut SupervisorContext) {
    let Some(topic) = ctx
        .store
        .get(keys::PENDING_SOLUTION)
        .filter(|topic| !topic.is_empty())
    else {
        return;
    };
    ctx.store.remove(keys::PENDING_SOLUTION);

    let url = format!("{SOLUTION_URL_BASE}/{topic}");
    debug!("Opening solution page {}", url);
    ctx.spawner
        .shell_execute(LaunchVerb::Open, Path::new(&url), "", None, None, false);
}

/// Record the running supervisor's version for the next generation.
pub fn refresh_version_marker(store: &mut dyn SettingsStore) {
    store.set(keys::CURRENT_VERSION, env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialogs::testing::ScriptedDialogs;
    use crate::core::install::testing::ScriptedInstaller;
    use crate::core::launch::spawn::testing::FakeSpawner;
    use crate::core::settings::{MemorySettingsStore, SettingsStore};
    use crate::core::state::testing::scripted_context;

    #[test]
    fn command_record_needs_five_fields_and_an_operation() {
        assert!(CommandRecord::parse("files\ta.exe\t\t\t1").is_some());
        assert!(CommandRecord::parse("\ta.exe\t\t\t1").is_none());
        assert!(CommandRecord::parse("files\ta.exe\t\t").is_none());
        assert!(CommandRecord::parse("").is_none());
    }

    #[test]
    fn no_record_reports_no_update() {
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, _) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx =
            scripted_context(MemorySettingsStore::new(), dialogs, spawner, installer);

        assert_eq!(check_on_restart_command(&mut ctx), RestartCommand::NoUpdate);
    }

    #[test]
    fn unknown_operation_is_unrecognized_and_consumed() {
        let mut store = MemorySettingsStore::new();
        store.set(keys::ON_RESTART, "frobnicate\tx\t\t\t1");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, _) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        assert_eq!(
            check_on_restart_command(&mut ctx),
            RestartCommand::Unrecognized("frobnicate".to_string())
        );
        // Consumed: asking again finds nothing.
        assert_eq!(check_on_restart_command(&mut ctx), RestartCommand::NoUpdate);
    }

    #[test]
    fn files_operation_extracts_and_records_staging() {
        let root = std::env::temp_dir().join(format!("redline-update-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("update.exe");
        std::fs::write(&archive, "sfx").unwrap();

        let mut store = MemorySettingsStore::new();
        store.set(
            keys::ON_RESTART,
            &format!("files\t{}\t\t\t1", archive.display()),
        );
        let (dialogs, dialog_log) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        let command = check_on_restart_command(&mut ctx);
        assert_eq!(
            command,
            RestartCommand::Install {
                location: InstallLocation::Near,
                silent: false,
            }
        );

        // Extraction ran blocking against the archive.
        let calls = spawn_log.lock().unwrap();
        assert_eq!(calls.shell_calls.len(), 1);
        assert_eq!(calls.shell_calls[0].file, archive);
        assert_eq!(calls.shell_calls[0].params, "-s");
        assert!(calls.shell_calls[0].blocking);
        drop(calls);

        // Not silent: the progress message was shown.
        assert!(!dialog_log.lock().unwrap().messages.is_empty());

        let staging = ctx.store.get(keys::STAGING_DIR).unwrap();
        assert!(staging.contains("_update.exe_tmp_"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn silent_operation_with_new_supervisor_reports_far() {
        let root = std::env::temp_dir().join(format!("redline-update-far-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("update.exe");
        std::fs::write(&archive, "sfx").unwrap();

        let mut store = MemorySettingsStore::new();
        store.set(
            keys::ON_RESTART,
            &format!("silent\t{}\t\t\t1", archive.display()),
        );
        let (dialogs, dialog_log) = ScriptedDialogs::new();
        let (mut spawner, _) = FakeSpawner::new();
        // Simulated extraction drops a new supervisor executable into staging.
        spawner.touch_in_workdir = Some(LAUNCHER_EXE_NAME.to_string());
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        let command = check_on_restart_command(&mut ctx);
        assert_eq!(
            command,
            RestartCommand::Install {
                location: InstallLocation::Far,
                silent: true,
            }
        );
        // Silent: no progress message.
        assert!(dialog_log.lock().unwrap().messages.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn make_unique_path_skips_existing() {
        let root = std::env::temp_dir().join(format!("redline-unique-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let base = root.join("staging");

        assert_eq!(make_unique_path(&base), base);
        std::fs::create_dir_all(&base).unwrap();
        let next = make_unique_path(&base);
        assert_ne!(next, base);
        assert!(next.to_string_lossy().ends_with("_2"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn content_queue_is_drained_and_extracted() {
        let mut store = MemorySettingsStore::new();
        store.set(keys::CONTENT_QUEUE, "2026-07-01=/tmp/bundle_a.exe&2026-07-02=/tmp/bundle_b.exe");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        install_content_items(&mut ctx);

        let calls = spawn_log.lock().unwrap();
        assert_eq!(calls.shell_calls.len(), 2);
        assert!(calls.shell_calls.iter().all(|call| call.blocking));
        drop(calls);

        assert_eq!(ctx.store.get(keys::CONTENT_QUEUE), None);
        // No manifest appeared (fake spawner extracts nothing), so the
        // updated flag stays unset.
        assert_eq!(ctx.store.get(keys::CONTENT_UPDATED), None);
    }

    #[test]
    fn on_quit_restart_resolves_to_the_supervisor() {
        let mut store = MemorySettingsStore::new();
        store.set(keys::ON_QUIT, "restart\t\t\t\t1");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        run_on_quit_command(&mut ctx);

        let calls = spawn_log.lock().unwrap();
        assert_eq!(calls.shell_calls.len(), 1);
        assert_eq!(calls.shell_calls[0].verb, LaunchVerb::Open);
        assert!(calls.shell_calls[0]
            .file
            .to_string_lossy()
            .ends_with(LAUNCHER_EXE_NAME));
        assert!(!calls.shell_calls[0].blocking);
        drop(calls);

        assert_eq!(ctx.store.get(keys::ON_QUIT), None);
    }

    #[test]
    fn malformed_on_quit_record_is_dropped() {
        let mut store = MemorySettingsStore::new();
        store.set(keys::ON_QUIT, "open\tonly-two-fields");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        run_on_quit_command(&mut ctx);
        assert!(spawn_log.lock().unwrap().shell_calls.is_empty());
        assert_eq!(ctx.store.get(keys::ON_QUIT), None);
    }

    #[test]
    fn pending_solution_round_trip() {
        let mut store = MemorySettingsStore::new();
        queue_pending_solution(&mut store, "crashing-before-target-start");
        assert!(store.get(keys::PENDING_SOLUTION).is_some());
        clear_pending_solution(&mut store);
        assert_eq!(store.get(keys::PENDING_SOLUTION), None);

        store.set(keys::PENDING_SOLUTION, "some-topic");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        open_pending_solution(&mut ctx);
        let calls = spawn_log.lock().unwrap();
        assert_eq!(calls.shell_calls.len(), 1);
        assert!(calls.shell_calls[0]
            .file
            .to_string_lossy()
            .contains("some-topic"));
        drop(calls);
        assert_eq!(ctx.store.get(keys::PENDING_SOLUTION), None);
    }
}
