// ─── Stage State Machine ───
// Drives one generation of the supervisor: recover from a crash, pick up a
// pending update, install files, or fall through to launching the target.
// The original recursion is expressed as an explicit (stage, map) loop; a
// stage handler either finishes the process, hands over a changed map, or
// requests a generation change.

use crate::core::dialogs::Dialogs;
use crate::core::error::exit_code;
use crate::core::install::FileInstaller;
use crate::core::launch;
use crate::core::params::{
    AdminState, InstallLocation, InstallStage, ParamMap, KEY_SILENT_OPT,
};
use crate::core::relaunch::{self, Transition};
use crate::core::settings::{keys, SettingsStore};
use crate::core::state::SupervisorContext;
use crate::core::update::{self, RestartCommand};
use crate::core::watchdog::{Counter, Section, Watchdog};

enum StepResult {
    /// The generation is done.
    Exit(i32),
    /// Continue the loop with this map, same process.
    Continue(ParamMap),
    /// Ask the relaunch controller for the next generation.
    Change {
        stage: Option<InstallStage>,
        location: Option<InstallLocation>,
        admin: Option<AdminState>,
        options: ParamMap,
    },
    /// Fall through to the target launch.
    Launch,
}

/// Run the stage machine to completion and return the process exit code.
pub fn run(ctx: &mut SupervisorContext, initial: ParamMap) -> i32 {
    let mut map = initial;
    loop {
        ctx.report.add(1046, format!("stage: '{}'", map.serialize()));

        match step(ctx, &map) {
            StepResult::Exit(code) => return code,
            StepResult::Continue(next) => map = next,
            StepResult::Change {
                stage,
                location,
                admin,
                options,
            } => match relaunch::change_generation(
                ctx, &map, stage, location, admin, &options, false,
            ) {
                Transition::Handled(code) => return code,
                Transition::Continue(next) => map = next,
            },
            StepResult::Launch => {
                // Best-effort housekeeping; neither may block the launch.
                update::install_content_items(ctx);
                update::clean_download_cache(ctx);

                ctx.report.add(
                    1051,
                    format!(
                        "stage: launching target cwd:{:?}",
                        std::env::current_dir().unwrap_or_default()
                    ),
                );
                return launch::launch_target(ctx, &map);
            }
        }
    }
}

fn step(ctx: &mut SupervisorContext, map: &ParamMap) -> StepResult {
    match map.stage() {
        InstallStage::Crashed => step_crashed(ctx),
        InstallStage::Initial => step_initial(ctx),
        InstallStage::CopyFiles => step_copy_files(ctx, map),
        InstallStage::Launch => StepResult::Launch,
    }
}

fn step_crashed(ctx: &mut SupervisorContext) -> StepResult {
    {
        let mut wd = Watchdog::new(ctx.store.as_mut());
        // Crashed before the target ever started?
        if wd.is_section_open(Section::TargetStarted) {
            wd.inc_counter(Counter::StartFailures);
        }
    }

    let details = ctx
        .store
        .get(keys::LAST_CRASH_INFO)
        .unwrap_or_default()
        .replace('\r', "");
    let decision = ctx.dialogs.crash_report(&details);
    if decision.contains("quit") {
        return StepResult::Exit(exit_code::CLEAN);
    }

    StepResult::Change {
        stage: Some(InstallStage::Initial),
        location: None,
        admin: None,
        options: ParamMap::new(),
    }
}

fn step_initial(ctx: &mut SupervisorContext) -> StepResult {
    match update::check_on_restart_command(ctx) {
        RestartCommand::Install { location, silent } => {
            let mut options = ParamMap::new();
            options.set(KEY_SILENT_OPT, if silent { "yes" } else { "no" });
            // May hand over to a freshly extracted executable when the
            // location is far.
            StepResult::Change {
                stage: Some(InstallStage::CopyFiles),
                location: Some(location),
                admin: Some(AdminState::No),
                options,
            }
        }
        RestartCommand::NoUpdate => StepResult::Launch,
        RestartCommand::Unrecognized(operation) => {
            ctx.report.add(
                4047,
                format!("stage: check_on_restart_command returned '{operation}'"),
            );
            StepResult::Launch
        }
    }
}

fn step_copy_files(ctx: &mut SupervisorContext, map: &ParamMap) -> StepResult {
    Watchdog::new(ctx.store.as_mut()).reset();

    let installed = {
        let SupervisorContext {
            installer, store, ..
        } = ctx;
        installer.install_files(store.as_ref(), map.silent())
    };

    if installed {
        update::refresh_version_marker(ctx.store.as_mut());
        ctx.report.add(2050, "stage: install ok");
    } else if map.admin() != AdminState::Yes {
        ctx.report.add(3048, "stage: install failed, trying as admin");
        // The only place an elevated generation is launched; wait for it to
        // finish before continuing here.
        match relaunch::change_generation(
            ctx,
            map,
            None,
            None,
            Some(AdminState::Yes),
            &ParamMap::new(),
            true,
        ) {
            Transition::Handled(_) => {}
            // Elevation spawn failed; retry this stage in-process with the
            // admin-tagged map. Inherited fallback, see DESIGN.md.
            Transition::Continue(degraded) => return StepResult::Continue(degraded),
        }
    } else {
        ctx.report.add(5049, "stage: could not install files");
        let retry = ctx.dialogs.retry_cancel(
            "Could not update due to file conflicts. Please close other applications and retry",
        );
        if retry {
            return StepResult::Continue(map.clone());
        }
    }

    StepResult::Change {
        stage: Some(InstallStage::Launch),
        location: Some(InstallLocation::Near),
        admin: Some(AdminState::No),
        options: ParamMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialogs::testing::ScriptedDialogs;
    use crate::core::install::testing::ScriptedInstaller;
    use crate::core::launch::spawn::testing::FakeSpawner;
    use crate::core::launch::spawn::LaunchVerb;
    use crate::core::paths::TARGET_EXE_NAME;
    use crate::core::settings::{MemorySettingsStore, SettingsStore};
    use crate::core::state::testing::scripted_context;

    /// Companion files, support module and a recorded game tree, so runs can
    /// fall all the way through to the launch.
    fn populate_install(ctx: &mut SupervisorContext) {
        let launcher_dir = ctx.paths.launcher_dir().to_path_buf();
        for relative in [
            "redline/data/ui.pak",
            "redline/redline_net.dll",
            "redline/redline_script.dll",
        ] {
            let path = launcher_dir.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "data").unwrap();
        }
        let core = ctx.paths.core_module();
        std::fs::create_dir_all(core.parent().unwrap()).unwrap();
        std::fs::write(&core, "core module").unwrap();

        let game_dir = launcher_dir.parent().unwrap().join("game");
        std::fs::create_dir_all(&game_dir).unwrap();
        std::fs::write(game_dir.join(TARGET_EXE_NAME), "game").unwrap();
        ctx.store.set(keys::GAME_PATH, game_dir.to_str().unwrap());
    }

    fn map_with(raw: &str) -> ParamMap {
        let mut map = ParamMap::parse(raw);
        map.apply_defaults();
        map
    }

    #[test]
    fn fresh_install_runs_copy_files_then_launches_near_non_admin() {
        let root = std::env::temp_dir().join(format!("redline-stage-fresh-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("update.exe");
        std::fs::write(&archive, "sfx").unwrap();

        let mut store = MemorySettingsStore::new();
        store.set(
            keys::ON_RESTART,
            &format!("files\t{}\t\t\t1", archive.display()),
        );
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, install_calls) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with(""));
        assert_eq!(code, exit_code::CLEAN);

        // Install ran once, not silent.
        assert_eq!(*install_calls.lock().unwrap(), vec![false]);
        // Version marker refreshed by the successful install.
        assert_eq!(
            ctx.store.get(keys::CURRENT_VERSION).as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );

        let log = spawn_log.lock().unwrap();
        // Whole flow stayed in-process: the only shell call is the archive
        // extraction, and the target was created with the final map.
        let process_spawns: Vec<_> = log
            .shell_calls
            .iter()
            .filter(|call| call.params != "-s")
            .collect();
        assert!(process_spawns.is_empty());
        assert_eq!(log.created.len(), 1);
        assert!(log.created[0].contains("install_stage=launch"));
        assert!(log.created[0].contains("install_loc=near"));
        assert!(log.created[0].contains("admin_state=no"));
        assert!(log.created[0].contains("silent_opt=no"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn install_conflict_escalates_to_one_blocking_admin_relaunch() {
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (mut installer, install_calls) = ScriptedInstaller::new();
        installer.results.push_back(false);
        let mut ctx = scripted_context(MemorySettingsStore::new(), dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with("install_stage=copy_files"));
        assert_eq!(code, exit_code::CLEAN);

        assert_eq!(install_calls.lock().unwrap().len(), 1);

        let log = spawn_log.lock().unwrap();
        // Exactly one admin relaunch, blocking, then the launch transition
        // continued in this process.
        let admin_spawns: Vec<_> = log
            .shell_calls
            .iter()
            .filter(|call| call.verb == LaunchVerb::RunElevated)
            .collect();
        assert_eq!(admin_spawns.len(), 1);
        assert!(admin_spawns[0].blocking);
        assert!(admin_spawns[0].params.contains("admin_state=yes"));

        assert_eq!(log.created.len(), 1);
        assert!(log.created[0].contains("install_stage=launch"));
        assert!(log.created[0].contains("install_loc=near"));
        assert!(log.created[0].contains("admin_state=no"));
    }

    #[test]
    fn elevated_install_failure_cancel_ends_the_elevated_generation() {
        let (mut dialogs, _) = ScriptedDialogs::new();
        dialogs.retry_replies.push_back(false);
        let (spawner, spawn_log) = FakeSpawner::new();
        let (mut installer, install_calls) = ScriptedInstaller::new();
        installer.results.push_back(false);
        let mut ctx = scripted_context(MemorySettingsStore::new(), dialogs, spawner, installer);

        let code = run(&mut ctx, map_with("install_stage=copy_files&admin_state=yes"));

        // The launch transition drops admin, which ends the elevated inner
        // generation instead of spawning anything.
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(install_calls.lock().unwrap().len(), 1);
        let log = spawn_log.lock().unwrap();
        assert!(log.shell_calls.is_empty());
        assert!(log.created.is_empty());
    }

    #[test]
    fn elevated_install_failure_retry_reruns_the_stage() {
        let (mut dialogs, _) = ScriptedDialogs::new();
        dialogs.retry_replies.push_back(true);
        let (spawner, _) = FakeSpawner::new();
        let (mut installer, install_calls) = ScriptedInstaller::new();
        installer.results.push_back(false);
        installer.results.push_back(true);
        let mut ctx = scripted_context(MemorySettingsStore::new(), dialogs, spawner, installer);

        let code = run(&mut ctx, map_with("install_stage=copy_files&admin_state=yes"));
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(install_calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn crash_stage_quit_decision_stops_cleanly() {
        let mut store = MemorySettingsStore::new();
        store.set("watchdog/L1", "open");
        store.set(keys::LAST_CRASH_INFO, "assert at frame 10\r\n");
        let (mut dialogs, dialog_log) = ScriptedDialogs::new();
        dialogs.crash_replies.push_back("quit".to_string());
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);

        let code = run(&mut ctx, map_with("install_stage=crashed"));
        assert_eq!(code, exit_code::CLEAN);

        // Crashed before the target started: the streak advanced.
        assert_eq!(ctx.store.get_int("watchdog/CR1"), 1);
        // Carriage returns were normalized out of the dialog text.
        let details = dialog_log.lock().unwrap().crash_details.clone();
        assert_eq!(details, vec!["assert at frame 10\n"]);
        assert!(spawn_log.lock().unwrap().created.is_empty());
    }

    #[test]
    fn consecutive_pre_start_crashes_advance_the_streak_exactly_once_each() {
        let mut store = MemorySettingsStore::new();
        // Three generations in a row enter crashed with the target-start
        // section still open.
        for expected in 1..=3 {
            store.set("watchdog/L1", "open");
            let (mut dialogs, _) = ScriptedDialogs::new();
            dialogs.crash_replies.push_back("quit".to_string());
            let (spawner, _) = FakeSpawner::new();
            let (installer, _) = ScriptedInstaller::new();
            let mut ctx = scripted_context(store, dialogs, spawner, installer);

            run(&mut ctx, map_with("install_stage=crashed"));
            assert_eq!(ctx.store.get_int("watchdog/CR1"), expected);

            // Carry the durable state into the "next generation".
            store = MemorySettingsStore::new();
            if let Some(counter) = ctx.store.get("watchdog/CR1") {
                store.set("watchdog/CR1", &counter);
            }
        }
    }

    #[test]
    fn crash_stage_continue_goes_through_initial_to_launch() {
        let mut store = MemorySettingsStore::new();
        // TargetStarted closed: the crash happened after the target came up,
        // so the start-failure streak must not advance.
        store.set(keys::LAST_CRASH_INFO, "renderer died");
        let (mut dialogs, _) = ScriptedDialogs::new();
        dialogs.crash_replies.push_back("continue".to_string());
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with("install_stage=crashed"));
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(ctx.store.get_int("watchdog/CR1"), 0);
        assert_eq!(spawn_log.lock().unwrap().created.len(), 1);
    }

    #[test]
    fn unknown_stage_value_fails_open_to_launch() {
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(MemorySettingsStore::new(), dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with("install_stage=defrag"));
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(spawn_log.lock().unwrap().created.len(), 1);
    }

    #[test]
    fn unrecognized_restart_command_logs_and_still_launches() {
        let mut store = MemorySettingsStore::new();
        store.set(keys::ON_RESTART, "frobnicate\tx\t\t\t1");
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, spawn_log) = FakeSpawner::new();
        let (installer, _) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with(""));
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(spawn_log.lock().unwrap().created.len(), 1);
    }

    #[test]
    fn silent_install_command_is_carried_into_copy_files() {
        let root =
            std::env::temp_dir().join(format!("redline-stage-silent-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("update.exe");
        std::fs::write(&archive, "sfx").unwrap();

        let mut store = MemorySettingsStore::new();
        store.set(
            keys::ON_RESTART,
            &format!("silent\t{}\t\t\t1", archive.display()),
        );
        let (dialogs, _) = ScriptedDialogs::new();
        let (spawner, _) = FakeSpawner::new();
        let (installer, install_calls) = ScriptedInstaller::new();
        let mut ctx = scripted_context(store, dialogs, spawner, installer);
        populate_install(&mut ctx);

        let code = run(&mut ctx, map_with(""));
        assert_eq!(code, exit_code::CLEAN);
        assert_eq!(*install_calls.lock().unwrap(), vec![true]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
