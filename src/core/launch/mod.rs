// ─── Launch Supervisor ───
// Wraps the one high-risk operation (starting the target process) in the
// durable watchdog sections, then performs the launch: preconditions,
// create-suspended, support-module injection, resume, unbounded wait.

pub mod spawn;

use std::time::Duration;

use sysinfo::System;

use crate::core::dialogs::Dialogs;
use crate::core::error::{exit_code, LauncherError};
use crate::core::params::{AdminState, ParamMap, KEY_DONE_ADMIN};
use crate::core::paths::{self, TARGET_EXE_NAME};
use crate::core::relaunch;
use crate::core::state::SupervisorContext;
use crate::core::update;
use crate::core::watchdog::{
    offer_rollback, offer_settings_reset, Counter, Section, Watchdog, LOADING_FAILURE_LIMIT,
    START_FAILURE_LIMIT,
};
use spawn::{ProcessSpawner, SpawnError, TargetProcess};

/// Companion files required under the launcher directory, with the
/// machine-readable tag reported when one is missing.
const COMPANION_FILES: &[(&str, &str)] = &[
    ("redline/data/ui.pak", "data-files-missing"),
    ("redline/redline_net.dll", "net-module-missing"),
    ("redline/redline_script.dll", "script-module-missing"),
];

/// Files that must not exist in the game directory: the target would load
/// them instead of the support modules next to the supervisor.
const FORBIDDEN_GAME_FILES: &[&str] = &["net_r.dll", "gui_r.dll", "xml_r.dll", "libcurl.dll"];

/// Launch the target under watchdog supervision and return the supervisor's
/// exit code.
///
/// Section/counter policy, evaluated in order on every attempt:
/// an open `Alive` section means the previous run ended uncleanly; a closed
/// `TargetStarted` section means the last run got the target up, so the
/// start-failure streak resets; streaks at their limits trigger one
/// remediation offer each; then both sections open and the attempt runs.
pub fn launch_target(ctx: &mut SupervisorContext, map: &ParamMap) -> i32 {
    {
        let mut wd = Watchdog::new(ctx.store.as_mut());
        let unclean = wd.is_section_open(Section::Alive);
        wd.set_unclean_stop(unclean);

        // Only consecutive pre-start failures count.
        if !wd.is_section_open(Section::TargetStarted) {
            wd.clear_counter(Counter::StartFailures);
        }
    }

    if Watchdog::new(ctx.store.as_mut()).counter(Counter::StartFailures) >= START_FAILURE_LIMIT {
        Watchdog::new(ctx.store.as_mut()).reset();
        let SupervisorContext { store, dialogs, .. } = ctx;
        offer_rollback(store.as_mut(), dialogs.as_mut());
    }

    {
        let mut wd = Watchdog::new(ctx.store.as_mut());
        if wd.is_section_open(Section::LoadingReached) {
            // Did not reach the loading screen last time; consume the marker.
            wd.inc_counter(Counter::LoadingFailures);
            wd.completed_section(Section::LoadingReached);
        } else {
            wd.clear_counter(Counter::LoadingFailures);
        }
    }

    if Watchdog::new(ctx.store.as_mut()).counter(Counter::LoadingFailures) >= LOADING_FAILURE_LIMIT
    {
        Watchdog::new(ctx.store.as_mut()).clear_counter(Counter::LoadingFailures);
        let SupervisorContext { store, dialogs, .. } = ctx;
        offer_settings_reset(store.as_mut(), dialogs.as_mut());
    }

    {
        let mut wd = Watchdog::new(ctx.store.as_mut());
        wd.begin_section(Section::Alive); // closed below on a clean exit
        wd.begin_section(Section::TargetStarted); // closed by the target's milestone callback
    }

    let code = do_launch(ctx, map);

    if code == exit_code::CLEAN {
        let mut wd = Watchdog::new(ctx.store.as_mut());
        wd.clear_counter(Counter::StartFailures);
        wd.completed_section(Section::Alive);
    }

    code
}

fn fatal(ctx: &mut SupervisorContext, event_id: u32, tag: &str, message: &str, code: i32) -> i32 {
    ctx.report.add(event_id, format!("do_launch: {tag}"));
    ctx.dialogs.error_box(message, tag);
    code
}

fn do_launch(ctx: &mut SupervisorContext, map: &ParamMap) -> i32 {
    if !terminate_stray_target() {
        return fatal(
            ctx,
            5055,
            "instance-blocked",
            "Redline couldn't start because another instance of the game is running.",
            exit_code::INSTANCE_BLOCKED,
        );
    }

    let game_dir = match paths::game_path(ctx.store.as_ref()) {
        Ok(path) => path,
        Err(LauncherError::GamePathNotAscii(path)) => {
            return fatal(
                ctx,
                5056,
                "game-path-unicode",
                &format!(
                    "The path to your installation of the game contains unsupported characters ({}). \
                     Please move your game installation to a path that contains only standard ASCII \
                     characters and reinstall Redline.",
                    path.display()
                ),
                exit_code::GAME_PATH,
            );
        }
        Err(_) => {
            return fatal(
                ctx,
                5056,
                "game-path-missing",
                "The game installation is not recorded. Please reinstall Redline.",
                exit_code::GAME_PATH,
            );
        }
    };

    let launcher_dir = ctx.paths.launcher_dir().to_path_buf();
    if game_dir.to_string_lossy().contains(';') || launcher_dir.to_string_lossy().contains(';') {
        // Degrades some module lookups but is survivable; warn only.
        ctx.dialogs.message(
            "The path to your installation of Redline or the game contains a ';' (semicolon).\n\n \
             If you experience problems, move your installation(s) to a path that does not contain \
             a semicolon.",
        );
    }

    let _ = std::env::set_current_dir(&launcher_dir);

    for (relative, tag) in COMPANION_FILES {
        if !launcher_dir.join(relative).exists() {
            return fatal(
                ctx,
                5057,
                tag,
                &format!("Load failed. Please ensure that '{relative}' is installed correctly."),
                exit_code::DATA_FILES_MISSING,
            );
        }
    }

    let target_exe = game_dir.join(TARGET_EXE_NAME);
    if !target_exe.exists() {
        return fatal(
            ctx,
            5057,
            "target-exe-missing",
            &format!(
                "Load failed. Could not find {TARGET_EXE_NAME} in {}.",
                game_dir.display()
            ),
            exit_code::DATA_FILES_MISSING,
        );
    }

    for name in FORBIDDEN_GAME_FILES {
        if game_dir.join(name).exists() {
            return fatal(
                ctx,
                5058,
                "file-clash",
                &format!(
                    "Load failed. {name} exists in the game directory. Please delete before \
                     continuing."
                ),
                exit_code::FILE_CLASH,
            );
        }
    }

    // The elevation marker is between supervisor generations only; the
    // target gets the command line without it.
    let done_admin = map.get(KEY_DONE_ADMIN) == Some("yes");
    let mut target_map = map.clone();
    target_map.remove(KEY_DONE_ADMIN);
    let target_cmdline = target_map.serialize();

    Watchdog::new(ctx.store.as_mut()).begin_section(Section::LoadingReached);

    let support_dir = ctx.paths.support_dir();
    let mut target = match ctx
        .spawner
        .create_suspended(&target_exe, &target_cmdline, &support_dir)
    {
        Ok(target) => target,
        Err(SpawnError::ElevationRequired) if !done_admin => {
            ctx.report
                .add(3059, "do_launch: elevation required, relaunching as admin");
            let mut elevated = map.clone();
            elevated.set_admin(AdminState::Yes);
            elevated.set(KEY_DONE_ADMIN, "yes");
            if !relaunch::spawn_generation(ctx, &elevated, false) {
                ctx.report
                    .add(5060, "do_launch: elevated relaunch could not be started");
            }
            return exit_code::ELEVATION_PENDING;
        }
        Err(err) => {
            let message = err.to_string();
            return fatal(
                ctx,
                5061,
                &format!("createprocess-fail;{message}"),
                &format!(
                    "Could not start the game. Please try restarting, or if the problem \
                     persists, contact Redline support.\n\n[{message}]"
                ),
                exit_code::SPAWN_FAILED,
            );
        }
    };

    let core_module = ctx.paths.core_module();
    if !core_module.exists() {
        target.terminate(1);
        return fatal(
            ctx,
            5062,
            "core-missing",
            "Load failed. Please ensure that the support module is in the redline directory \
             within the Redline root directory.",
            exit_code::CORE_UNUSABLE,
        );
    }

    // A probe load in this process surfaces missing runtime dependencies
    // before the target is touched.
    if let Err(err) = ctx.spawner.probe_module(&core_module) {
        target.terminate(1);
        return fatal(
            ctx,
            5063,
            "runtime-deps-missing",
            &format!(
                "Load failed. Please ensure that the required runtime packages are correctly \
                 installed.\n\n[{err}]"
            ),
            exit_code::CORE_UNUSABLE,
        );
    }

    // Let the splash finish its minimum display time while the target is
    // still suspended.
    ctx.dialogs.hide_splash(true);

    if let Err(err) = target.inject_module(&core_module) {
        // The run continues; an unmodified target never closes its milestone
        // sections, which is what the next generation's watchdog reads.
        ctx.report
            .add(4064, format!("do_launch: injection failed: {err}"));
    }

    ctx.dialogs.hide_splash(false);

    // Only on-quit commands written by the target during this run may
    // execute afterwards.
    update::clear_on_quit_command(ctx.store.as_mut());

    if let Err(err) = target.resume() {
        ctx.report
            .add(4065, format!("do_launch: resume failed: {err}"));
    }

    let target_exit = target.wait_for_exit();
    drop(target);

    update::run_on_quit_command(ctx);
    update::open_pending_solution(ctx);

    target_exit
}

/// Attempt to clear a stray instance of the target process. Returns whether
/// the way is clear.
fn terminate_stray_target() -> bool {
    let mut system = System::new_all();
    system.refresh_all();

    let strays: Vec<_> = system
        .processes()
        .values()
        .filter(|process| process.name().eq_ignore_ascii_case(TARGET_EXE_NAME))
        .collect();
    if strays.is_empty() {
        return true;
    }

    for process in &strays {
        process.kill();
    }

    // Short grace period; a survivor means locked game files ahead.
    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(250));
        let mut system = System::new_all();
        system.refresh_all();
        let still_running = system
            .processes()
            .values()
            .any(|process| process.name().eq_ignore_ascii_case(TARGET_EXE_NAME));
        if !still_running {
            return true;
        }
    }
    false
}
