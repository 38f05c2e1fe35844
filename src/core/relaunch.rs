// ─── Relaunch Controller ───
// Decides whether a parameter-map change can continue in this process or
// needs a fresh generation of the supervisor. Install location and admin
// rights shape the process environment (working directory, module search
// path, token), so changing either always means a new process.

use std::path::PathBuf;

use crate::core::error::exit_code;
use crate::core::launch::spawn::{LaunchVerb, ProcessSpawner};
use crate::core::params::{AdminState, InstallLocation, InstallStage, ParamMap};
use crate::core::paths::LAUNCHER_EXE_NAME;
use crate::core::state::SupervisorContext;

/// Outcome of [`change_generation`].
#[derive(Debug)]
pub enum Transition {
    /// The change was carried out in another generation (or needed none);
    /// this generation is done with the given exit code.
    Handled(i32),
    /// No process boundary had to be crossed; the caller continues the stage
    /// machine in-process with this map.
    Continue(ParamMap),
}

/// Build the next generation's map from `old` (a `None` field means
/// "unchanged") plus `options`, then decide how to get there.
///
/// This is the only place an elevated generation is created. Dropping from
/// admin to non-admin never relaunches: the elevated generation is always an
/// inner child, so finishing it is how rights are dropped.
pub fn change_generation(
    ctx: &mut SupervisorContext,
    old: &ParamMap,
    stage: Option<InstallStage>,
    location: Option<InstallLocation>,
    admin: Option<AdminState>,
    options: &ParamMap,
    blocking: bool,
) -> Transition {
    let mut new_map = old.clone();
    if let Some(stage) = stage {
        new_map.set_stage(stage);
    }
    if let Some(location) = location {
        new_map.set_location(location);
    }
    if let Some(admin) = admin {
        new_map.set_admin(admin);
    }
    new_map.merge(options);

    ctx.report.add(
        1045,
        format!(
            "change_generation: '{}' -> '{}'",
            old.serialize(),
            new_map.serialize()
        ),
    );

    if old.location() == new_map.location() && old.admin() == new_map.admin() {
        return Transition::Continue(new_map);
    }

    if old.admin() == AdminState::Yes && new_map.admin() == AdminState::No {
        return Transition::Handled(exit_code::CLEAN);
    }

    if spawn_generation(ctx, &new_map, blocking) {
        return Transition::Handled(exit_code::CLEAN);
    }

    // Degraded fallback: run the stage machine here even though the process
    // environment was not re-established.
    ctx.report.add(
        4046,
        "change_generation: relaunch spawn failed, continuing in-process",
    );
    Transition::Continue(new_map)
}

/// Start a new supervisor generation carrying `map` on its command line.
/// Returns whether the shell launch started; with `blocking`, waits for the
/// child generation to finish first.
pub fn spawn_generation(ctx: &mut SupervisorContext, map: &ParamMap, blocking: bool) -> bool {
    let verb = if map.admin() == AdminState::Yes {
        LaunchVerb::RunElevated
    } else {
        LaunchVerb::Open
    };
    let exe = match map.location() {
        // Far generations run the freshly extracted executable from the
        // working directory, not the installed one.
        InstallLocation::Far => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(LAUNCHER_EXE_NAME),
        InstallLocation::Near => ctx.paths.launcher_exe(),
    };
    ctx.spawner
        .shell_execute(verb, &exe, &map.serialize(), None, None, blocking)
}
