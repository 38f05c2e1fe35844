pub mod core;

use tracing_subscriber::EnvFilter;

use crate::core::dialogs::Dialogs;
use crate::core::launch::spawn;
use crate::core::params::ParamMap;
use crate::core::settings::{keys, SettingsStore};
use crate::core::stage;
use crate::core::state::SupervisorContext;
use crate::core::update;

/// Supervisor entry point: parse the parameter map from the command line,
/// run the stage machine, and exit with its code (the target's exit code
/// when the target ran).
pub fn run() -> i32 {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,redline_lib=debug")),
        )
        .init();

    tracing::info!("Redline launch supervisor starting...");

    let raw_cmdline = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    run_with_cmdline(&raw_cmdline)
}

fn run_with_cmdline(raw_cmdline: &str) -> i32 {
    let mut map = ParamMap::parse(raw_cmdline);
    map.apply_defaults();

    // The location decides where this generation's files live, so the
    // context is wired from it.
    let mut ctx = SupervisorContext::new(map.location(), raw_cmdline.to_string());

    ctx.dialogs.show_splash();
    update::clear_pending_solution(ctx.store.as_mut());

    // Environment facts recorded for report-log correlation.
    update::refresh_version_marker(ctx.store.as_mut());
    ctx.store.set(
        keys::OS_VERSION,
        &sysinfo::System::long_os_version().unwrap_or_default(),
    );
    ctx.store.set(
        keys::IS_ADMIN,
        if spawn::is_elevated() { "1" } else { "0" },
    );

    let pid = std::process::id();
    ctx.report.add(
        1041,
        format!(
            "* Launch * pid:{pid} '{}' path set from {} '{}'",
            std::env::current_exe()
                .map(|exe| exe.display().to_string())
                .unwrap_or_default(),
            match map.location() {
                crate::core::params::InstallLocation::Far => "settings store",
                crate::core::params::InstallLocation::Near => "module location",
            },
            ctx.paths.launcher_dir().display()
        ),
    );

    let code = stage::run(&mut ctx, map);

    ctx.report.add(1044, format!("* End ({code}) * pid:{pid}"));
    code
}
