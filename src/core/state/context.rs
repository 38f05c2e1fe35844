use crate::core::dialogs::{Dialogs, HeadlessDialogs};
use crate::core::install::{FileInstaller, StagingInstaller};
use crate::core::launch::spawn::{NativeSpawner, ProcessSpawner};
use crate::core::params::InstallLocation;
use crate::core::paths::RuntimePaths;
use crate::core::report::ReportLog;
use crate::core::settings::{JsonSettingsStore, SettingsStore};

/// Everything one supervisor generation operates on: the durable store, the
/// external collaborators, and the resolved paths. Handles are injected so
/// every piece can be faked in tests without touching real storage or
/// spawning processes.
pub struct SupervisorContext {
    pub store: Box<dyn SettingsStore>,
    pub dialogs: Box<dyn Dialogs>,
    pub spawner: Box<dyn ProcessSpawner>,
    pub installer: Box<dyn FileInstaller>,
    pub report: ReportLog,
    pub paths: RuntimePaths,
    /// Raw command-line text this generation was started with; forwarded to
    /// the target process on launch.
    pub raw_cmdline: String,
}

impl SupervisorContext {
    /// Production wiring: JSON store and report log in the data directory,
    /// headless dialogs, native process primitives.
    pub fn new(location: InstallLocation, raw_cmdline: String) -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(crate::core::paths::APP_DIR_NAME);
        let _ = std::fs::create_dir_all(&data_dir);

        let store = JsonSettingsStore::open(&data_dir);
        let paths = RuntimePaths::resolve(location, &store);
        let report = ReportLog::new(paths.data_dir());
        let installer = StagingInstaller::new(paths.launcher_dir().to_path_buf());

        Self {
            store: Box::new(store),
            dialogs: Box::new(HeadlessDialogs::new()),
            spawner: Box::new(NativeSpawner::new()),
            installer: Box::new(installer),
            report,
            paths,
            raw_cmdline,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::SupervisorContext;
    use crate::core::dialogs::testing::ScriptedDialogs;
    use crate::core::install::testing::ScriptedInstaller;
    use crate::core::launch::spawn::testing::FakeSpawner;
    use crate::core::paths::RuntimePaths;
    use crate::core::report::ReportLog;
    use crate::core::settings::MemorySettingsStore;

    /// Context over fully scripted collaborators. Configure the fakes before
    /// calling; keep the returned log handles for assertions. Every call gets
    /// its own scratch directory so parallel tests cannot collide.
    pub fn scripted_context(
        store: MemorySettingsStore,
        dialogs: ScriptedDialogs,
        spawner: FakeSpawner,
        installer: ScriptedInstaller,
    ) -> SupervisorContext {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "redline-ctx-{}-{id}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&root);
        SupervisorContext {
            store: Box::new(store),
            dialogs: Box::new(dialogs),
            spawner: Box::new(spawner),
            installer: Box::new(installer),
            report: ReportLog::disabled(),
            paths: RuntimePaths::for_tests(root.join("install"), root.join("data")),
            raw_cmdline: String::new(),
        }
    }
}
