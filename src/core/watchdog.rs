// ─── Crash/Launch Watchdog ───
// Durable open/closed sections and consecutive-failure counters around the
// launch of the target process. Sections left open by a crash are exactly how
// the next generation detects the crash: no in-memory state survives.

use std::path::PathBuf;

use crate::core::dialogs::Dialogs;
use crate::core::settings::SettingsStore;
use crate::core::update::queue_pending_solution;

/// Consecutive crashes before the target started at all -> offer rollback help.
pub const START_FAILURE_LIMIT: i64 = 3;
/// Consecutive runs that never reached the loading screen -> offer settings reset.
pub const LOADING_FAILURE_LIMIT: i64 = 5;

/// Durable markers bracketing one launch attempt.
///
/// - `Alive` is opened before the launch sequence and closed only on a clean
///   (zero) target exit.
/// - `TargetStarted` is opened before the launch sequence and closed when the
///   target reports it came up.
/// - `LoadingReached` is opened just before process creation and closed when
///   the target reports its loading screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Alive,
    TargetStarted,
    LoadingReached,
}

impl Section {
    fn key(self) -> &'static str {
        match self {
            Section::Alive => "watchdog/L0",
            Section::TargetStarted => "watchdog/L1",
            Section::LoadingReached => "watchdog/L2",
        }
    }

    const ALL: [Section; 3] = [Section::Alive, Section::TargetStarted, Section::LoadingReached];
}

/// Consecutive-failure counters, one per failure phase so remediation stays
/// specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Crashes before the target started (guards [`Section::TargetStarted`]).
    StartFailures,
    /// Runs that never reached the loading screen (guards [`Section::LoadingReached`]).
    LoadingFailures,
}

impl Counter {
    fn key(self) -> &'static str {
        match self {
            Counter::StartFailures => "watchdog/CR1",
            Counter::LoadingFailures => "watchdog/CR2",
        }
    }

    const ALL: [Counter; 2] = [Counter::StartFailures, Counter::LoadingFailures];
}

const UNCLEAN_STOP_KEY: &str = "watchdog/unclean-stop";

/// View over the settings store scoped to the watchdog keys.
pub struct Watchdog<'a> {
    store: &'a mut dyn SettingsStore,
}

impl<'a> Watchdog<'a> {
    pub fn new(store: &'a mut dyn SettingsStore) -> Self {
        Self { store }
    }

    pub fn is_section_open(&self, section: Section) -> bool {
        self.store.get(section.key()).as_deref() == Some("open")
    }

    pub fn begin_section(&mut self, section: Section) {
        self.store.set(section.key(), "open");
    }

    pub fn completed_section(&mut self, section: Section) {
        self.store.remove(section.key());
    }

    pub fn counter(&self, counter: Counter) -> i64 {
        self.store.get_int(counter.key())
    }

    pub fn inc_counter(&mut self, counter: Counter) -> i64 {
        let value = self.counter(counter) + 1;
        self.store.set_int(counter.key(), value);
        value
    }

    pub fn clear_counter(&mut self, counter: Counter) {
        self.store.remove(counter.key());
    }

    /// Clear every section and counter. Used before a file install and when
    /// remediation resets the slate.
    pub fn reset(&mut self) {
        for section in Section::ALL {
            self.completed_section(section);
        }
        for counter in Counter::ALL {
            self.clear_counter(counter);
        }
    }

    pub fn set_unclean_stop(&mut self, unclean: bool) {
        self.store.set(UNCLEAN_STOP_KEY, if unclean { "1" } else { "0" });
    }

    pub fn was_unclean_stop(&self) -> bool {
        self.store.get(UNCLEAN_STOP_KEY).as_deref() == Some("1")
    }
}

// ── Remediation offers ──
// Surfaced to the user as optional actions; the outcome is not fed back into
// the state machine.

/// Offered after repeated crashes before the target ever started.
pub fn offer_rollback(store: &mut dyn SettingsStore, dialogs: &mut dyn Dialogs) {
    if dialogs.confirm(
        "Are you having problems running Redline?\n\nDo you want to revert to an earlier version?",
    ) {
        dialogs.message(
            "Your browser will display a help page once the launcher closes.\n\nIf the page fails to load, please go to redline.network",
        );
        queue_pending_solution(store, "crashing-before-target-start");
    }
}

/// Offered after repeated runs that never reached the loading screen. Renames
/// the game's settings file to a `.bak` sibling, since a broken settings file
/// is the usual culprit.
pub fn offer_settings_reset(store: &mut dyn SettingsStore, dialogs: &mut dyn Dialogs) {
    offer_settings_reset_at(store, dialogs, game_settings_file());
}

fn game_settings_file() -> PathBuf {
    dirs::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Velocity")
        .join("settings.cfg")
}

fn offer_settings_reset_at(
    store: &mut dyn SettingsStore,
    dialogs: &mut dyn Dialogs,
    settings_file: PathBuf,
) {
    if settings_file.exists() {
        let confirmed = dialogs.confirm(
            "There seems to be a problem launching Redline.\nResetting game settings can sometimes fix this problem.\n\nDo you want to reset game settings now?",
        );
        if !confirmed {
            return;
        }
        let backup = settings_file.with_extension("cfg.bak");
        let _ = std::fs::remove_file(&backup);
        let _ = std::fs::rename(&settings_file, &backup);
        if settings_file.exists() {
            dialogs.error_box(
                &format!("File could not be reset: {:?}", settings_file),
                "settings-reset-failed",
            );
        } else {
            dialogs.message("Game settings have been reset.\n\nPress OK to continue.");
        }
    } else if dialogs.confirm(
        "Are you having problems running Redline?\n\nDo you want to see some online help?",
    ) {
        dialogs.message(
            "Your browser will display a help page once the launcher closes.\n\nIf the page fails to load, please go to redline.network",
        );
        queue_pending_solution(store, "crashing-before-target-load");
    }
}
