// ─── Dialog Collaborators ───
// The GUI surface (splash, crash dialog, message boxes) is an external
// collaborator. The supervisor only needs these narrow blocking calls; the
// production implementation here is headless and answers with safe defaults.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

/// Minimum time the splash stays visible once shown.
pub const SPLASH_MINIMUM: Duration = Duration::from_secs(2);

/// Opaque blocking calls into the user-facing dialog layer.
pub trait Dialogs {
    fn show_splash(&mut self);

    /// Hide the splash. With `wait_minimum`, blocks until the minimum display
    /// duration has elapsed since `show_splash`.
    fn hide_splash(&mut self, wait_minimum: bool);

    /// Post-crash dialog. Returns the user's decision; a result containing
    /// `"quit"` stops the supervisor.
    fn crash_report(&mut self, details: &str) -> String;

    /// Retry/cancel prompt; `true` means retry.
    fn retry_cancel(&mut self, message: &str) -> bool;

    /// Yes/no confirmation; `true` means yes.
    fn confirm(&mut self, message: &str) -> bool;

    fn message(&mut self, message: &str);

    /// Blocking fatal-error box. `tag` is the machine-readable marker that
    /// also lands in the report log.
    fn error_box(&mut self, message: &str, tag: &str);
}

/// Headless implementation used when no dialog frontend is wired in: logs
/// everything and picks the non-interactive answer.
#[derive(Debug, Default)]
pub struct HeadlessDialogs {
    splash_shown_at: Option<Instant>,
}

impl HeadlessDialogs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialogs for HeadlessDialogs {
    fn show_splash(&mut self) {
        self.splash_shown_at = Some(Instant::now());
    }

    fn hide_splash(&mut self, wait_minimum: bool) {
        let Some(shown_at) = self.splash_shown_at else {
            return;
        };
        if wait_minimum {
            let elapsed = shown_at.elapsed();
            if elapsed < SPLASH_MINIMUM {
                std::thread::sleep(SPLASH_MINIMUM - elapsed);
            }
        } else {
            self.splash_shown_at = None;
        }
    }

    fn crash_report(&mut self, details: &str) -> String {
        warn!("Previous run crashed: {}", details);
        "continue".to_string()
    }

    fn retry_cancel(&mut self, message: &str) -> bool {
        warn!("{} (headless: cancel)", message);
        false
    }

    fn confirm(&mut self, message: &str) -> bool {
        info!("{} (headless: no)", message);
        false
    }

    fn message(&mut self, message: &str) {
        info!("{}", message);
    }

    fn error_box(&mut self, message: &str, tag: &str) {
        error!(tag, "{}", message);
    }
}
