//! Status display adapter

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Listening,
    Speaking,
    /// Blank screen
    Idle,
}

/// Renders a status glyph. Implementations keep no session state.
pub trait StatusDisplay {
    fn show_status(&mut self, status: DisplayStatus);
}

/// Display that writes status changes to the log
#[derive(Debug, Default)]
pub struct LogDisplay {
    last: Option<DisplayStatus>,
}

impl StatusDisplay for LogDisplay {
    fn show_status(&mut self, status: DisplayStatus) {
        if self.last == Some(status) {
            return;
        }
        self.last = Some(status);
        match status {
            DisplayStatus::Listening => info!("👂 Listening..."),
            DisplayStatus::Speaking => info!("🗣️ Speaking..."),
            DisplayStatus::Idle => info!("💤 Idle"),
        }
    }
}
