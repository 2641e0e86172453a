pub mod config;
pub mod error;
pub mod logging;
pub mod naming;
pub mod subjects;

pub use config::{ensure_dir, ProjectLayout, Settings};
pub use error::ConfigError;
pub use logging::RunLog;

use std::time::Duration;

/// Format a wall-clock duration the way stage summaries report it,
/// e.g. "1h 23m 45s", "3m 2s", "12s".
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
