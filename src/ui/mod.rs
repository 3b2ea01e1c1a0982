//! User-facing terminal output. Everything goes to stderr so stdout stays
//! clean for the remote command.

pub mod icons;
pub mod progress;

pub use progress::StatusSpinner;

use console::style;

use icons::{ARROW, WARN};

/// One status line, suppressed by `--quiet`.
pub fn step(quiet: bool, msg: impl AsRef<str>) {
    if !quiet {
        eprintln!("{} {}", ARROW, msg.as_ref());
    }
}

/// A warning the user should see even without `--verbose`.
pub fn warn(msg: impl AsRef<str>) {
    eprintln!("{}{}", WARN, style(msg.as_ref()).yellow());
}
