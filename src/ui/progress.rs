use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::icons::{CHECK, CROSS};

/// Spinner on stderr while waiting on the container. Hidden with `--quiet`.
pub struct StatusSpinner {
    bar: Option<ProgressBar>,
}

impl StatusSpinner {
    pub fn start(msg: impl Into<String>, quiet: bool) -> Self {
        if quiet {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .expect("progress bar template is a valid static string"),
        );
        bar.set_message(msg.into());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.into());
        }
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
            eprintln!("{}{}", CHECK, msg.as_ref());
        }
    }

    pub fn failure(&self, msg: impl AsRef<str>) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
            eprintln!("{}{}", CROSS, style(msg.as_ref()).red());
        }
    }
}

impl Drop for StatusSpinner {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar
            && !bar.is_finished()
        {
            bar.finish_and_clear();
        }
    }
}
