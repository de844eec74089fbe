//! Unified logging and progress UI.
//!
//! [`Notifier`] routes messages either to the `log` facade (set up by `main`
//! with `env_logger`) or to `indicatif` spinners/bars, under a single
//! verbosity switch:
//! - [`VerbosityLevel::Quiet`] → no text logs; shows a live spinner and one
//!   progress bar counting archived images.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] → standard logs.
//!
//! [`Notifier::report`] is for lines the user must always see (shared layers,
//! detected sources, written files); in Quiet mode they are printed above the
//! progress bars.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::cell::RefCell;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Progress bars, no text logs
    Info = 1,  // Text logs at info level
    Debug = 2, // Text logs at debug level
    Trace = 3, // Text logs at trace level
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    multi_progress: Option<MultiProgress>,
    active_spinner: RefCell<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);
        let multi_progress = if verbosity == VerbosityLevel::Quiet {
            Some(MultiProgress::new())
        } else {
            None
        };

        Self {
            verbosity,
            multi_progress,
            active_spinner: RefCell::new(None),
        }
    }

    pub fn info(&self, message: &str) {
        match self.verbosity {
            VerbosityLevel::Quiet => {
                // Lazy initialize spinner on first info call
                if self.active_spinner.borrow().is_none() {
                    if let Some(multi_progress) = &self.multi_progress {
                        let spinner = multi_progress.add(ProgressBar::new_spinner());
                        spinner.set_style(
                            ProgressStyle::default_spinner()
                                .template("{spinner:.green} {msg}")
                                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                        );
                        spinner.enable_steady_tick(Duration::from_millis(100));
                        *self.active_spinner.borrow_mut() = Some(spinner);
                    }
                }

                if let Some(spinner) = self.active_spinner.borrow().as_ref() {
                    spinner.set_message(message.to_string());
                }
            }
            _ => log::info!("{}", message),
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            log::debug!("{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => self.print_above(multi_progress, message),
            None => log::warn!("{}", message),
        }
    }

    /// Always shown, whatever the verbosity.
    pub fn report(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => self.print_above(multi_progress, message),
            None => log::info!("{}", message),
        }
    }

    pub fn create_progress_bar(&self, length: u64, message: &str) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let progress_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let progress_bar = multi_progress.add(ProgressBar::new(length));
        progress_bar.set_style(progress_style);
        progress_bar.set_message(message.to_string());
        Some(progress_bar)
    }

    /// Periodic textual progress for non-Quiet modes.
    pub fn progress(&self, current: u64, total: u64, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            log::debug!("{}: {}/{}", message, current, total);
        }
    }

    /// Clears the spinner, if any.
    pub fn finish(&self) {
        if let Some(spinner) = self.active_spinner.borrow_mut().take() {
            spinner.finish_and_clear();
        }
    }

    pub fn is_spinning(&self) -> bool {
        self.active_spinner.borrow().is_some()
    }

    pub fn use_beautiful_progress(&self) -> bool {
        self.verbosity == VerbosityLevel::Quiet
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }

    fn print_above(&self, multi_progress: &MultiProgress, message: &str) {
        if multi_progress.is_hidden() || multi_progress.println(message).is_err() {
            eprintln!("{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(VerbosityLevel::from(0), VerbosityLevel::Quiet);
        assert_eq!(VerbosityLevel::from(2), VerbosityLevel::Debug);
        assert_eq!(VerbosityLevel::from(9), VerbosityLevel::Trace);
        assert_eq!(VerbosityLevel::Quiet.to_log_level(), LevelFilter::Warn);
        assert_eq!(VerbosityLevel::Info.to_log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_progress_bars_only_in_quiet_mode() {
        let quiet = Notifier::new(0);
        assert!(quiet.use_beautiful_progress());
        assert!(quiet.create_progress_bar(3, "layers").is_some());
        quiet.info("working");
        assert!(quiet.is_spinning());
        quiet.finish();
        assert!(!quiet.is_spinning());

        let verbose = Notifier::new(1);
        assert!(!verbose.use_beautiful_progress());
        assert!(verbose.create_progress_bar(3, "layers").is_none());
        assert_eq!(verbose.verbosity_level(), VerbosityLevel::Info);
    }
}
