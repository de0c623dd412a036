//! Output formatting module for sshkit
//!
//! Operator-facing messages on stderr. Remote output and logs go through
//! `tracing`; this is only for the final status lines.

use colored::Colorize;

/// Output formatter
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    use_color: bool,
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, verbosity: u8) -> Self {
        if !use_color {
            colored::control::set_override(false);
        }
        Self {
            use_color,
            verbosity,
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an informational message (requires -v)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "INFO:".cyan(), message);
        } else {
            eprintln!("INFO: {}", message);
        }
    }
}
