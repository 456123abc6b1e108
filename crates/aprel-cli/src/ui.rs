//! Console output for operators.
//!
//! Progress goes to stderr so stdout stays clean for `current_version` and
//! `versions`, which are meant to be consumed by scripts.

use aprel_core::Reporter;
use aprel_schema::Diagnostic;
use crossterm::style::Stylize;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        eprintln!();
        eprintln!("{}", title.bold());
    }

    fn step(&self, msg: &str) {
        eprintln!("{} {msg}", "→".cyan());
    }

    fn info(&self, msg: &str) {
        eprintln!("  {}", msg.dark_grey());
    }

    fn success(&self, msg: &str) {
        eprintln!("{} {}", "✓".green(), msg.green());
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {}", "!".yellow(), msg.yellow());
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {}", "✗".red(), msg.red());
    }

    fn diagnostic(&self, diagnostic: &Diagnostic) {
        for line in diagnostic.to_string().lines() {
            eprintln!("    {}", line.dark_grey());
        }
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        let noun = if count == 1 { "artifact" } else { "artifacts" };
        eprintln!(
            "{} {count} {noun} {action} {}",
            "✓".green(),
            format!("in {elapsed_secs:.1}s").dark_grey()
        );
    }
}
