//! Colored terminal output helpers.

use owo_colors::OwoColorize;

/// Writes user-facing lines to stdout, warnings and errors to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn print(&self, text: &str) {
        println!("{}", text);
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".bright_green(), message.bold());
    }

    pub fn kv(&self, key: &str, value: &str) {
        println!("  {:<12} {}", format!("{}:", key).dimmed(), value);
    }

    pub fn status(&self, message: &str) {
        println!("{} {}", "→".dimmed(), message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".bright_red(), message.bright_red());
    }

    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
    }
}
