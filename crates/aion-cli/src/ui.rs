//! Small colored output helpers shared by commands.

use colored::Colorize;

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Errors go to stderr so piped JSON stays clean.
pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

pub fn warn(msg: &str) {
    eprintln!("  {} {}", "-".bright_yellow(), msg.yellow());
}

pub fn hint(msg: &str) {
    println!("  {}", msg.dimmed());
}

pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}
