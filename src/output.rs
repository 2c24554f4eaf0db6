//! Terminal status lines.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
    pub const SUCCESS: &str = "✓";
    pub const ERROR: &str = "✗";
    pub const WARNING: &str = "⚠";
    pub const INFO: &str = "•";
}

pub fn print_banner(title: &str) {
    println!(
        "{} {}",
        "::".if_supports_color(Stream::Stdout, |s| s.cyan()),
        title.if_supports_color(Stream::Stdout, |s| s.bold())
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        message
    );
}

pub fn print_error(message: &str) {
    eprintln!(
        "{} {}",
        symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
        message.if_supports_color(Stream::Stderr, |s| s.red())
    );
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
        message.if_supports_color(Stream::Stderr, |s| s.yellow())
    );
}

pub fn print_info(message: &str) {
    println!(
        "{} {}",
        symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
        message
    );
}
