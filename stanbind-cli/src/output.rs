//! Cargo-style status output on stderr

/// ANSI color codes
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const BOLD_GREEN: &str = "\x1b[1;32m";
    pub const BOLD_CYAN: &str = "\x1b[1;36m";
    pub const BOLD_YELLOW: &str = "\x1b[1;33m";
    pub const BOLD_RED: &str = "\x1b[1;31m";
}

pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err() && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

/// Format: "   {status} {message}"
fn print_status(status: &str, color: &str, message: &str) {
    if supports_color() {
        eprintln!("{}{:>12}{} {}", color, status, colors::RESET, message);
    } else {
        eprintln!("{:>12} {}", status, message);
    }
}

pub fn compiling(message: &str) {
    print_status("Compiling", colors::BOLD_GREEN, message);
}

pub fn finished(message: &str) {
    print_status("Finished", colors::BOLD_GREEN, message);
}

pub fn cached(message: &str) {
    print_status("Cached", colors::BOLD_CYAN, message);
}

pub fn removing(message: &str) {
    print_status("Removing", colors::BOLD_GREEN, message);
}

pub fn cleaning(message: &str) {
    print_status("Cleaning", colors::BOLD_GREEN, message);
}

pub fn removed(message: &str) {
    print_status("Removed", colors::BOLD_GREEN, message);
}

pub fn skipping(message: &str) {
    print_status("Skipping", colors::BOLD_YELLOW, message);
}

pub fn warning(message: &str) {
    print_status("Warning", colors::BOLD_YELLOW, message);
}

pub fn error(message: &str) {
    print_status("Error", colors::BOLD_RED, message);
}

/// Bold heading on stdout
pub fn heading(text: &str) {
    if supports_color() {
        println!("{}{}{}", colors::BOLD, text, colors::RESET);
    } else {
        println!("{}", text);
    }
}
