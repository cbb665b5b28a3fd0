//! Terminal output with colored module tags.
//!
//! `log!("cache"; "...")` always prints; `debug!` prints only when the
//! `verbose` setting is on. Messages tagged `error` or `warning` go to
//! stderr, everything else to stdout.
//!
//! ```ignore
//! log!("export"; "wrote {}", asset.digest_path());
//! debug!("resolve"; "{} candidates for {}", count, path);
//! ```

use crossterm::{
    execute,
    terminal::{Clear, ClearType},
};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Turn `debug!` output on or off for the whole process.
pub fn set_verbose(on: bool) {
    VERBOSE.store(on, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Print a message under a colored `[tag]`.
#[macro_export]
macro_rules! log {
    ($tag:expr; $($arg:tt)*) => {{
        $crate::logger::emit($tag, &format!($($arg)*))
    }};
}

/// Like [`log!`], but only in verbose mode. Arguments are not formatted
/// otherwise.
#[macro_export]
macro_rules! debug {
    ($tag:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::emit($tag, &format!($($arg)*))
        }
    }};
}

#[doc(hidden)]
pub fn emit(tag: &str, message: &str) {
    let line = format!("{} {message}", paint(tag));
    match Stream::for_tag(tag) {
        Stream::Out => write_line(&mut io::stdout().lock(), &line),
        Stream::Err => write_line(&mut io::stderr().lock(), &line),
    }
}

fn write_line(out: &mut impl Write, line: &str) {
    // Output may share the terminal with a progress line
    execute!(out, Clear(ClearType::UntilNewLine)).ok();
    writeln!(out, "{line}").ok();
    out.flush().ok();
}

#[derive(Debug, PartialEq, Eq)]
enum Stream {
    Out,
    Err,
}

impl Stream {
    fn for_tag(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("error") || tag.eq_ignore_ascii_case("warning") {
            Self::Err
        } else {
            Self::Out
        }
    }
}

fn paint(tag: &str) -> String {
    let label = format!("[{tag}]");
    match tag.to_ascii_lowercase().as_str() {
        "error" => label.bright_red().bold().to_string(),
        "warning" => label.bright_magenta().bold().to_string(),
        "cache" => label.bright_blue().bold().to_string(),
        "bundle" | "directive" => label.bright_cyan().bold().to_string(),
        "export" => label.bright_green().bold().to_string(),
        _ => label.bright_yellow().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint_keeps_tag() {
        assert!(paint("cache").contains("[cache]"));
        assert!(paint("Resolve").contains("[Resolve]"));
    }

    #[test]
    fn test_errors_go_to_stderr() {
        assert_eq!(Stream::for_tag("error"), Stream::Err);
        assert_eq!(Stream::for_tag("Warning"), Stream::Err);
        assert_eq!(Stream::for_tag("export"), Stream::Out);
    }

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
