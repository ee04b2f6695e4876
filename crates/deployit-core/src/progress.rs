//! Progress sinks handed to collaborators.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

/// Width of the label column in status lines.
pub const STATUS_WIDTH: usize = 80;

/// Where collaborator progress goes. Write-only; nothing reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressSink {
    /// Progress is dropped.
    #[default]
    Discard,
    /// Progress is streamed to the process's standard output.
    Stdout,
}

impl ProgressSink {
    pub fn for_verbosity(verbose: bool) -> Self {
        if verbose { Self::Stdout } else { Self::Discard }
    }

    /// Open a writer for this sink.
    pub fn writer(&self) -> Box<dyn Write + Send> {
        match self {
            Self::Discard => Box::new(io::sink()),
            Self::Stdout => Box::new(io::stdout()),
        }
    }
}

/// Format a status line: the label padded to [`STATUS_WIDTH`], then the status.
pub fn status_line(label: &str, status: &str) -> String {
    format!("{:<width$} {}", label, status, width = STATUS_WIDTH)
}

/// Render a duration rounded to milliseconds: `350ms`, `1.25s`, `2m3.5s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = (elapsed.as_micros() + 500) / 1000;
    if ms == 0 {
        return "0s".to_string();
    }
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let secs = (ms / 1000) % 60;
    let frac = ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let _ = write!(out, "{}", secs);
    if frac > 0 {
        let digits = format!("{:03}", frac);
        let _ = write!(out, ".{}", digits.trim_end_matches('0'));
    }
    out.push('s');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_selects_sink() {
        assert_eq!(ProgressSink::for_verbosity(true), ProgressSink::Stdout);
        assert_eq!(ProgressSink::for_verbosity(false), ProgressSink::Discard);
        assert_eq!(ProgressSink::default(), ProgressSink::Discard);
    }

    #[test]
    fn test_status_line_pads_label() {
        let line = status_line("Update scripts", "OK");
        assert_eq!(line.len(), STATUS_WIDTH + 3);
        assert!(line.starts_with("Update scripts "));
        assert!(line.ends_with(" OK"));
    }

    #[test]
    fn test_status_line_keeps_long_labels() {
        let label = "x".repeat(STATUS_WIDTH + 5);
        assert_eq!(status_line(&label, "OK"), format!("{} OK", label));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
        assert_eq!(format_elapsed(Duration::from_micros(400)), "0s");
        assert_eq!(format_elapsed(Duration::from_micros(350_400)), "350ms");
        assert_eq!(format_elapsed(Duration::from_millis(1250)), "1.25s");
        assert_eq!(format_elapsed(Duration::from_secs(2)), "2s");
        assert_eq!(format_elapsed(Duration::from_millis(123_500)), "2m3.5s");
        assert_eq!(format_elapsed(Duration::from_secs(3661)), "1h1m1s");
    }
}
