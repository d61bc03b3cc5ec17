//! Centralized shell output.
//!
//! Status lines go to stdout and warnings and errors go to stderr, formatted
//! as `{status:>12} {message}`. A shell can also buffer its lines in memory
//! and replay them into a parent shell later, which keeps the output of
//! parallel and nested resolution in declaration order.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// --quiet: warnings and errors only
    Quiet,
    #[default]
    Normal,
    /// --verbose: also print skipped no-op packages
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Detect TTY and use colors if available.
    #[default]
    Auto,
    Always,
    Never,
}

impl std::str::FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(format!(
                "invalid color choice '{}'; expected 'auto', 'always', or 'never'",
                s
            )),
        }
    }
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success statuses (green)
    Resolved,
    Redirected,
    Installed,
    Finished,

    // In-progress statuses (cyan)
    Resolving,
    Fetching,
    Cloning,
    Extracting,
    Applying,

    // Skipped / up-to-date (blue)
    Fresh,

    // Warning statuses (yellow)
    Skipped,
    Warning,

    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Resolved => "Resolved",
            Status::Redirected => "Redirected",
            Status::Installed => "Installed",
            Status::Finished => "Finished",
            Status::Resolving => "Resolving",
            Status::Fetching => "Fetching",
            Status::Cloning => "Cloning",
            Status::Extracting => "Extracting",
            Status::Applying => "Applying",
            Status::Fresh => "Fresh",
            Status::Skipped => "Skipped",
            Status::Warning => "warning",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Resolved | Status::Redirected | Status::Installed | Status::Finished => {
                "\x1b[1;32m"
            }
            Status::Resolving
            | Status::Fetching
            | Status::Cloning
            | Status::Extracting
            | Status::Applying => "\x1b[1;36m",
            Status::Fresh => "\x1b[1;34m",
            Status::Skipped | Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }

    /// Whether the line belongs on the diagnostic stream.
    fn is_diagnostic(&self) -> bool {
        matches!(self, Status::Skipped | Status::Warning | Status::Error)
    }
}

/// Which stream a line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

#[derive(Debug)]
enum Sink {
    Stdio,
    Buffered(Mutex<Vec<(Stream, String)>>),
}

/// Output sink threaded through resolution.
#[derive(Debug)]
pub struct Shell {
    verbosity: Verbosity,
    use_color: bool,
    sink: Sink,
}

impl Shell {
    /// A shell writing to the process's stdout and stderr.
    pub fn stdio(verbosity: Verbosity, color: ColorChoice) -> Self {
        let use_color = match color {
            ColorChoice::Auto => io::stderr().is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };

        Shell {
            verbosity,
            use_color,
            sink: Sink::Stdio,
        }
    }

    /// A shell that keeps its lines until [`Shell::replay_into`].
    pub fn buffered(verbosity: Verbosity) -> Self {
        Shell {
            verbosity,
            use_color: false,
            sink: Sink::Buffered(Mutex::new(Vec::new())),
        }
    }

    /// A buffered child shell with the same settings.
    pub fn child(&self) -> Self {
        Shell {
            verbosity: self.verbosity,
            use_color: self.use_color,
            sink: Sink::Buffered(Mutex::new(Vec::new())),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    /// Print a status message.
    ///
    /// In quiet mode only diagnostic statuses are printed.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.verbosity == Verbosity::Quiet && !status.is_diagnostic() {
            return;
        }

        let stream = if status.is_diagnostic() {
            Stream::Err
        } else {
            Stream::Out
        };
        let line = format!("{} {}", self.format_status(status), msg);
        self.write_line(stream, line);
    }

    /// Print a status message only in verbose mode.
    pub fn verbose(&self, status: Status, msg: impl Display) {
        if self.is_verbose() {
            self.status(status, msg);
        }
    }

    /// Print a warning message.
    pub fn warn(&self, msg: impl Display) {
        tracing::debug!("warning: {}", msg);
        self.status(Status::Warning, msg);
    }

    /// Print an error message.
    pub fn error(&self, msg: impl Display) {
        self.status(Status::Error, msg);
    }

    /// Forward a raw line, e.g. from a child process.
    pub fn raw(&self, stream: Stream, line: impl Into<String>) {
        self.write_line(stream, line.into());
    }

    /// Lines buffered so far.
    pub fn lines(&self) -> Vec<(Stream, String)> {
        match &self.sink {
            Sink::Stdio => Vec::new(),
            Sink::Buffered(buffer) => buffer.lock().map(|b| b.clone()).unwrap_or_default(),
        }
    }

    /// Move every buffered line into `parent`, preserving order.
    pub fn replay_into(&self, parent: &Shell) {
        if let Sink::Buffered(buffer) = &self.sink {
            let lines = match buffer.lock() {
                Ok(mut b) => std::mem::take(&mut *b),
                Err(_) => return,
            };
            for (stream, line) in lines {
                parent.write_line(stream, line);
            }
        }
    }

    fn write_line(&self, stream: Stream, line: String) {
        match &self.sink {
            Sink::Stdio => match stream {
                Stream::Out => {
                    let mut out = io::stdout().lock();
                    let _ = writeln!(out, "{}", line);
                }
                Stream::Err => {
                    let mut err = io::stderr().lock();
                    let _ = writeln!(err, "{}", line);
                }
            },
            Sink::Buffered(buffer) => {
                if let Ok(mut b) = buffer.lock() {
                    b.push((stream, line));
                }
            }
        }
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();

        if self.use_color {
            format!("{}{:>12}\x1b[0m", status.color_code(), text)
        } else {
            format!("{:>12}", text)
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::stdio(Verbosity::Normal, ColorChoice::Auto)
    }
}
