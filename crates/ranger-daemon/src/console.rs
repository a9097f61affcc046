//! Operator console: line-buffered commands and result output.
//!
//! Commands arrive byte by byte on stdin and end with CR or LF. Readings
//! and replies go to stdout, one line each; logs go to stderr so the two
//! never interleave on the same stream.

use anyhow::{Context, Result};
use ranger_common::config::OutputFormat;
use ranger_common::measurement::MeasurementResult;
use ranger_common::time::TimeOfDay;
use serde::Serialize;
use std::fmt;
use std::io::Write;

/// Printed once at startup.
pub const PROMPT: &str = "Enter one of the commands: 'start', 'stop'";

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin measuring.
    Start,
    /// Pause measuring.
    Stop,
    /// Anything else, as typed.
    Unknown(String),
}

impl Command {
    /// Parse one complete line. Matching ignores case and surrounding
    /// whitespace.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("start") {
            Self::Start
        } else if trimmed.eq_ignore_ascii_case("stop") {
            Self::Stop
        } else {
            Self::Unknown(trimmed.to_string())
        }
    }

    /// Lines printed in reply.
    #[must_use]
    pub fn reply(&self) -> Vec<String> {
        match self {
            Self::Start => vec!["System started. Measuring distance.".into()],
            Self::Stop => vec!["System paused.".into()],
            Self::Unknown(cmd) => vec![
                format!("Unknown command: {cmd}"),
                "Available commands: 'start', 'stop'".into(),
            ],
        }
    }
}

/// Accumulates input characters into commands.
///
/// Characters past `max_len` are dropped until the line ends; empty lines
/// (including the LF of a CRLF pair) produce nothing.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    buf: String,
    len: usize,
    max_len: usize,
    truncated: bool,
}

impl LineBuffer {
    /// Create a buffer keeping at most `max_len` characters per line.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: String::with_capacity(max_len),
            len: 0,
            max_len,
            truncated: false,
        }
    }

    /// Feed one character; returns a completed line on CR or LF.
    pub fn push(&mut self, ch: char) -> Option<String> {
        match ch {
            '\r' | '\n' => {
                self.len = 0;
                self.truncated = false;
                if self.buf.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.buf))
                }
            }
            _ if self.len < self.max_len => {
                self.buf.push(ch);
                self.len += 1;
                None
            }
            _ => {
                self.truncated = true;
                None
            }
        }
    }

    /// True if the line in progress has lost characters.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// One emitted result line.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResultLine {
    /// Label from the software clock.
    pub time: TimeOfDay,
    /// Reading or failure.
    #[serde(flatten)]
    pub result: MeasurementResult,
}

impl fmt::Display for ResultLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result.distance_cm() {
            Some(cm) => write!(f, "{} - {:.0} cm", self.time, cm.round()),
            None => write!(f, "{} - Failure", self.time),
        }
    }
}

/// Writes replies and results to an output stream.
pub struct Console<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> Console<W> {
    /// Create a console writing to `out`.
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Print the startup prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream fails.
    pub fn prompt(&mut self) -> Result<()> {
        self.line(PROMPT)
    }

    /// Print the reply to a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream fails.
    pub fn reply(&mut self, command: &Command) -> Result<()> {
        for line in command.reply() {
            self.line(&line)?;
        }
        Ok(())
    }

    /// Print one result in the configured format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the output stream fails.
    pub fn result(&mut self, line: &ResultLine) -> Result<()> {
        match self.format {
            OutputFormat::Text => self.line(&line.to_string()),
            OutputFormat::Json => {
                let json = serde_json::to_string(line).context("Failed to encode result")?;
                self.line(&json)
            }
        }
    }

    fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{text}").context("Failed to write to console")?;
        self.out.flush().context("Failed to flush console")
    }
}
