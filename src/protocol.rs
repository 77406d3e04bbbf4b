//! Elios4you line protocol codec
//!
//! Commands are short `@xxx` tokens written lower-cased with a trailing
//! newline. The device answers with free-form text closed by the literal
//! `ready...`. Framing never trusts a read that ended without the terminator:
//! such a read is reported as [`Frame::Incomplete`] or [`Frame::TimedOut`].
//!
//! Two body layouts exist. `@inf`, `@rel` and `@hwr` answer with `key=value`
//! lines; `@dat` and `@sta` answer with `index;key;value` lines.

use crate::error::{Elios4YouError, Result};
use crate::logging::{StructuredLogger, get_logger};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Instant, timeout};

/// End-of-response marker
pub const TERMINATOR: &str = "ready...";

/// Command echoes recognised on the first response line
pub const KNOWN_COMMANDS: [&str; 5] = ["@dat", "@sta", "@inf", "@rel", "@hwr"];

/// Normalized key -> trimmed value, for one framed response
pub type ParsedResponse = HashMap<String, String>;

static LOGGER: Lazy<StructuredLogger> = Lazy::new(|| get_logger("protocol"));

/// Target state of the auxiliary relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    Off,
    On,
}

impl RelayState {
    /// Numeric form used on the wire and in the `rel` readback
    pub fn as_int(self) -> i64 {
        match self {
            RelayState::Off => 0,
            RelayState::On => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::Off => "off",
            RelayState::On => "on",
        }
    }
}

impl FromStr for RelayState {
    type Err = Elios4YouError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            other => Err(Elios4YouError::Validation {
                field: "state".to_string(),
                message: format!("Expected 'on' or 'off', got '{}'", other),
            }),
        }
    }
}

/// Body layout of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// `key=value`
    KeyValue,
    /// `index;key;value`, only key and value are used
    Indexed,
}

/// Device command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Live power/energy readings and alarms
    Dat,
    /// Daily and monthly peaks
    Sta,
    /// Identity and firmware info
    Inf,
    /// Relay state query
    Rel,
    /// Hardware version info
    Hwr,
    /// Relay state change (`@rel 0 <0|1>`)
    SetRelay(RelayState),
}

impl Command {
    /// Bare command token, also the echo the device prints back
    pub fn token(&self) -> &'static str {
        match self {
            Command::Dat => "@dat",
            Command::Sta => "@sta",
            Command::Inf => "@inf",
            Command::Rel | Command::SetRelay(_) => "@rel",
            Command::Hwr => "@hwr",
        }
    }

    /// Full command text including parameters
    pub fn wire(&self) -> String {
        match self {
            Command::SetRelay(state) => format!("@rel 0 {}", state.as_int()),
            other => other.token().to_string(),
        }
    }

    pub fn line_format(&self) -> LineFormat {
        match self {
            Command::Dat | Command::Sta => LineFormat::Indexed,
            Command::Inf | Command::Rel | Command::Hwr | Command::SetRelay(_) => {
                LineFormat::KeyValue
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}

impl FromStr for Command {
    type Err = Elios4YouError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let parts: Vec<&str> = lowered.split_whitespace().collect();
        match parts.as_slice() {
            ["@dat"] => Ok(Command::Dat),
            ["@sta"] => Ok(Command::Sta),
            ["@inf"] => Ok(Command::Inf),
            ["@rel"] => Ok(Command::Rel),
            ["@hwr"] => Ok(Command::Hwr),
            ["@rel", "0", "0"] => Ok(Command::SetRelay(RelayState::Off)),
            ["@rel", "0", "1"] => Ok(Command::SetRelay(RelayState::On)),
            _ => Err(Elios4YouError::validation(
                "command".to_string(),
                format!("Unknown command '{}'", s.trim()),
            )),
        }
    }
}

/// Bytes to write for `cmd`
pub fn encode_command(cmd: &Command) -> Vec<u8> {
    format!("{}\n", cmd.wire().to_lowercase()).into_bytes()
}

/// Outcome of reading one response from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text up to and including the terminator
    Complete(String),
    /// Data arrived but the terminator did not (deadline hit or peer closed)
    Incomplete(String),
    /// Nothing arrived before the deadline
    TimedOut,
}

impl Frame {
    pub fn is_complete(&self) -> bool {
        matches!(self, Frame::Complete(_))
    }

    pub fn into_complete(self) -> Option<String> {
        match self {
            Frame::Complete(text) => Some(text),
            _ => None,
        }
    }
}

/// Layered read bounds for [`read_frame`]
#[derive(Debug, Clone, Copy)]
pub struct FrameTimeouts {
    /// Bound on the whole frame
    pub overall: Duration,
    /// Bound on each socket read
    pub chunk: Duration,
}

/// Read from `reader` until the terminator appears or the overall deadline
/// passes.
///
/// `pending` holds bytes that arrived after the previous terminator; they are
/// consumed first, and whatever follows this frame's terminator is stored back
/// into it. Only socket errors are returned as `Err`.
pub async fn read_frame<R>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    timeouts: FrameTimeouts,
) -> std::io::Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Instant::now() + timeouts.overall;
    let needle = TERMINATOR.as_bytes();
    let mut buf = std::mem::take(pending);
    let mut scanned = 0usize;
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(pos) = find(&buf[scanned..], needle) {
            let end = scanned + pos + needle.len();
            *pending = buf.split_off(end);
            return Ok(Frame::Complete(String::from_utf8_lossy(&buf).into_owned()));
        }
        // The terminator may straddle two reads
        scanned = buf.len().saturating_sub(needle.len() - 1);

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wait = timeouts.chunk.min(deadline - now);
        match timeout(wait, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                LOGGER.debug("Peer closed the stream before the terminator");
                return Ok(Frame::Incomplete(
                    String::from_utf8_lossy(&buf).into_owned(),
                ));
            }
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e),
            // A stalled chunk only costs its own bound; the deadline decides
            Err(_) => continue,
        }
    }

    if buf.is_empty() {
        Ok(Frame::TimedOut)
    } else {
        LOGGER.debug(&format!(
            "Silent timeout detected, {} bytes without terminator",
            buf.len()
        ));
        Ok(Frame::Incomplete(String::from_utf8_lossy(&buf).into_owned()))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse one complete frame into key/value pairs.
///
/// Body lines start after the command echo, or one line later when the echo
/// is preceded by a stray line feed. The trailing blank line and the
/// terminator line are excluded. Malformed lines are skipped.
pub fn parse_response(command: &Command, text: &str) -> ParsedResponse {
    let mut output = ParsedResponse::new();
    let lines: Vec<&str> = text.lines().collect();
    let Some(first) = lines.first() else {
        return output;
    };

    let start = if KNOWN_COMMANDS.contains(&first.to_lowercase().as_str()) {
        1
    } else {
        2
    };
    let end = lines.len().saturating_sub(2);
    if start >= end {
        return output;
    }

    let format = command.line_format();
    for line in &lines[start..end] {
        match split_line(format, line) {
            Some((key, value)) => {
                output.insert(normalize_key(key), value.trim().to_string());
            }
            None => LOGGER.debug(&format!(
                "Skipping malformed line in {} response: {:?}",
                command.token(),
                line
            )),
        }
    }
    output
}

fn split_line(format: LineFormat, line: &str) -> Option<(&str, &str)> {
    match format {
        LineFormat::KeyValue => {
            let mut parts = line.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key, value)),
                _ => None,
            }
        }
        LineFormat::Indexed => {
            let mut parts = line.split(';').skip(1);
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => Some((key, value)),
                _ => None,
            }
        }
    }
}

/// Lower-case and replace spaces with underscores
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase().replace(' ', "_")
}
