//! Line-oriented record of spied traffic: `Verb|size|hex`

use std::fmt;

use explainer_core::{ExplainerError, Result};

/// Which way the bytes moved, from the spied connection's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "Read",
            Direction::Write => "Write",
        }
    }

    fn parse(verb: &str) -> Option<Self> {
        match verb {
            "Read" => Some(Direction::Read),
            "Write" => Some(Direction::Write),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrafficRecord {
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

impl TrafficRecord {
    pub fn new(direction: Direction, bytes: &[u8]) -> Self {
        Self {
            direction,
            bytes: bytes.to_vec(),
        }
    }

    /// Render as a transcript line, without the trailing newline
    pub fn to_line(&self) -> String {
        format_line(self.direction, &self.bytes)
    }

    /// Parse one row. `line_no` is 1-based and only used in errors.
    pub fn parse_line(line_no: usize, line: &str) -> Result<Self> {
        let invalid = |reason: String| ExplainerError::InvalidTranscript {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split('|').collect();
        let [verb, size, content] = fields[..] else {
            return Err(invalid(format!(
                "expected 3 fields separated by '|', found {}",
                fields.len()
            )));
        };

        let direction =
            Direction::parse(verb).ok_or_else(|| invalid(format!("unknown verb {:?}", verb)))?;
        let size: usize = size
            .parse()
            .map_err(|_| invalid(format!("invalid size {:?}", size)))?;
        if size.checked_mul(2) != Some(content.len()) {
            return Err(invalid(format!(
                "size {} does not match {} hex digits",
                size,
                content.len()
            )));
        }
        let bytes = hex::decode(content).map_err(|e| invalid(e.to_string()))?;

        Ok(Self { direction, bytes })
    }

    /// The payload with non-printable bytes escaped, e.g. `\x16\x03\x01`
    pub fn escaped(&self) -> String {
        self.bytes.escape_ascii().to_string()
    }
}

pub(crate) fn format_line(direction: Direction, bytes: &[u8]) -> String {
    format!("{}|{}|{}", direction, bytes.len(), hex::encode(bytes))
}

/// Parse every non-empty line of a transcript
pub fn parse_transcript(text: &str) -> Result<Vec<TrafficRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| TrafficRecord::parse_line(index + 1, line.trim_end()))
        .collect()
}
