//! Text/binary classification of a single file's content.
//!
//! Content is text when it decodes as UTF-8 and contains no control
//! character below 0x20 other than tab, line feed and carriage return.
//! Everything else is binary.  A file whose content cannot be read at all is
//! classified [`Classification::BinaryFallback`] so the caller can retry it
//! as raw bytes instead of aborting the run.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::error::ContainerKind;

/// Why a file was routed to the binary container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BinaryReason {
    /// A disallowed control byte was found at `offset`.
    ControlCharacter { offset: usize },
    /// The content is not valid UTF-8.
    InvalidUtf8,
}

#[derive(Debug)]
pub enum Classification {
    Text { content: String },
    Binary { data: Vec<u8>, reason: BinaryReason },
    /// Reading the content failed; treat the file as binary and re-read it
    /// through the binary path.
    BinaryFallback { error: io::Error },
}

impl Classification {
    /// The container this classification routes the file into.
    pub fn container(&self) -> ContainerKind {
        match self {
            Classification::Text { .. } => ContainerKind::Text,
            Classification::Binary { .. } | Classification::BinaryFallback { .. } => ContainerKind::Binary,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::BinaryFallback { .. })
    }
}

#[inline]
fn is_disallowed_control(b: u8) -> bool {
    b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'
}

/// Offset of the first disallowed control byte, if any.
///
/// Scanning bytes is equivalent to scanning characters here: every byte
/// below 0x20 in valid UTF-8 is a complete one-byte character.
pub fn find_control_byte(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| is_disallowed_control(b))
}

/// Classify in-memory content.
pub fn classify_bytes(data: Vec<u8>) -> Classification {
    if let Some(offset) = find_control_byte(&data) {
        return Classification::Binary { data, reason: BinaryReason::ControlCharacter { offset } };
    }
    match String::from_utf8(data) {
        Ok(content) => Classification::Text { content },
        Err(e)      => Classification::Binary {
            data:   e.into_bytes(),
            reason: BinaryReason::InvalidUtf8,
        },
    }
}

/// Read `path` completely and classify it.  Never fails.
pub fn classify_file(path: &Path) -> Classification {
    match fs::read(path) {
        Ok(data)   => classify_bytes(data),
        Err(error) => Classification::BinaryFallback { error },
    }
}
