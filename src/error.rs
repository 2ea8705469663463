//! Error type shared by both container codecs and the pack/unpack sessions.
//!
//! Every decode-side variant names the container it came from and, when the
//! failure happened inside an entry, that entry's zero-based index.  All of
//! them are fatal to the running operation; there is no skip-and-continue on
//! the decode path.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Which of the two containers an entry or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Binary,
    Text,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Binary => f.pad("binary"),
            ContainerKind::Text   => f.pad("text"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{container} container: invalid signature (expected {expected:?}, found {found:?})")]
    Format {
        container: ContainerKind,
        expected:  String,
        found:     String,
    },

    #[error("{container} container{}: corrupt header: {detail}", at_entry(.entry))]
    CorruptHeader {
        container: ContainerKind,
        entry:     Option<u32>,
        detail:    String,
    },

    #[error("{container} container{}: truncated, {declared} {unit} declared but only {available} available",
            at_entry(.entry))]
    Truncated {
        container: ContainerKind,
        entry:     Option<u32>,
        declared:  u64,
        available: u64,
        unit:      &'static str,
    },

    #[error("{container} container{}: cannot write {}: {source}", at_entry(.entry), .path.display())]
    Path {
        container: ContainerKind,
        entry:     Option<u32>,
        path:      PathBuf,
        #[source]
        source:    io::Error,
    },

    #[error("{container} container{}: entry path {path:?} escapes the destination directory",
            at_entry(.entry))]
    UnsafePath {
        container: ContainerKind,
        entry:     Option<u32>,
        path:      String,
    },

    #[error("{container} container{}: payload is not valid UTF-8", at_entry(.entry))]
    InvalidText {
        container: ContainerKind,
        entry:     Option<u32>,
    },

    #[error("{container} container: unexpected data after the last of {declared} declared entries")]
    TrailingData {
        container: ContainerKind,
        declared:  u32,
    },

    #[error("{container} container: entry count exceeds u32::MAX")]
    CountOverflow { container: ContainerKind },

    #[error("count {value} does not fit a {width}-byte header slot")]
    SlotOverflow { value: u64, width: usize },

    #[error("output directory {} would remove input {}", .output.display(), .input.display())]
    OverlappingOutput {
        output: PathBuf,
        input:  PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid directory pattern: {0}")]
    Pattern(#[from] globset::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

fn at_entry(entry: &Option<u32>) -> String {
    match entry {
        Some(i) => format!(" entry #{i}"),
        None    => String::new(),
    }
}

impl ArchiveError {
    pub(crate) fn corrupt(container: ContainerKind, entry: Option<u32>, detail: impl Into<String>) -> Self {
        ArchiveError::CorruptHeader { container, entry, detail: detail.into() }
    }

    /// The container this error was raised for, if it is a decode-side error.
    pub fn container(&self) -> Option<ContainerKind> {
        match self {
            ArchiveError::Format { container, .. }
            | ArchiveError::CorruptHeader { container, .. }
            | ArchiveError::Truncated { container, .. }
            | ArchiveError::Path { container, .. }
            | ArchiveError::UnsafePath { container, .. }
            | ArchiveError::InvalidText { container, .. }
            | ArchiveError::TrailingData { container, .. }
            | ArchiveError::CountOverflow { container } => Some(*container),
            _ => None,
        }
    }

    /// The zero-based entry index the error occurred in, when known.
    pub fn entry(&self) -> Option<u32> {
        match self {
            ArchiveError::CorruptHeader { entry, .. }
            | ArchiveError::Truncated { entry, .. }
            | ArchiveError::Path { entry, .. }
            | ArchiveError::UnsafePath { entry, .. }
            | ArchiveError::InvalidText { entry, .. } => *entry,
            _ => None,
        }
    }
}
