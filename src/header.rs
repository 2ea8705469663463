//! Container signatures and the deferred entry-count slot.
//!
//! Both containers start with an 8-byte ASCII signature followed by an entry
//! count that is unknown until the directory walk has finished.  The writer
//! reserves the count's space up front with a placeholder whose serialized
//! width is identical to every legal final value, then overwrites it in
//! place.  No later byte offset ever moves.
//!
//! | Container | Signature  | Count slot                                   |
//! |-----------|------------|----------------------------------------------|
//! | binary    | `DPACKBIN` | `u32` little-endian, 4 bytes                 |
//! | text      | `DPACKTXT` | decimal, left-aligned, space-padded to 16    |
//!
//! Targets that cannot seek get the same bytes by encoding into a
//! `Cursor<Vec<u8>>` and copying the finished buffer out.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{ArchiveError, ContainerKind, Result};

pub const SIGNATURE_LEN: usize = 8;
pub const BINARY_SIGNATURE: &[u8; SIGNATURE_LEN] = b"DPACKBIN";
pub const TEXT_SIGNATURE:   &[u8; SIGNATURE_LEN] = b"DPACKTXT";

/// File name of the binary container inside an archive directory.
pub const BINARY_CONTAINER_FILE: &str = "dualpack-bin.dpk";
/// File name of the text container inside an archive directory.
pub const TEXT_CONTAINER_FILE:   &str = "dualpack-txt.dpk";

/// Width of the textual count slot.  Holds any `u32` with room to spare.
pub const TEXT_COUNT_WIDTH: usize = 16;

// ── Text container variable keys ─────────────────────────────────────────────

pub const KEY_FILE_COUNT:    &str = "FileCount";
pub const KEY_RELATIVE_FILE: &str = "RelativeFile";
pub const KEY_LENGTH:        &str = "Length";

impl ContainerKind {
    pub fn signature(self) -> &'static [u8; SIGNATURE_LEN] {
        match self {
            ContainerKind::Binary => BINARY_SIGNATURE,
            ContainerKind::Text   => TEXT_SIGNATURE,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ContainerKind::Binary => BINARY_CONTAINER_FILE,
            ContainerKind::Text   => TEXT_CONTAINER_FILE,
        }
    }
}

/// Compare `found` against the signature of `kind`.
pub fn check_signature(kind: ContainerKind, found: &[u8]) -> Result<()> {
    let expected = kind.signature();
    if found != expected {
        return Err(ArchiveError::Format {
            container: kind,
            expected:  String::from_utf8_lossy(expected).into_owned(),
            found:     String::from_utf8_lossy(found).into_owned(),
        });
    }
    Ok(())
}

/// Read exactly [`SIGNATURE_LEN`] bytes and validate them.  A stream too
/// short to hold a signature is reported as a mismatch, not as truncation.
pub fn read_signature<R: Read>(mut reader: R, kind: ContainerKind) -> Result<()> {
    let mut buf = Vec::with_capacity(SIGNATURE_LEN);
    reader.by_ref().take(SIGNATURE_LEN as u64).read_to_end(&mut buf)?;
    check_signature(kind, &buf)
}

// ── Deferred count ───────────────────────────────────────────────────────────

/// How a count slot is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEncoding {
    /// 4-byte little-endian unsigned integer.
    U32Le,
    /// ASCII decimal, left-aligned and right-padded with spaces.
    PaddedDecimal { width: usize },
}

impl SlotEncoding {
    pub fn width(self) -> usize {
        match self {
            SlotEncoding::U32Le                  => 4,
            SlotEncoding::PaddedDecimal { width } => width,
        }
    }

    /// Serialize `value`; the result is always exactly `self.width()` bytes.
    pub fn render(self, value: u32) -> Result<Vec<u8>> {
        match self {
            SlotEncoding::U32Le => {
                let mut out = Vec::with_capacity(4);
                out.write_u32::<LittleEndian>(value)?;
                Ok(out)
            }
            SlotEncoding::PaddedDecimal { width } => {
                let digits = value.to_string();
                if digits.len() > width {
                    return Err(ArchiveError::SlotOverflow { value: value as u64, width });
                }
                Ok(format!("{digits:<width$}").into_bytes())
            }
        }
    }

    /// The placeholder written before the true value is known.
    pub fn placeholder(self) -> Vec<u8> {
        match self {
            SlotEncoding::U32Le                  => vec![0u8; 4],
            SlotEncoding::PaddedDecimal { width } => vec![b' '; width],
        }
    }
}

/// A reserved, fixed-width region in a seekable stream that is overwritten
/// once the real value is known.
#[derive(Debug, Clone, Copy)]
pub struct DeferredCount {
    offset:   u64,
    encoding: SlotEncoding,
}

impl DeferredCount {
    /// Write the placeholder at the current stream position and remember it.
    pub fn reserve<W: Write + Seek>(writer: &mut W, encoding: SlotEncoding) -> Result<Self> {
        let offset = writer.stream_position()?;
        writer.write_all(&encoding.placeholder())?;
        Ok(Self { offset, encoding })
    }

    pub fn offset(&self) -> u64 { self.offset }

    pub fn encoding(&self) -> SlotEncoding { self.encoding }

    /// Overwrite the reserved region with `value`, then return the stream to
    /// where it was.
    pub fn patch<W: Write + Seek>(&self, writer: &mut W, value: u32) -> Result<()> {
        let bytes = self.encoding.render(value)?;
        debug_assert_eq!(bytes.len(), self.encoding.width());
        let end = writer.stream_position()?;
        writer.seek(SeekFrom::Start(self.offset))?;
        writer.write_all(&bytes)?;
        writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}
