//! Text container: writer and reader.
//!
//! # Layout
//! ```text
//! DPACKTXT\n
//! FileCount: <count, left-aligned, padded to 16>\n
//! count × {
//!     RelativeFile: <path>\n
//!     Length: <n>\n
//!     <exactly n characters, no delimiter>
//! }
//! ```
//!
//! Payload boundaries are governed by character counts (Unicode scalar
//! values), never by lines: a payload may end without a newline and the next
//! `RelativeFile:` line follows immediately.

use std::io::{self, BufRead, Seek, Write};

use crate::error::{ArchiveError, ContainerKind, Result};
use crate::header::{
    self, DeferredCount, SlotEncoding, KEY_FILE_COUNT, KEY_LENGTH, KEY_RELATIVE_FILE,
    TEXT_COUNT_WIDTH, TEXT_SIGNATURE,
};

const KIND: ContainerKind = ContainerKind::Text;

/// Separator between a variable's key and its value.
const VARIABLE_SEPARATOR: &str = ": ";

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TextContainerWriter<W: Write + Seek> {
    writer:     W,
    count_slot: DeferredCount,
    entries:    u32,
    chars:      u64,
}

impl<W: Write + Seek> TextContainerWriter<W> {
    /// Write the signature line and the `FileCount` line with a blank,
    /// fixed-width value.
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(TEXT_SIGNATURE)?;
        writer.write_all(b"\n")?;
        write!(writer, "{KEY_FILE_COUNT}{VARIABLE_SEPARATOR}")?;
        let count_slot = DeferredCount::reserve(
            &mut writer,
            SlotEncoding::PaddedDecimal { width: TEXT_COUNT_WIDTH },
        )?;
        writer.write_all(b"\n")?;
        Ok(Self { writer, count_slot, entries: 0, chars: 0 })
    }

    pub fn entries(&self) -> u32 { self.entries }

    /// Total payload characters appended so far.
    pub fn payload_chars(&self) -> u64 { self.chars }

    /// Append one entry.  The path must fit on a single line.
    pub fn append(&mut self, relative_path: &str, content: &str) -> Result<()> {
        if self.entries == u32::MAX {
            return Err(ArchiveError::CountOverflow { container: KIND });
        }
        if relative_path.contains(['\n', '\r']) {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path contains a line break: {relative_path:?}"),
            )));
        }
        let length = content.chars().count() as u64;
        write_variable(&mut self.writer, KEY_RELATIVE_FILE, relative_path)?;
        write_variable(&mut self.writer, KEY_LENGTH, &length.to_string())?;
        self.writer.write_all(content.as_bytes())?;
        self.entries += 1;
        self.chars   += length;
        Ok(())
    }

    /// Overwrite the padded `FileCount` value, flush, and hand back the
    /// underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.count_slot.patch(&mut self.writer, self.entries)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn write_variable<W: Write>(writer: &mut W, key: &str, value: &str) -> io::Result<()> {
    writeln!(writer, "{key}{VARIABLE_SEPARATOR}{value}")
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntryInfo {
    pub index:         u32,
    pub relative_path: String,
    /// Payload length in characters.
    pub length:        u64,
}

pub struct TextContainerReader<R: BufRead> {
    reader:   R,
    declared: u32,
    consumed: u32,
}

impl<R: BufRead> TextContainerReader<R> {
    /// Validate the signature line and parse the `FileCount` variable.
    pub fn open(mut reader: R) -> Result<Self> {
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        header::check_signature(KIND, trim_line_end(&line))?;

        let (key, value) = read_variable(&mut reader, None)?;
        if key != KEY_FILE_COUNT {
            return Err(ArchiveError::corrupt(KIND, None, format!("expected key {KEY_FILE_COUNT}, found {key:?}")));
        }
        let declared = value.trim().parse::<u32>()
            .map_err(|_| ArchiveError::corrupt(KIND, None, format!("invalid {KEY_FILE_COUNT} value {value:?}")))?;
        Ok(Self { reader, declared, consumed: 0 })
    }

    pub fn declared(&self) -> u32 { self.declared }

    pub fn remaining(&self) -> u32 { self.declared - self.consumed }

    /// Decode the next entry, writing its payload into the sink returned by
    /// `open_sink`.  Returns `Ok(None)` once the declared count is exhausted.
    pub fn read_entry<F, S>(&mut self, open_sink: F) -> Result<Option<TextEntryInfo>>
    where
        F: FnOnce(&TextEntryInfo) -> Result<S>,
        S: Write,
    {
        if self.consumed == self.declared {
            return Ok(None);
        }
        let index = self.consumed;
        let entry = Some(index);

        let relative_path = expect_variable(&mut self.reader, KEY_RELATIVE_FILE, entry)?;
        let length_text   = expect_variable(&mut self.reader, KEY_LENGTH, entry)?;
        let length = length_text.trim().parse::<u64>()
            .map_err(|_| ArchiveError::corrupt(KIND, entry, format!("invalid {KEY_LENGTH} value {length_text:?}")))?;

        let info = TextEntryInfo { index, relative_path, length };
        let payload = self.read_payload(&info)?;

        let path_error = |source| ArchiveError::Path {
            container: KIND,
            entry,
            path:      info.relative_path.clone().into(),
            source,
        };
        let mut sink = open_sink(&info)?;
        sink.write_all(payload.as_bytes()).map_err(path_error)?;
        sink.flush().map_err(path_error)?;

        self.consumed += 1;
        Ok(Some(info))
    }

    /// Read exactly `info.length` characters.
    fn read_payload(&mut self, info: &TextEntryInfo) -> Result<String> {
        let invalid = || ArchiveError::InvalidText { container: KIND, entry: Some(info.index) };

        let mut out       = Vec::new();
        let mut remaining = info.length;
        // Continuation bytes still owed by the character being read.
        let mut pending   = 0usize;

        while remaining > 0 || pending > 0 {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                let partial = u64::from(pending > 0);
                return Err(ArchiveError::Truncated {
                    container: KIND,
                    entry:     Some(info.index),
                    declared:  info.length,
                    available: info.length - remaining - partial,
                    unit:      "characters",
                });
            }
            let mut take = 0;
            for &b in buf {
                if pending > 0 {
                    if b & 0xC0 != 0x80 {
                        return Err(invalid());
                    }
                    pending -= 1;
                } else {
                    if remaining == 0 {
                        break;
                    }
                    pending = utf8_width(b).ok_or_else(invalid)? - 1;
                    remaining -= 1;
                }
                take += 1;
            }
            out.extend_from_slice(&buf[..take]);
            self.reader.consume(take);
        }
        String::from_utf8(out).map_err(|_| invalid())
    }

    /// Confirm nothing follows the last declared entry and hand back the
    /// underlying reader.
    pub fn finish(mut self) -> Result<R> {
        if self.consumed < self.declared {
            return Err(ArchiveError::corrupt(
                KIND,
                None,
                format!("only {} of {} declared entries consumed", self.consumed, self.declared),
            ));
        }
        if !self.reader.fill_buf()?.is_empty() {
            return Err(ArchiveError::TrailingData { container: KIND, declared: self.declared });
        }
        Ok(self.reader)
    }
}

/// Byte length of the UTF-8 sequence introduced by lead byte `b`.
fn utf8_width(b: u8) -> Option<usize> {
    match b {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _           => None,
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read one `Key: value` line.  The value is returned verbatim apart from
/// the line terminator.
fn read_variable<R: BufRead>(reader: &mut R, entry: Option<u32>) -> Result<(String, String)> {
    let mut raw = Vec::new();
    reader.read_until(b'\n', &mut raw)?;
    if raw.last() != Some(&b'\n') {
        return Err(ArchiveError::corrupt(KIND, entry, "unexpected end of container in a header line"));
    }
    let line = std::str::from_utf8(trim_line_end(&raw))
        .map_err(|_| ArchiveError::corrupt(KIND, entry, "header line is not valid UTF-8"))?;
    let (key, value) = line
        .split_once(VARIABLE_SEPARATOR)
        .ok_or_else(|| ArchiveError::corrupt(KIND, entry, format!("malformed header line {line:?}")))?;
    Ok((key.to_owned(), value.to_owned()))
}

fn expect_variable<R: BufRead>(reader: &mut R, expected: &str, entry: Option<u32>) -> Result<String> {
    let (key, value) = read_variable(reader, entry)?;
    if key != expected {
        return Err(ArchiveError::corrupt(KIND, entry, format!("expected key {expected}, found {key:?}")));
    }
    Ok(value)
}
