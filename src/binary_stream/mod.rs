//! Binary container: writer and reader.
//!
//! # Layout
//! ```text
//! signature   [8]   "DPACKBIN"
//! count       u32   little-endian, patched on finish()
//! count × {
//!     path_len    u32   little-endian
//!     path        [path_len]  UTF-8, '/'-separated
//!     payload_len u64   little-endian
//!     payload     [payload_len]
//! }
//! ```
//!
//! There is no index: entries are consumed strictly in append order and the
//! reader never seeks.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Read, Seek, Write};

use crate::error::{ArchiveError, ContainerKind, Result};
use crate::header::{self, DeferredCount, SlotEncoding, BINARY_SIGNATURE};

const KIND: ContainerKind = ContainerKind::Binary;

/// Upper bound on a stored path.  Anything larger is treated as corruption
/// rather than allocated.
pub const MAX_PATH_LEN: u32 = 64 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BinaryContainerWriter<W: Write + Seek> {
    writer:        W,
    count_slot:    DeferredCount,
    entries:       u32,
    payload_bytes: u64,
}

impl<W: Write + Seek> BinaryContainerWriter<W> {
    /// Write the signature and reserve the count slot.
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(BINARY_SIGNATURE)?;
        let count_slot = DeferredCount::reserve(&mut writer, SlotEncoding::U32Le)?;
        Ok(Self { writer, count_slot, entries: 0, payload_bytes: 0 })
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> u32 { self.entries }

    /// Total payload bytes appended so far.
    pub fn payload_bytes(&self) -> u64 { self.payload_bytes }

    fn write_entry_head(&mut self, relative_path: &str, len: u64) -> Result<()> {
        if self.entries == u32::MAX {
            return Err(ArchiveError::CountOverflow { container: KIND });
        }
        let path_len = u32::try_from(relative_path.len())
            .ok()
            .filter(|&n| n <= MAX_PATH_LEN)
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path too long for the binary container: {relative_path}"),
            ))?;
        self.writer.write_u32::<LittleEndian>(path_len)?;
        self.writer.write_all(relative_path.as_bytes())?;
        self.writer.write_u64::<LittleEndian>(len)?;
        Ok(())
    }

    /// Append an entry whose payload is already in memory.
    pub fn append_bytes(&mut self, relative_path: &str, data: &[u8]) -> Result<()> {
        self.write_entry_head(relative_path, data.len() as u64)?;
        self.writer.write_all(data)?;
        self.entries       += 1;
        self.payload_bytes += data.len() as u64;
        Ok(())
    }

    /// Append an entry by streaming exactly `len` bytes from `source`.
    ///
    /// A source that ends early leaves the container unusable, so it is an
    /// error rather than a short entry.
    pub fn append_reader<R: Read>(&mut self, relative_path: &str, source: R, len: u64) -> Result<()> {
        self.write_entry_head(relative_path, len)?;
        let copied = io::copy(&mut source.take(len), &mut self.writer)?;
        if copied != len {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{relative_path}: source ended after {copied} of {len} bytes"),
            )));
        }
        self.entries       += 1;
        self.payload_bytes += len;
        Ok(())
    }

    /// Patch the entry count into the reserved slot, flush, and hand back
    /// the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.count_slot.patch(&mut self.writer, self.entries)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Header of one decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryEntryInfo {
    pub index:         u32,
    pub relative_path: String,
    pub length:        u64,
}

pub struct BinaryContainerReader<R: Read> {
    reader:   R,
    declared: u32,
    consumed: u32,
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0)  => break,
            Ok(n)  => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read> BinaryContainerReader<R> {
    /// Validate the signature and read the declared entry count.
    pub fn open(mut reader: R) -> Result<Self> {
        header::read_signature(&mut reader, KIND)?;
        let mut count = [0u8; 4];
        read_field(&mut reader, &mut count, None)?;
        Ok(Self { reader, declared: LittleEndian::read_u32(&count), consumed: 0 })
    }

    /// Entry count declared in the header.
    pub fn declared(&self) -> u32 { self.declared }

    /// Entries not yet consumed.
    pub fn remaining(&self) -> u32 { self.declared - self.consumed }

    /// Decode the next entry.
    ///
    /// `open_sink` is called with the entry header before any payload byte
    /// is read; the payload is then copied into the returned sink.  Returns
    /// `Ok(None)` once the declared count is exhausted.
    pub fn read_entry<F, S>(&mut self, open_sink: F) -> Result<Option<BinaryEntryInfo>>
    where
        F: FnOnce(&BinaryEntryInfo) -> Result<S>,
        S: Write,
    {
        if self.consumed == self.declared {
            return Ok(None);
        }
        let index = self.consumed;
        let entry = Some(index);

        let mut len_buf = [0u8; 4];
        read_field(&mut self.reader, &mut len_buf, entry)?;
        let path_len = LittleEndian::read_u32(&len_buf);
        if path_len > MAX_PATH_LEN {
            return Err(ArchiveError::corrupt(KIND, entry, format!("path length {path_len} exceeds {MAX_PATH_LEN}")));
        }

        let mut path_buf = vec![0u8; path_len as usize];
        read_field(&mut self.reader, &mut path_buf, entry)?;
        let relative_path = String::from_utf8(path_buf)
            .map_err(|_| ArchiveError::corrupt(KIND, entry, "entry path is not valid UTF-8"))?;

        let mut size_buf = [0u8; 8];
        read_field(&mut self.reader, &mut size_buf, entry)?;
        let length = LittleEndian::read_u64(&size_buf);

        let info = BinaryEntryInfo { index, relative_path, length };
        let mut sink = open_sink(&info)?;
        self.copy_payload(&info, &mut sink)?;
        sink.flush().map_err(|source| sink_error(&info, source))?;

        self.consumed += 1;
        Ok(Some(info))
    }

    fn copy_payload<S: Write>(&mut self, info: &BinaryEntryInfo, sink: &mut S) -> Result<()> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(info.length as usize).max(1)];
        let mut remaining = info.length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = fill(&mut self.reader, &mut buf[..want])?;
            if n > 0 {
                sink.write_all(&buf[..n]).map_err(|source| sink_error(info, source))?;
            }
            remaining -= n as u64;
            if n < want {
                return Err(ArchiveError::Truncated {
                    container: KIND,
                    entry:     Some(info.index),
                    declared:  info.length,
                    available: info.length - remaining,
                    unit:      "bytes",
                });
            }
        }
        Ok(())
    }

    /// Confirm the stream ends exactly after the last declared entry and
    /// hand back the underlying reader.
    pub fn finish(mut self) -> Result<R> {
        if self.consumed < self.declared {
            return Err(ArchiveError::corrupt(
                KIND,
                None,
                format!("only {} of {} declared entries consumed", self.consumed, self.declared),
            ));
        }
        let mut probe = [0u8; 1];
        if fill(&mut self.reader, &mut probe)? != 0 {
            return Err(ArchiveError::TrailingData { container: KIND, declared: self.declared });
        }
        Ok(self.reader)
    }
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], entry: Option<u32>) -> Result<()> {
    let n = fill(reader, buf)?;
    if n < buf.len() {
        return Err(ArchiveError::Truncated {
            container: KIND,
            entry,
            declared:  buf.len() as u64,
            available: n as u64,
            unit:      "bytes",
        });
    }
    Ok(())
}

fn sink_error(info: &BinaryEntryInfo, source: io::Error) -> ArchiveError {
    ArchiveError::Path {
        container: KIND,
        entry:     Some(info.index),
        path:      info.relative_path.clone().into(),
        source,
    }
}
