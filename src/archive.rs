//! High-level [`pack`] / [`unpack`] / [`list`] API for the primary embedding surface.
//!
//! ```no_run
//! use dualpack::archive::{pack, unpack, PackOptions, UnpackOptions, NoopObserver};
//!
//! let report = pack("project", "project.pkg", &PackOptions::default(), &mut NoopObserver)?;
//! println!("{} text, {} binary", report.text_files, report.binary_files);
//!
//! unpack("project.pkg", "restored", &UnpackOptions::default(), &mut NoopObserver)?;
//! # Ok::<(), dualpack::ArchiveError>(())
//! ```
//!
//! All per-run state (entry tallies, output directory, seen paths) lives in a
//! session value created for that run, so concurrent runs in one process
//! never share counters.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::binary_stream::{BinaryContainerReader, BinaryContainerWriter};
use crate::classify::{classify_file, Classification};
use crate::error::{ArchiveError, ContainerKind, Result};
use crate::text_stream::{TextContainerReader, TextContainerWriter};
use crate::walk::{relative_path, DirectoryWalker, ExclusionPolicy};

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`pack`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Include files that sit directly in the root directory.
    pub include_root_files: bool,
    /// Glob that first-level subdirectories must match; `None` matches all.
    pub root_pattern:       Option<String>,
    /// The output directory is always added to this policy.
    pub exclusion:          ExclusionPolicy,
    /// Delete the output directory before writing.
    pub clean_output:       bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            include_root_files: true,
            root_pattern:       None,
            exclusion:          ExclusionPolicy::default(),
            clean_output:       false,
        }
    }
}

/// Configuration for [`unpack`].
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Replace destination files that already exist.  When false an
    /// existing file aborts the run with a path error.
    pub overwrite:    bool,
    /// Delete the destination directory before extracting.
    pub clean_output: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self { overwrite: true, clean_output: false }
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// How a file was stored (or restored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Text,
    Binary,
    /// Stored as binary because reading it for classification failed.
    BinaryFallback,
}

impl EntryKind {
    pub fn container(self) -> ContainerKind {
        match self {
            EntryKind::Text => ContainerKind::Text,
            EntryKind::Binary | EntryKind::BinaryFallback => ContainerKind::Binary,
        }
    }
}

/// Receives one event per processed file.  The library never prints.
pub trait PackObserver {
    fn on_file_processed(&mut self, relative_path: &str, kind: EntryKind);

    fn on_file_skipped(&mut self, _path: &Path, _reason: &str) {}
}

impl<F: FnMut(&str, EntryKind)> PackObserver for F {
    fn on_file_processed(&mut self, relative_path: &str, kind: EntryKind) {
        self(relative_path, kind)
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PackObserver for NoopObserver {
    fn on_file_processed(&mut self, _relative_path: &str, _kind: EntryKind) {}
}

// ── Reports ──────────────────────────────────────────────────────────────────

/// A file found by the walk that ended up in neither container.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path:   PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PackReport {
    pub output_dir:   PathBuf,
    pub text_files:   u32,
    pub binary_files: u32,
    /// Binary entries that went through the read-failure fallback.
    pub fallbacks:    u32,
    pub text_chars:   u64,
    pub binary_bytes: u64,
    pub skipped:      Vec<SkippedFile>,
}

impl PackReport {
    pub fn total_files(&self) -> u64 {
        self.text_files as u64 + self.binary_files as u64
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnpackReport {
    pub output_dir:   PathBuf,
    pub text_files:   u32,
    pub binary_files: u32,
    /// Containers that were absent from the input directory.
    pub missing:      Vec<ContainerKind>,
}

impl UnpackReport {
    pub fn total_files(&self) -> u64 {
        self.text_files as u64 + self.binary_files as u64
    }
}

/// One entry as reported by [`list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedEntry {
    pub container:     ContainerKind,
    pub index:         u32,
    pub relative_path: String,
    /// Bytes for binary entries, characters for text entries.
    pub length:        u64,
}

pub fn container_path(dir: &Path, kind: ContainerKind) -> PathBuf {
    dir.join(kind.file_name())
}

// ── Pack ─────────────────────────────────────────────────────────────────────

type FileWriter = BufWriter<File>;

/// Encode state for one run: both open containers plus the tallies that
/// end up in the [`PackReport`].
pub struct PackSession<'o, O: PackObserver + ?Sized> {
    root:     PathBuf,
    text:     TextContainerWriter<FileWriter>,
    binary:   BinaryContainerWriter<FileWriter>,
    report:   PackReport,
    observer: &'o mut O,
}

impl<'o, O: PackObserver + ?Sized> PackSession<'o, O> {
    /// Create both containers in `output_dir` (which must exist) and write
    /// their headers.
    pub fn create(root: &Path, output_dir: &Path, observer: &'o mut O) -> Result<Self> {
        let text   = TextContainerWriter::new(create_container(output_dir, ContainerKind::Text)?)?;
        let binary = BinaryContainerWriter::new(create_container(output_dir, ContainerKind::Binary)?)?;
        Ok(Self {
            root: root.to_path_buf(),
            text,
            binary,
            report: PackReport { output_dir: output_dir.to_path_buf(), ..PackReport::default() },
            observer,
        })
    }

    fn skip(&mut self, path: &Path, reason: String) {
        warn!(path = %path.display(), %reason, "file skipped");
        self.observer.on_file_skipped(path, &reason);
        self.report.skipped.push(SkippedFile { path: path.to_path_buf(), reason });
    }

    /// Classify `path` and append it to the matching container.
    ///
    /// Per-file problems (an unrepresentable name, a file that cannot be
    /// read even as raw bytes) are recorded as skips; only failures writing
    /// the containers themselves are returned as errors.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let Some(rel) = relative_path(&self.root, path) else {
            self.skip(path, "path is outside the root or not valid UTF-8".to_string());
            return Ok(());
        };

        self.store(path, &rel, classify_file(path))
    }

    /// Append an already classified file under `rel`.
    fn store(&mut self, path: &Path, rel: &str, classification: Classification) -> Result<()> {
        let kind = match classification {
            Classification::Text { content } if !has_line_break(rel) => {
                self.text.append(rel, &content)?;
                EntryKind::Text
            }
            // A name with a line break cannot be a text-container header line.
            Classification::Text { content } => {
                self.binary.append_bytes(rel, content.as_bytes())?;
                EntryKind::Binary
            }
            Classification::Binary { data, .. } => {
                self.binary.append_bytes(rel, &data)?;
                EntryKind::Binary
            }
            Classification::BinaryFallback { error } => {
                debug!(path = %rel, %error, "classification read failed, streaming raw bytes");
                let (file, len) = match open_regular(path) {
                    Ok(opened) => opened,
                    Err(retry) => {
                        self.skip(path, format!("{error}; raw read also failed: {retry}"));
                        return Ok(());
                    }
                };
                // Once the entry head is written a short copy leaves the
                // container inconsistent, so it aborts the run.
                self.binary.append_reader(rel, BufReader::new(file), len)?;
                self.report.fallbacks += 1;
                EntryKind::BinaryFallback
            }
        };
        debug!(path = %rel, ?kind, "packed");
        self.observer.on_file_processed(rel, kind);
        Ok(())
    }

    /// Patch both entry counts and close the containers.
    pub fn finish(mut self) -> Result<PackReport> {
        self.report.text_files   = self.text.entries();
        self.report.text_chars   = self.text.payload_chars();
        self.report.binary_files = self.binary.entries();
        self.report.binary_bytes = self.binary.payload_bytes();
        self.text.finish()?;
        self.binary.finish()?;
        Ok(self.report)
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn create_container(dir: &Path, kind: ContainerKind) -> Result<FileWriter> {
    Ok(BufWriter::new(File::create(container_path(dir, kind))?))
}

/// Open `path` for streaming, refusing anything that is not a regular file.
fn open_regular(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    Ok((file, meta.len()))
}

/// Create `dir`, emptying it first when `clean` is set.  Cleaning is refused
/// when `dir` is `input` or one of its ancestors.
fn prepare_output_dir(dir: &Path, clean: bool, input: &Path) -> Result<()> {
    if clean && dir.exists() {
        let output = dir.canonicalize()?;
        let input  = input.canonicalize()?;
        if input.starts_with(&output) {
            return Err(ArchiveError::OverlappingOutput { output, input });
        }
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Walk `root` and write both containers into `output_dir`.
pub fn pack<O: PackObserver + ?Sized>(
    root:       impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    opts:       &PackOptions,
    observer:   &mut O,
) -> Result<PackReport> {
    let output_dir = output_dir.as_ref();
    let _span = info_span!("pack", root = %root.as_ref().display()).entered();

    // The walker canonicalizes; validate the root before touching the output.
    let mut walker = DirectoryWalker::new(root.as_ref())?;
    prepare_output_dir(output_dir, opts.clean_output, walker.root())?;

    // The root itself is never excluded, so the container files are named
    // individually for an output directory that is the root.
    let output_abs = output_dir.canonicalize()?;
    let exclusion = opts.exclusion.clone()
        .exclude_path(&output_abs)
        .exclude_path(container_path(&output_abs, ContainerKind::Binary))
        .exclude_path(container_path(&output_abs, ContainerKind::Text));
    walker = walker
        .include_root_files(opts.include_root_files)
        .exclusion(exclusion);
    if let Some(pattern) = &opts.root_pattern {
        walker = walker.root_pattern(pattern)?;
    }

    let files = walker.files()?;
    info!(files = files.len(), output = %output_dir.display(), "packing");

    let mut session = PackSession::create(walker.root(), output_dir, observer)?;
    for path in &files {
        session.add_file(path)?;
    }
    let report = session.finish()?;
    info!(
        text = report.text_files,
        binary = report.binary_files,
        skipped = report.skipped.len(),
        "pack finished"
    );
    Ok(report)
}

// ── Unpack ───────────────────────────────────────────────────────────────────

type BinaryReader = BinaryContainerReader<BufReader<File>>;
type TextReader   = TextContainerReader<BufReader<File>>;

/// Open whichever containers exist in `input_dir`, validating their headers.
fn open_containers(input_dir: &Path) -> Result<(Option<BinaryReader>, Option<TextReader>, Vec<ContainerKind>)> {
    let mut missing = Vec::new();

    let bin_path = container_path(input_dir, ContainerKind::Binary);
    let binary = if bin_path.is_file() {
        Some(BinaryContainerReader::open(BufReader::new(File::open(&bin_path)?))?)
    } else {
        missing.push(ContainerKind::Binary);
        None
    };

    let txt_path = container_path(input_dir, ContainerKind::Text);
    let text = if txt_path.is_file() {
        Some(TextContainerReader::open(BufReader::new(File::open(&txt_path)?))?)
    } else {
        missing.push(ContainerKind::Text);
        None
    };

    if binary.is_none() && text.is_none() {
        return Err(ArchiveError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no containers found in {}", input_dir.display()),
        )));
    }
    for kind in &missing {
        warn!(container = %kind, file = kind.file_name(), "container not found, nothing to extract from it");
    }
    Ok((binary, text, missing))
}

/// Decode state for one run.
struct UnpackSession {
    output_dir: PathBuf,
    overwrite:  bool,
    seen:       HashSet<String>,
}

impl UnpackSession {
    /// Validate `rel` and create its destination file.
    fn open_destination(&mut self, kind: ContainerKind, index: u32, rel: &str) -> Result<FileWriter> {
        let entry = Some(index);
        if !self.seen.insert(rel.to_owned()) {
            return Err(ArchiveError::corrupt(kind, entry, format!("duplicate entry path {rel:?}")));
        }
        let dest = destination_path(&self.output_dir, rel)
            .ok_or_else(|| ArchiveError::UnsafePath { container: kind, entry, path: rel.to_owned() })?;
        let path_error = |path: &Path, source| ArchiveError::Path {
            container: kind,
            entry,
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| path_error(parent, e))?;
        }
        if !self.overwrite && dest.exists() {
            return Err(path_error(
                &dest,
                io::Error::new(io::ErrorKind::AlreadyExists, "destination exists and overwrite is disabled"),
            ));
        }
        let file = File::create(&dest).map_err(|e| path_error(&dest, e))?;
        Ok(BufWriter::new(file))
    }
}

/// Map a stored `/`-separated path onto `base`, refusing anything that
/// could land outside it.
pub fn destination_path(base: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    let mut parts = 0;
    for part in rel.split(is_stored_separator) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) if c == part => out.push(c),
            _ => return None,
        }
        parts += 1;
    }
    (parts > 0).then_some(out)
}

#[cfg(windows)]
fn is_stored_separator(c: char) -> bool { c == '/' || c == '\\' }

#[cfg(not(windows))]
fn is_stored_separator(c: char) -> bool { c == '/' }

/// Restore every entry of both containers in `input_dir` under `output_dir`.
///
/// Both container headers are validated before any file is written.  The
/// first error aborts the run.
pub fn unpack<O: PackObserver + ?Sized>(
    input_dir:  impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    opts:       &UnpackOptions,
    observer:   &mut O,
) -> Result<UnpackReport> {
    let input_dir  = input_dir.as_ref();
    let output_dir = output_dir.as_ref();
    let _span = info_span!("unpack", input = %input_dir.display()).entered();

    let (binary, text, missing) = open_containers(input_dir)?;
    prepare_output_dir(output_dir, opts.clean_output, input_dir)?;

    let mut session = UnpackSession {
        output_dir: output_dir.to_path_buf(),
        overwrite:  opts.overwrite,
        seen:       HashSet::new(),
    };
    let mut report = UnpackReport { output_dir: output_dir.to_path_buf(), missing, ..UnpackReport::default() };

    if let Some(mut reader) = binary {
        info!(entries = reader.declared(), "extracting binary container");
        while let Some(entry) = reader.read_entry(|e| {
            session.open_destination(ContainerKind::Binary, e.index, &e.relative_path)
        })? {
            debug!(path = %entry.relative_path, bytes = entry.length, "unpacked");
            observer.on_file_processed(&entry.relative_path, EntryKind::Binary);
            report.binary_files += 1;
        }
        reader.finish()?;
    }

    if let Some(mut reader) = text {
        info!(entries = reader.declared(), "extracting text container");
        while let Some(entry) = reader.read_entry(|e| {
            session.open_destination(ContainerKind::Text, e.index, &e.relative_path)
        })? {
            debug!(path = %entry.relative_path, chars = entry.length, "unpacked");
            observer.on_file_processed(&entry.relative_path, EntryKind::Text);
            report.text_files += 1;
        }
        reader.finish()?;
    }

    info!(text = report.text_files, binary = report.binary_files, "unpack finished");
    Ok(report)
}

// ── List ─────────────────────────────────────────────────────────────────────

/// Decode both containers without writing anything and return their entries
/// in container order (binary first).
pub fn list(input_dir: impl AsRef<Path>) -> Result<Vec<ListedEntry>> {
    let (binary, text, _) = open_containers(input_dir.as_ref())?;
    let mut entries = Vec::new();

    if let Some(mut reader) = binary {
        while let Some(e) = reader.read_entry(|_| Ok(io::sink()))? {
            entries.push(ListedEntry {
                container:     ContainerKind::Binary,
                index:         e.index,
                relative_path: e.relative_path,
                length:        e.length,
            });
        }
        reader.finish()?;
    }
    if let Some(mut reader) = text {
        while let Some(e) = reader.read_entry(|_| Ok(io::sink()))? {
            entries.push(ListedEntry {
                container:     ContainerKind::Text,
                index:         e.index,
                relative_path: e.relative_path,
                length:        e.length,
            });
        }
        reader.finish()?;
    }
    Ok(entries)
}
