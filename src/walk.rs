//! Deterministic, filtered directory traversal.
//!
//! Within each directory, files are yielded before subdirectories and both
//! groups are sorted by file name, so the same tree always produces the same
//! archive.  Exclusion is decided per entry name (hidden entries, build
//! output directories) and per absolute path (the archive's own output
//! directory, the running executable).

use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

/// Directory names skipped by default (compared case-insensitively).
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["bin", "obj", "packages", "build", "private"];

#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    /// Skip entries whose name starts with `.` or `~`.
    pub skip_hidden:        bool,
    /// Directory names to skip, lowercase.
    pub excluded_dir_names: Vec<String>,
    /// Absolute paths (files or directories) to skip.
    pub excluded_paths:     Vec<PathBuf>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            skip_hidden:        true,
            excluded_dir_names: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            excluded_paths:     Vec::new(),
        }
    }
}

impl ExclusionPolicy {
    /// A policy that excludes nothing.
    pub fn none() -> Self {
        Self { skip_hidden: false, excluded_dir_names: Vec::new(), excluded_paths: Vec::new() }
    }

    /// Also skip `path`.  Existing paths are canonicalized so they compare
    /// equal to what the walker yields.
    pub fn exclude_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.excluded_paths.push(path);
        self
    }

    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.excluded_paths.iter().any(|p| p == path) {
            return true;
        }
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_lowercase(),
            None    => return false,
        };
        if self.skip_hidden && (name.starts_with('.') || name.starts_with('~')) {
            return true;
        }
        is_dir && self.excluded_dir_names.iter().any(|d| *d == name)
    }
}

pub struct DirectoryWalker {
    root:               PathBuf,
    include_root_files: bool,
    root_pattern:       Option<GlobMatcher>,
    exclusion:          ExclusionPolicy,
}

impl DirectoryWalker {
    /// Walk `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root:               root.as_ref().canonicalize()?,
            include_root_files: true,
            root_pattern:       None,
            exclusion:          ExclusionPolicy::default(),
        })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Whether files directly inside the root are yielded.
    pub fn include_root_files(mut self, include: bool) -> Self {
        self.include_root_files = include;
        self
    }

    /// Only descend into first-level subdirectories whose name matches the
    /// glob `pattern`.
    pub fn root_pattern(mut self, pattern: &str) -> Result<Self> {
        self.root_pattern = Some(Glob::new(pattern)?.compile_matcher());
        Ok(self)
    }

    pub fn exclusion(mut self, policy: ExclusionPolicy) -> Self {
        self.exclusion = policy;
        self
    }

    fn keep(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let is_dir = entry.file_type().is_dir();
        if self.exclusion.is_excluded(entry.path(), is_dir) {
            return false;
        }
        if entry.depth() == 1 {
            if is_dir {
                if let Some(pattern) = &self.root_pattern {
                    return pattern.is_match(entry.file_name());
                }
            } else if !self.include_root_files {
                return false;
            }
        }
        true
    }

    /// Collect every file path in traversal order.
    ///
    /// An unreadable root is an error; unreadable entries below it are
    /// logged and skipped.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(files_first_by_name)
            .into_iter()
            .filter_entry(|e| self.keep(e));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let ft = entry.file_type();
            if ft.is_file() || (ft.is_symlink() && entry.path().is_file()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn files_first_by_name(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type().is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// `path` relative to `root`, with components joined by `/`.
///
/// Returns `None` when `path` is not under `root` or a component is not
/// valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
