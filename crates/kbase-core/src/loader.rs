//! Walks a docs root and yields one outcome per regular file.
//!
//! Files with a supported extension that decode as UTF-8 become
//! [`Document`]s; everything else is reported as a [`SkippedFile`] so the
//! caller can surface it in the ingestion report. Hidden files and
//! directories are ignored without a report.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, FilterEntry, WalkDir};

use crate::error::{Error, Result};
use crate::types::{Document, SkippedFile, ROOT_CATEGORY};

pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "txt", "py", "js", "ts", "java", "cpp", "c", "h"];

pub const UNSUPPORTED_EXTENSION: &str = "unsupported extension";
pub const INVALID_UTF8: &str = "invalid utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(Document),
    Skipped(SkippedFile),
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
    extensions: BTreeSet<String>,
}

impl DocumentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a fresh walk. Each call re-reads the filesystem.
    pub fn documents(&self) -> Result<Documents> {
        if !self.root.is_dir() {
            return Err(Error::Configuration(format!(
                "docs root {} does not exist or is not a directory",
                self.root.display()
            )));
        }
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible as fn(&DirEntry) -> bool);
        Ok(Documents {
            root: self.root.clone(),
            extensions: self.extensions.clone(),
            walker,
        })
    }

    /// Counts files per extension without reading their contents.
    pub fn scan_summary(&self) -> Result<ScanSummary> {
        if !self.root.is_dir() {
            return Err(Error::Configuration(format!(
                "docs root {} does not exist or is not a directory",
                self.root.display()
            )));
        }
        let mut summary = ScanSummary {
            root: self.root.clone(),
            ..ScanSummary::default()
        };
        let entries = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible);
        for entry in entries.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = extension_of(entry.path());
            if self.extensions.contains(&ext) {
                summary.supported += 1;
                *summary.by_extension.entry(ext).or_default() += 1;
                *summary
                    .by_category
                    .entry(category_of(&self.root, entry.path()))
                    .or_default() += 1;
            } else {
                summary.unsupported += 1;
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub root: PathBuf,
    pub supported: usize,
    pub unsupported: usize,
    pub by_extension: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// Lazy iterator over the files below a docs root, in file-name order.
pub struct Documents {
    root: PathBuf,
    extensions: BTreeSet<String>,
    walker: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl Iterator for Documents {
    type Item = LoadOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    return Some(LoadOutcome::Skipped(SkippedFile::new(&path, err.to_string())));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            return Some(self.load(entry.path()));
        }
    }
}

impl Documents {
    fn load(&self, path: &Path) -> LoadOutcome {
        let extension = extension_of(path);
        if !self.extensions.contains(&extension) {
            debug!(path = %path.display(), "unsupported extension");
            return LoadOutcome::Skipped(SkippedFile::new(path, UNSUPPORTED_EXTENSION));
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read file");
                return LoadOutcome::Skipped(SkippedFile::new(path, err.to_string()));
            }
        };
        let Ok(raw_text) = String::from_utf8(bytes) else {
            warn!(path = %path.display(), "file is not valid utf-8");
            return LoadOutcome::Skipped(SkippedFile::new(path, INVALID_UTF8));
        };
        LoadOutcome::Loaded(Document {
            path: path.to_path_buf(),
            rel_path: rel_path_of(&self.root, path),
            raw_text,
            category: category_of(&self.root, path),
            extension,
        })
    }
}

fn is_visible(entry: &DirEntry) -> bool {
    entry.depth() == 0
        || !entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn relative_components(root: &Path, path: &Path) -> Vec<String> {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn rel_path_of(root: &Path, path: &Path) -> String {
    relative_components(root, path).join("/")
}

/// First directory under the root, or [`ROOT_CATEGORY`] for top-level files.
fn category_of(root: &Path, path: &Path) -> String {
    let parts = relative_components(root, path);
    if parts.len() > 1 {
        parts[0].clone()
    } else {
        ROOT_CATEGORY.to_string()
    }
}
