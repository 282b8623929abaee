//! Which files to scan, and which of their lines matter.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use glob::glob;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::error::LintError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("{0}: no such file or directory")]
    NotFound(String),

    #[error("invalid glob pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("cannot read {path}: {message}")]
    Walk { path: String, message: String },
}

impl DiscoveryError {
    fn path(&self) -> &str {
        match self {
            Self::NotFound(path) => path,
            Self::Pattern { pattern, .. } => pattern,
            Self::Walk { path, .. } => path,
        }
    }
}

impl From<DiscoveryError> for LintError {
    fn from(err: DiscoveryError) -> Self {
        LintError::Discovery {
            path: err.path().to_string(),
            message: err.to_string(),
        }
    }
}

/// Paths under scan, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileChanges {
    paths: Vec<String>,
}

impl FileChanges {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let paths = paths
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| seen.insert(p.clone()))
            .collect();
        Self { paths }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}

/// Expand CLI inputs into rule files.
///
/// Files named explicitly are always kept. Directories are walked and glob
/// patterns expanded, keeping only `.yml` / `.yaml` files.
pub fn find_files(inputs: &[String]) -> Result<FileChanges, DiscoveryError> {
    let mut found = Vec::new();

    for input in inputs {
        if is_glob_pattern(input) {
            let entries = glob(input).map_err(|e| DiscoveryError::Pattern {
                pattern: input.clone(),
                message: e.to_string(),
            })?;
            for entry in entries {
                let path = entry.map_err(|e| DiscoveryError::Walk {
                    path: e.path().display().to_string(),
                    message: e.error().to_string(),
                })?;
                if path.is_dir() {
                    walk(&path, &mut found)?;
                } else if path.is_file() && is_rule_file(&path) {
                    found.push(path.display().to_string());
                }
            }
            continue;
        }

        let path = Path::new(input);
        if path.is_dir() {
            walk(path, &mut found)?;
        } else if path.is_file() {
            found.push(input.clone());
        } else {
            return Err(DiscoveryError::NotFound(input.clone()));
        }
    }

    Ok(FileChanges::new(found))
}

fn walk(dir: &Path, found: &mut Vec<String>) -> Result<(), DiscoveryError> {
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| DiscoveryError::Walk {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| dir.display().to_string()),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_rule_file(entry.path()) {
            found.push(entry.path().display().to_string());
        }
    }
    Ok(())
}

/// Lines of one file that are in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineResult {
    pub path: String,
    /// `None` means every line.
    lines: Option<BTreeSet<usize>>,
}

impl LineResult {
    pub fn all(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: None,
        }
    }

    pub fn only(path: impl Into<String>, lines: impl IntoIterator<Item = usize>) -> Self {
        Self {
            path: path.into(),
            lines: Some(lines.into_iter().collect()),
        }
    }

    /// True if any of `lines` is in scope.
    pub fn has_lines(&self, lines: &[usize]) -> bool {
        match &self.lines {
            None => true,
            Some(set) => lines.iter().any(|l| set.contains(l)),
        }
    }
}

/// Maps a path to the lines that should be checked.
pub trait LineFinder: Send + Sync {
    fn find(&self, path: &str) -> Result<LineResult, DiscoveryError>;
}

/// Every line of every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllLines;

impl LineFinder for AllLines {
    fn find(&self, path: &str) -> Result<LineResult, DiscoveryError> {
        Ok(LineResult::all(path))
    }
}

/// A fixed set of lines per path, e.g. taken from a diff. Paths without an
/// entry have no lines in scope.
#[derive(Debug, Clone, Default)]
pub struct StaticLines {
    lines: HashMap<String, BTreeSet<usize>>,
}

impl StaticLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(mut self, path: impl Into<String>, lines: impl IntoIterator<Item = usize>) -> Self {
        self.lines.entry(path.into()).or_default().extend(lines);
        self
    }
}

impl LineFinder for StaticLines {
    fn find(&self, path: &str) -> Result<LineResult, DiscoveryError> {
        let lines = self.lines.get(path).cloned().unwrap_or_default();
        Ok(LineResult::only(path, lines))
    }
}
