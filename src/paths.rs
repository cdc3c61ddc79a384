//! Output folders under the output root.
//!
//! A resolved folder name such as `2024-01-01/sd_xl_base` is split on `/`,
//! each component is made safe for every common filesystem, and the result is
//! joined under the output root. `..` components are honoured but may not
//! climb out of the root.
//!
//! The root can also be inspected ([`OutputRoot::info`]) and pruned of empty
//! folders ([`OutputRoot::cleanup_empty_dirs`]).

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::template::INVALID_NAME_CHARS;

/// Longest folder component kept, in characters.
pub const MAX_COMPONENT_LEN: usize = 200;

/// Folder levels below the root that empty-folder cleanup visits by default.
pub const DEFAULT_CLEANUP_DEPTH: usize = 3;

/// Device names Windows refuses as file or folder names.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Error, Debug)]
pub enum PathError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("folder {0} escapes the output root")]
    EscapesOutputRoot(PathBuf),
}

/// Clean a single folder component.
pub fn clean_component(part: &str) -> String {
    let replaced: String = part
        .chars()
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    let mut cleaned = if RESERVED_NAMES.contains(&trimmed.to_ascii_uppercase().as_str()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    };
    if let Some((idx, _)) = cleaned.char_indices().nth(MAX_COMPONENT_LEN) {
        cleaned.truncate(idx);
    }
    cleaned
}

/// Clean every component of a `/`-separated folder name.
///
/// Empty and `.` components are dropped, `..` is kept as is.
pub fn clean_folder(folder: &str) -> String {
    folder
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .map(|p| if p == ".." { p.to_string() } else { clean_component(p) })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// What is under the output root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathInfo {
    pub root: PathBuf,
    pub exists: bool,
    /// The root is a folder without the read-only permission bit.
    pub writable: bool,
    /// Folders below the root, at any depth.
    pub folders: usize,
    pub files: usize,
    pub total_bytes: u64,
}

/// Resolves folder names against a fixed output root.
#[derive(Debug, Clone)]
pub struct OutputRoot {
    root: PathBuf,
}

impl OutputRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute-or-relative path of `folder` under the root. No I/O.
    ///
    /// An empty folder name is the root itself.
    pub fn folder_path(&self, folder: &str) -> Result<PathBuf, PathError> {
        let cleaned = clean_folder(folder);
        let mut parts: Vec<&str> = Vec::new();
        for part in cleaned.split('/').filter(|p| !p.is_empty()) {
            if part == ".." {
                if parts.pop().is_none() {
                    return Err(PathError::EscapesOutputRoot(PathBuf::from(folder)));
                }
            } else {
                parts.push(part);
            }
        }
        Ok(parts.iter().fold(self.root.clone(), |path, p| path.join(p)))
    }

    /// Like [`folder_path`](Self::folder_path), creating the folder.
    pub fn create_folder(&self, folder: &str) -> Result<PathBuf, PathError> {
        let path = self.folder_path(folder)?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Folder of a saved file relative to the root, `/`-separated.
    ///
    /// Files directly in the root, and files outside it, yield `""`.
    pub fn subfolder_of(&self, file: &Path) -> String {
        let Ok(relative) = file.strip_prefix(&self.root) else {
            return String::new();
        };
        let Some(parent) = relative.parent() else {
            return String::new();
        };
        parent
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Walk the root and describe it. A missing root is reported, not an error.
    pub fn info(&self) -> PathInfo {
        let mut info = PathInfo {
            root: self.root.clone(),
            ..PathInfo::default()
        };
        let Ok(meta) = fs::metadata(&self.root) else {
            return info;
        };
        info.exists = meta.is_dir();
        info.writable = info.exists && !meta.permissions().readonly();

        for entry in WalkDir::new(&self.root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() {
                info.folders += 1;
            } else if entry.file_type().is_file() {
                info.files += 1;
                info.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        info
    }

    /// Every folder from the root down, the root first.
    pub fn folders(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect()
    }

    /// Remove empty folders at most `max_depth` levels below the root.
    ///
    /// Folders that only held empty folders go too. The root is kept. Returns
    /// the number of folders removed.
    pub fn cleanup_empty_dirs(&self, max_depth: usize) -> usize {
        let mut removed = 0;
        let entries = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok());
        for entry in entries {
            // remove_dir refuses non-empty folders
            if entry.file_type().is_dir() && fs::remove_dir(entry.path()).is_ok() {
                debug!("removed empty folder {}", entry.path().display());
                removed += 1;
            }
        }
        removed
    }
}
