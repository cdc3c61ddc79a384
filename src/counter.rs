//! Output counter shared by every save.
//!
//! The first save into a folder scans it for the highest counter already on
//! disk. After that the next free counter lives in memory, so later batches
//! skip the scan. A batch reserves all of its counters at once: the block
//! `start..start + n` is handed out under one lock, which keeps concurrent
//! batches from colliding and keeps a batch's files numbered contiguously.
//!
//! State is keyed by folder, counter position and extension. When
//! `one_counter_per_folder` is off the resolved base name joins the key and
//! the scan only counts files carrying that base name.

use crate::naming::{self, NameScheme};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Which existing files count towards the next counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterScope {
    pub scheme: NameScheme,
    /// Base name that must appear in counted files, or `None` to count every
    /// file in the folder.
    pub prefix: Option<String>,
}

impl CounterScope {
    fn key(&self, folder: &Path) -> String {
        let folder = canonical(folder);
        let base = format!(
            "{}|{}|{}",
            folder.display(),
            self.scheme.position,
            self.scheme.extension
        );
        match &self.prefix {
            Some(prefix) => format!("{base}|{prefix}|prefix"),
            None => format!("{base}|global"),
        }
    }
}

fn canonical(folder: &Path) -> PathBuf {
    fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf())
}

/// Highest counter among the files of `folder` that match `scope`.
///
/// A missing or unreadable folder counts as empty.
pub fn find_max_counter(folder: &Path, scope: &CounterScope) -> u64 {
    let pattern = match naming::counter_pattern(&scope.scheme, scope.prefix.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            warn!("Counter pattern failed to compile: {}", e);
            return 0;
        }
    };
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            if folder.exists() {
                warn!("Cannot scan {} for counters: {}", folder.display(), e);
            }
            return 0;
        }
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name();
            naming::captured_counter(&pattern, name.to_str()?)
        })
        .max()
        .unwrap_or(0)
}

/// Hands out counters, one contiguous block per batch.
#[derive(Debug, Default)]
pub struct OutputCounter {
    next: Mutex<HashMap<String, u64>>,
}

impl OutputCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` consecutive counters and return the first.
    pub fn reserve(&self, folder: &Path, scope: &CounterScope, count: usize) -> u64 {
        let key = scope.key(folder);
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let start = match next.get(&key) {
            Some(&n) => {
                debug!("Counter for {} continues at {}", folder.display(), n);
                n
            }
            None => {
                let n = find_max_counter(folder, scope) + 1;
                debug!("Counter for {} starts at {} after scan", folder.display(), n);
                n
            }
        };
        next.insert(key, start + count as u64);
        start
    }

    /// Scan `folders` ahead of time so the first batch skips the scan.
    pub fn preload<'a>(&self, folders: impl IntoIterator<Item = &'a Path>, scope: &CounterScope) {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        for folder in folders {
            next.entry(scope.key(folder))
                .or_insert_with(|| find_max_counter(folder, scope) + 1);
        }
    }

    /// Forget the state of one folder so the next reservation rescans it.
    pub fn invalidate(&self, folder: &Path) {
        let prefix = format!("{}|", canonical(folder).display());
        self.next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn invalidate_all(&self) {
        self.next.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of folders with in-memory state.
    pub fn tracked(&self) -> usize {
        self.next.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
