//! Process-wide plugin search path
//!
//! While a file plugin loads, its directory and that directory's parent are
//! pushed onto a shared search path so the plugin can find sibling
//! libraries. A [`SearchPathGuard`] removes exactly what it added when
//! dropped, including on unwind.

use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static SEARCH_PATH: Lazy<Mutex<Vec<PathBuf>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Serializes the push/load/restore window across concurrent loads
static LOAD_LOCK: Mutex<()> = Mutex::new(());

fn entries() -> MutexGuard<'static, Vec<PathBuf>> {
    // A panic while holding the lock cannot leave the Vec half-written
    SEARCH_PATH.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Take the load lock for the duration of one plugin load
pub fn lock_loading() -> MutexGuard<'static, ()> {
    LOAD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Current search path, highest priority first
pub fn snapshot() -> Vec<PathBuf> {
    entries().clone()
}

/// Permanently append a directory (host-configured base entries)
pub fn append(dir: &Path) {
    let mut entries = entries();
    if !entries.iter().any(|p| p == dir) {
        entries.push(dir.to_path_buf());
    }
}

/// Temporary search path entries
#[derive(Debug)]
pub struct SearchPathGuard {
    added: Vec<PathBuf>,
}

impl SearchPathGuard {
    /// Prepend `dirs` that are not already present
    pub fn push<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut entries = entries();
        let mut added: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref();
            if entries.iter().any(|p| p == dir) || added.iter().any(|p| p == dir) {
                continue;
            }
            added.push(dir.to_path_buf());
        }
        for (i, dir) in added.iter().enumerate() {
            entries.insert(i, dir.clone());
        }
        Self { added }
    }

    /// Entries this guard added
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }
}

impl Drop for SearchPathGuard {
    fn drop(&mut self) {
        let mut entries = entries();
        for dir in &self.added {
            if let Some(pos) = entries.iter().position(|p| p == dir) {
                entries.remove(pos);
            }
        }
    }
}

/// Directories pushed for a plugin file: its directory and that
/// directory's parent
pub fn plugin_dirs(plugin_file: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = plugin_file.parent() {
        dirs.push(dir.to_path_buf());
        if let Some(parent) = dir.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}
