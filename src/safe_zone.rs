//! Safe zone path policy
//!
//! Plugin source paths must resolve to a descendant of a single root
//! directory. This is a containment policy, not a sandbox.

use crate::error::SafeZoneError;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Filesystem subtree plugin paths must stay inside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeZone {
    root: PathBuf,
}

impl SafeZone {
    /// Create a safe zone rooted at `root`. The root itself must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafeZoneError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| SafeZoneError::Unresolvable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { root })
    }

    /// Safe zone rooted at the process working directory
    pub fn current() -> Result<Self, SafeZoneError> {
        let cwd = std::env::current_dir().map_err(|e| SafeZoneError::Unresolvable {
            path: PathBuf::from("."),
            reason: e.to_string(),
        })?;
        Self::new(cwd)
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to an absolute, symlink-free form and require that it
    /// lies inside the zone. Relative paths are taken relative to the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafeZoneError> {
        let raw = path.as_ref();
        let unresolvable = |reason: &str| SafeZoneError::Unresolvable {
            path: raw.to_path_buf(),
            reason: reason.to_string(),
        };

        if raw.as_os_str().is_empty() {
            return Err(unresolvable("empty path"));
        }
        if raw.to_string_lossy().contains('\0') {
            return Err(unresolvable("path contains a NUL byte"));
        }

        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };

        // Symlinks are resolved for each existing prefix before `..` is
        // applied, so `link/..` goes to the link target's parent.
        let mut resolved = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    resolved.push(component.as_os_str());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    match fs::canonicalize(&resolved) {
                        Ok(real) => resolved = real,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(unresolvable(&e.to_string())),
                    }
                }
            }
        }

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(SafeZoneError::OutsideZone {
                path: raw.to_path_buf(),
            })
        }
    }

    /// Check `path` without keeping the resolved form
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_ok()
    }
}
