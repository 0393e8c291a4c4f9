//! The monitored root folder.

use std::path::{Path, PathBuf};

use crate::error::WatchError;

/// Absolute path of the watched root together with its parent and name.
///
/// Established once per [`ChangeWatcher::start`](crate::ChangeWatcher::start)
/// and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTarget {
    path: PathBuf,
    parent: PathBuf,
    name: String,
}

impl WatchTarget {
    /// Resolve `root` to an absolute path.
    ///
    /// Existing roots are canonicalized so that paths reported by the OS
    /// share the same prefix; missing roots are made absolute lexically.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidRoot`] for a root without parent or name
    /// (e.g. `/`) and [`WatchError::Resolve`] if the path cannot be resolved.
    pub fn resolve(root: &Path) -> Result<Self, WatchError> {
        let resolve_err = |source| WatchError::Resolve {
            path: root.to_path_buf(),
            source,
        };
        let path = if root.exists() {
            root.canonicalize().map_err(resolve_err)?
        } else {
            std::path::absolute(root).map_err(resolve_err)?
        };

        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WatchError::InvalidRoot(path.clone()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WatchError::InvalidRoot(path.clone()))?;

        Ok(Self { path, parent, name })
    }

    /// Absolute path of the root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the root.
    #[must_use]
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    /// Base name of the root.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `path` names the root entry inside its parent.
    ///
    /// Only the final component is compared, ignoring ASCII case.
    #[must_use]
    pub fn is_root_entry(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(&self.name))
    }
}
