//! Rules deciding whether a changed file warrants a refresh.

use std::path::{Component, Path, PathBuf};

use glob::Pattern;

use crate::error::WatchError;

/// Outcome of an [`InclusionFilter`] for one changed path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InclusionDecision {
    /// Fall through to the extension allow-list.
    #[default]
    Continue,
    /// Refresh even if the extension is not allowed.
    ForceRefresh,
    /// Never refresh for this path.
    DontRefresh,
}

/// Optional per-path predicate consulted before the extension allow-list.
///
/// Called synchronously from watcher threads; must be cheap and pure.
pub trait InclusionFilter: Send + Sync {
    /// Decide how to treat `path` (absolute, as reported by the OS).
    fn decide(&self, path: &Path) -> InclusionDecision;
}

impl<F> InclusionFilter for F
where
    F: Fn(&Path) -> InclusionDecision + Send + Sync,
{
    fn decide(&self, path: &Path) -> InclusionDecision {
        self(path)
    }
}

/// Inclusion filter built from glob lists relative to the watched root.
///
/// `ignore` wins over `force_refresh`; paths outside the root continue.
#[derive(Debug)]
pub struct GlobInclusionFilter {
    root: PathBuf,
    force_refresh: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

impl GlobInclusionFilter {
    /// Compile the glob lists.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Pattern`] for the first invalid pattern.
    pub fn new(
        root: impl Into<PathBuf>,
        force_refresh: &[String],
        ignore: &[String],
    ) -> Result<Self, WatchError> {
        Ok(Self {
            root: root.into(),
            force_refresh: compile_patterns(force_refresh)?,
            ignore: compile_patterns(ignore)?,
        })
    }

    /// Whether the filter has no patterns at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.force_refresh.is_empty() && self.ignore.is_empty()
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, WatchError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| WatchError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

impl InclusionFilter for GlobInclusionFilter {
    fn decide(&self, path: &Path) -> InclusionDecision {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return InclusionDecision::Continue;
        };

        if self.ignore.iter().any(|p| p.matches_path(relative)) {
            InclusionDecision::DontRefresh
        } else if self.force_refresh.iter().any(|p| p.matches_path(relative)) {
            InclusionDecision::ForceRefresh
        } else {
            InclusionDecision::Continue
        }
    }
}

/// Immutable, case-insensitive set of file extensions (with leading dot).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionAllowList {
    extensions: Vec<String>,
}

impl ExtensionAllowList {
    /// Parse a comma separated list such as `.live,.css,.js`.
    ///
    /// Empty entries are skipped and a missing leading dot is added.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let extensions = list
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(normalize_extension)
            .collect();
        Self { extensions }
    }

    /// Whether `extension` (with leading dot) is allowed.
    #[must_use]
    pub fn contains(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    /// Number of extensions in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

fn normalize_extension(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_owned()
    } else {
        format!(".{ext}")
    }
}

/// Extension of `path` with a leading dot, e.g. `.css`.
pub(crate) fn dotted_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    (!ext.is_empty()).then(|| format!(".{ext}"))
}

/// Whether any component of `path` is a `node_modules` directory.
pub(crate) fn is_in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == "node_modules"))
}
