//! Watcher error types.

use std::path::PathBuf;

/// Error starting the change watcher or building its filters.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The configured root has no parent directory or no name.
    #[error("Cannot watch {}: root folder needs a parent directory and a name", .0.display())]
    InvalidRoot(PathBuf),

    /// The root path could not be resolved.
    #[error("Cannot resolve {}: {source}", .path.display())]
    Resolve {
        /// Path as configured.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to create or register a watch handle.
    #[error("Failed to watch {}: {source}", .path.display())]
    Watch {
        /// Path the watch was registered on.
        path: PathBuf,
        /// Underlying notify error.
        #[source]
        source: notify::Error,
    },

    /// A glob pattern in the inclusion filter is invalid.
    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        /// Pattern as configured.
        pattern: String,
        /// Parse error.
        #[source]
        source: glob::PatternError,
    },

    /// A watcher thread could not be spawned.
    #[error("Failed to spawn {thread} thread: {source}")]
    Spawn {
        /// Which thread.
        thread: &'static str,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spawn_error_names_thread() {
        let error = WatchError::Spawn {
            thread: "coalescing timer",
            source: std::io::Error::other("resource temporarily unavailable"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to spawn coalescing timer thread: resource temporarily unavailable"
        );
        assert!(std::error::Error::source(&error).is_some());
    }
}
