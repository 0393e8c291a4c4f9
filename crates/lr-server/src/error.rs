//! Server error types.

use lr_watcher::WatchError;

/// Error starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The client script was not embedded at build time.
    #[error("Live reload client script '{0}' is missing from the build")]
    MissingClientScript(&'static str),

    /// An `inject_exclude` glob is invalid.
    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        /// Pattern as configured.
        pattern: String,
        /// Parse error.
        #[source]
        source: glob::PatternError,
    },

    /// Host and port do not form a socket address.
    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),

    /// The file watcher could not start.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Binding or serving failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
