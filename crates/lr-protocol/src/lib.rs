//! Wire protocol for lr live reload.
//!
//! The server pushes plain text websocket frames to every connected tab.
//! There are exactly two messages:
//!
//! | Frame          | Meaning                          | Client action          |
//! |----------------|----------------------------------|------------------------|
//! | `Refresh`      | a watched file changed           | reload after ~10 ms    |
//! | `DelayRefresh` | the origin server is recompiling | reload after ~1000 ms  |
//!
//! Any other payload carries no meaning and must be ignored by clients.

use std::fmt;
use std::time::Duration;

/// Default path of the live reload websocket endpoint.
pub const DEFAULT_WEBSOCKET_PATH: &str = "/__livereload";

/// Default path the client script is served from.
pub const DEFAULT_SCRIPT_PATH: &str = "/__livereloadscript";

/// Extension whose files are touched to signal a server restart.
///
/// Must be part of every extension allow-list.
pub const SENTINEL_EXTENSION: &str = ".live";

/// Default extension allow-list.
pub const DEFAULT_EXTENSIONS: &str = ".live,.css,.js,.htm,.html,.ts";

/// Default extensions of templates the origin server compiles on demand.
pub const DEFAULT_RECOMPILE_EXTENSIONS: [&str; 2] = [".cshtml", ".razor"];

/// Message pushed from the server to connected clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshMessage {
    /// Reload right away.
    Refresh,
    /// Reload after giving the origin server time to recompile.
    DelayRefresh,
}

impl RefreshMessage {
    /// Message for a refresh request with the given `delayed` hint.
    #[must_use]
    pub fn for_request(delayed: bool) -> Self {
        if delayed {
            Self::DelayRefresh
        } else {
            Self::Refresh
        }
    }

    /// Text frame payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Refresh => "Refresh",
            Self::DelayRefresh => "DelayRefresh",
        }
    }

    /// Parse a text frame payload.
    ///
    /// Matching is exact; anything else yields `None`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Refresh" => Some(Self::Refresh),
            "DelayRefresh" => Some(Self::DelayRefresh),
            _ => None,
        }
    }

    /// How long a client waits after receiving this message before reloading.
    #[must_use]
    pub fn reload_delay(self) -> Duration {
        match self {
            Self::Refresh => Duration::from_millis(10),
            Self::DelayRefresh => Duration::from_millis(1000),
        }
    }
}

impl fmt::Display for RefreshMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
