//! Boundary to whatever pushes refresh messages to clients.

/// Result of a refresh request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Message handed to this many connected clients.
    Delivered(usize),
    /// Nobody is listening.
    NoClients,
    /// Message will be sent later (server recompile delay).
    Deferred,
}

/// Pushes refresh requests to every open client connection.
///
/// Called from watcher and timer threads, possibly concurrently.
pub trait RefreshBroadcaster: Send + Sync {
    /// Request a refresh; `delayed` asks clients to give the origin server
    /// time to recompile before reloading.
    fn request_refresh(&self, delayed: bool) -> RefreshOutcome;
}
