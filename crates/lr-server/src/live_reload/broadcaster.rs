//! Refresh broadcaster backed by a tokio broadcast channel.
//!
//! Every websocket connection subscribes a receiver; the file watcher calls
//! [`RefreshBroadcaster::request_refresh`] from its own threads.

use std::time::Duration;

use lr_protocol::RefreshMessage;
use lr_watcher::{RefreshBroadcaster, RefreshOutcome};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Refresh messages are idempotent, so a
/// lagging client losing some of them still reloads.
const CHANNEL_CAPACITY: usize = 16;

/// Pushes refresh messages to all connected websocket clients.
pub(crate) struct WebSocketBroadcaster {
    sender: broadcast::Sender<RefreshMessage>,
    runtime: Handle,
    server_refresh_timeout: Duration,
}

impl WebSocketBroadcaster {
    /// Create a broadcaster spawning deferred sends on `runtime`.
    pub(crate) fn new(runtime: Handle, server_refresh_timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            runtime,
            server_refresh_timeout,
        }
    }

    /// Receiver for a new client connection.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RefreshMessage> {
        self.sender.subscribe()
    }

    /// Number of connected clients.
    pub(crate) fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn send(sender: &broadcast::Sender<RefreshMessage>, message: RefreshMessage) -> RefreshOutcome {
    match sender.send(message) {
        Ok(clients) => RefreshOutcome::Delivered(clients),
        Err(_) => RefreshOutcome::NoClients,
    }
}

impl RefreshBroadcaster for WebSocketBroadcaster {
    fn request_refresh(&self, delayed: bool) -> RefreshOutcome {
        if delayed && !self.server_refresh_timeout.is_zero() {
            let sender = self.sender.clone();
            let timeout = self.server_refresh_timeout;
            self.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                let outcome = send(&sender, RefreshMessage::DelayRefresh);
                tracing::debug!(?outcome, "Deferred refresh sent");
            });
            return RefreshOutcome::Deferred;
        }
        send(&self.sender, RefreshMessage::for_request(delayed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_no_clients() {
        let broadcaster = WebSocketBroadcaster::new(Handle::current(), Duration::ZERO);
        assert_eq!(broadcaster.request_refresh(false), RefreshOutcome::NoClients);
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_delivered_to_every_client() {
        let broadcaster = WebSocketBroadcaster::new(Handle::current(), Duration::ZERO);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        assert_eq!(broadcaster.request_refresh(false), RefreshOutcome::Delivered(2));
        assert_eq!(first.recv().await.unwrap(), RefreshMessage::Refresh);
        assert_eq!(second.recv().await.unwrap(), RefreshMessage::Refresh);
    }

    #[tokio::test]
    async fn test_delayed_refresh_waits_for_recompile() {
        let timeout = Duration::from_millis(100);
        let broadcaster = WebSocketBroadcaster::new(Handle::current(), timeout);
        let mut client = broadcaster.subscribe();

        let start = tokio::time::Instant::now();
        assert_eq!(broadcaster.request_refresh(true), RefreshOutcome::Deferred);
        assert_eq!(client.recv().await.unwrap(), RefreshMessage::DelayRefresh);
        assert!(start.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn test_delayed_without_timeout_sends_now() {
        let broadcaster = WebSocketBroadcaster::new(Handle::current(), Duration::ZERO);
        let mut client = broadcaster.subscribe();

        assert_eq!(broadcaster.request_refresh(true), RefreshOutcome::Delivered(1));
        assert_eq!(client.recv().await.unwrap(), RefreshMessage::DelayRefresh);
    }
}
