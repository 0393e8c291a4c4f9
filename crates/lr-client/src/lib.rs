//! Live reload client for lr.
//!
//! [`ConnectionController`] is the connection lifecycle as a pure state
//! machine: it waits a short grace period after page load, connects, reloads
//! on `Refresh`/`DelayRefresh`, probes for the server after a disconnect and
//! reloads once it is back, and stays quiet while the page navigates away.
//!
//! [`spawn`] runs the controller on tokio against a real websocket endpoint
//! and calls [`Page::reload`] when a reload is due.

mod controller;
mod driver;

pub use controller::{
    ClientEvent, Command, ConnectionController, ConnectionId, ConnectionState, HANDSHAKE_TIMEOUT,
    RETRY_INTERVAL,
    STARTUP_GRACE, Timer, UNLOAD_GRACE,
};
pub use driver::{ClientHandle, Page, spawn};
