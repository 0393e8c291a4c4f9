//! Live reload: refresh broadcasting, client script and HTML injection.

mod broadcaster;
mod inject;
mod script;
mod websocket;

pub(crate) use broadcaster::WebSocketBroadcaster;
pub(crate) use inject::inject_script;
pub(crate) use script::{ClientScript, websocket_endpoint};
pub(crate) use websocket::{script_handler, ws_handler};
