//! Application state.
//!
//! Shared state for all request handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::runtime::Handle;

use crate::error::ServerError;
use crate::live_reload::{ClientScript, WebSocketBroadcaster, websocket_endpoint};
use crate::{LiveReloadSettings, ServerConfig};

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Folder static files are served from.
    pub(crate) root: PathBuf,
    /// Live reload state (if enabled).
    pub(crate) live_reload: Option<LiveReloadState>,
}

/// Everything the live reload routes and HTML injection need.
pub(crate) struct LiveReloadState {
    pub(crate) broadcaster: Arc<WebSocketBroadcaster>,
    pub(crate) script: ClientScript,
    pub(crate) websocket_path: String,
    pub(crate) script_path: String,
    websocket_host: Option<String>,
    inject_exclude: Vec<glob::Pattern>,
}

impl LiveReloadState {
    fn new(settings: &LiveReloadSettings, runtime: Handle) -> Result<Self, ServerError> {
        let inject_exclude = settings
            .inject_exclude
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|source| ServerError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            broadcaster: Arc::new(WebSocketBroadcaster::new(
                runtime,
                settings.server_refresh_timeout,
            )),
            script: ClientScript::load()?,
            websocket_path: settings.websocket_path.clone(),
            script_path: settings.script_path.clone(),
            websocket_host: settings.websocket_host.clone(),
            inject_exclude,
        })
    }

    /// Websocket URL for clients of this request.
    pub(crate) fn endpoint(&self, headers: &HeaderMap) -> String {
        websocket_endpoint(self.websocket_host.as_deref(), &self.websocket_path, headers)
    }

    /// Whether HTML served for `request_path` gets the client script.
    pub(crate) fn should_inject(&self, request_path: &str) -> bool {
        !self.inject_exclude.iter().any(|p| p.matches(request_path))
    }
}

impl AppState {
    /// Build state for `config`; deferred refreshes run on `runtime`.
    pub(crate) fn new(config: &ServerConfig, runtime: Handle) -> Result<Self, ServerError> {
        let live_reload = config
            .live_reload
            .as_ref()
            .map(|settings| LiveReloadState::new(settings, runtime))
            .transpose()?;

        Ok(Self {
            root: config.root.clone(),
            live_reload,
        })
    }
}
