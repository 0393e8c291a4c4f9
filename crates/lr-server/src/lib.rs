//! HTTP server with live reload for lr.
//!
//! Serves a folder of static files and keeps every open page fresh:
//!
//! - HTML responses get a small client script spliced in before `</body>`
//! - the script connects to a websocket endpoint and reloads the page when
//!   it receives `Refresh` or `DelayRefresh`
//! - an [`lr_watcher::ChangeWatcher`] monitors the folder and pushes those
//!   messages through a broadcast channel
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use lr_server::{LiveReloadSettings, ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_owned(),
//!         port: 5000,
//!         root: PathBuf::from("site"),
//!         live_reload: Some(LiveReloadSettings::default()),
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum server (lr-server)
//!    ▲                  │
//!    │                  ├─► static files (+ script injection)
//!    │                  ├─► client script
//!    └──── WebSocket ◄──┴─► broadcast channel ◄── ChangeWatcher (notify)
//! ```

mod app;
mod error;
mod live_reload;
mod middleware;
mod state;
mod static_files;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lr_protocol::{DEFAULT_SCRIPT_PATH, DEFAULT_WEBSOCKET_PATH};
use lr_watcher::{ChangeWatcher, GlobInclusionFilter, RefreshBroadcaster, WatchOptions};
use state::AppState;
use tokio::runtime::Handle;

pub use error::ServerError;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Folder to serve and watch.
    pub root: PathBuf,
    /// Live reload settings (`None` disables live reload entirely).
    pub live_reload: Option<LiveReloadSettings>,
}

/// Live reload settings.
#[derive(Clone, Debug)]
pub struct LiveReloadSettings {
    /// Comma separated extension allow-list.
    pub extensions: String,
    /// Extensions of templates the origin server recompiles.
    pub recompile_extensions: Vec<String>,
    /// Delay before sending `DelayRefresh`.
    pub server_refresh_timeout: Duration,
    /// Websocket endpoint path.
    pub websocket_path: String,
    /// Explicit websocket origin, e.g. `ws://localhost:5000`.
    pub websocket_host: Option<String>,
    /// Client script path; empty inlines the script into pages.
    pub script_path: String,
    /// Globs (relative to the root) that always refresh.
    pub force_refresh: Vec<String>,
    /// Globs (relative to the root) that never refresh.
    pub ignore: Vec<String>,
    /// Request path globs that never get the script injected.
    pub inject_exclude: Vec<String>,
}

impl Default for LiveReloadSettings {
    fn default() -> Self {
        let watch = WatchOptions::default();
        Self {
            extensions: watch.extensions,
            recompile_extensions: watch.recompile_extensions,
            server_refresh_timeout: watch.server_refresh_timeout,
            websocket_path: DEFAULT_WEBSOCKET_PATH.to_owned(),
            websocket_host: None,
            script_path: DEFAULT_SCRIPT_PATH.to_owned(),
            force_refresh: Vec::new(),
            ignore: Vec::new(),
            inject_exclude: Vec::new(),
        }
    }
}

/// Run the server until Ctrl-C.
///
/// Starts the file watcher before accepting connections and stops it after
/// the server shut down.
///
/// # Errors
///
/// Returns an error if the client script is missing, a glob is invalid, the
/// watcher cannot start or the address cannot be bound.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let state = Arc::new(AppState::new(&config, Handle::current())?);

    let mut watcher = match (&config.live_reload, &state.live_reload) {
        (Some(settings), Some(live_reload)) => {
            let broadcaster: Arc<dyn RefreshBroadcaster> = Arc::clone(&live_reload.broadcaster) as _;
            Some(start_watcher(&config.root, settings, broadcaster)?)
        }
        _ => None,
    };

    let app = app::create_router(state);

    let address = format!("{}:{}", config.host, config.port);
    let addr = SocketAddr::from_str(&address).map_err(|_| ServerError::InvalidAddress(address))?;
    tracing::info!(address = %addr, root = %config.root.display(), "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(ref mut watcher) = watcher {
        watcher.stop();
    }
    served?;
    Ok(())
}

/// Build and start the change watcher for `root`.
fn start_watcher(
    root: &std::path::Path,
    settings: &LiveReloadSettings,
    broadcaster: Arc<dyn RefreshBroadcaster>,
) -> Result<ChangeWatcher, ServerError> {
    let options = WatchOptions {
        enabled: true,
        root: root.to_path_buf(),
        extensions: settings.extensions.clone(),
        recompile_extensions: settings.recompile_extensions.clone(),
        server_refresh_timeout: settings.server_refresh_timeout,
    };
    let mut watcher = ChangeWatcher::new(options, broadcaster);

    // Globs match relative to the canonical root event paths start with
    let filter_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let filter = GlobInclusionFilter::new(filter_root, &settings.force_refresh, &settings.ignore)?;
    if !filter.is_empty() {
        watcher = watcher.with_inclusion_filter(Arc::new(filter));
    }

    watcher.start()?;
    Ok(watcher)
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from lr config.
#[must_use]
pub fn server_config_from_config(config: &lr_config::Config) -> ServerConfig {
    let live_reload = &config.live_reload;
    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        root: config.folder_resolved.clone(),
        live_reload: live_reload.enabled.then(|| LiveReloadSettings {
            extensions: live_reload.extensions.clone(),
            recompile_extensions: live_reload.recompile_extensions.clone(),
            server_refresh_timeout: live_reload.server_refresh_timeout(),
            websocket_path: live_reload.websocket_path.clone(),
            websocket_host: live_reload.websocket_host.clone(),
            script_path: live_reload.script_path.clone(),
            force_refresh: live_reload.force_refresh.clone(),
            ignore: live_reload.ignore.clone(),
            inject_exclude: live_reload.inject_exclude.clone(),
        }),
    }
}
