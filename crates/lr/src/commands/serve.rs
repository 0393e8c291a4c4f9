//! `lr serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use lr_config::{CliSettings, Config};
use lr_server::{run_server, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover lr.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder to serve and watch (overrides config).
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Milliseconds to wait for the origin server to recompile templates
    /// before reloading (overrides config).
    #[arg(long, value_name = "MS")]
    server_refresh_timeout: Option<u64>,

    /// Enable verbose output (log every change and refresh).
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable live reload (default: enabled).
    #[arg(long)]
    live_reload: Option<bool>,

    /// Disable live reload.
    #[arg(long, conflicts_with = "live_reload")]
    no_live_reload: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let live_reload_enabled = self.resolve_live_reload_enabled();
        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            folder: self.folder,
            live_reload_enabled,
            server_refresh_timeout_ms: self.server_refresh_timeout,
        };

        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        output.field(
            "Serving",
            &format_args!("http://{}:{}", config.server.host, config.server.port),
        );
        output.field("Folder", &config.folder_resolved.display());
        if let Some(path) = &config.config_path {
            output.field("Config", &path.display());
        }

        let live_reload = &config.live_reload;
        if live_reload.enabled {
            output.field("Extensions", &live_reload.extensions);
            output.field("WebSocket", &live_reload.websocket_path);
            if live_reload.inline_script() {
                output.field("Client script", &"inline");
            } else {
                output.field("Client script", &live_reload.script_path);
            }
            if live_reload.server_refresh_timeout_ms > 0 {
                output.field(
                    "Recompile delay",
                    &format_args!("{} ms", live_reload.server_refresh_timeout_ms),
                );
            }
            output.success("Live reload: enabled");
        } else {
            output.warning("Live reload: disabled");
        }

        run_server(server_config_from_config(&config)).await?;

        Ok(())
    }

    /// Resolve `live_reload_enabled` from --live-reload/--no-live-reload flags.
    fn resolve_live_reload_enabled(&self) -> Option<bool> {
        self.no_live_reload.then_some(false).or(self.live_reload)
    }
}
