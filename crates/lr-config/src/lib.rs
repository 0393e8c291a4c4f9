//! Configuration management for lr.
//!
//! Parses `lr.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `live_reload.folder`
//! - `live_reload.websocket_host`

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use lr_protocol::{
    DEFAULT_EXTENSIONS, DEFAULT_RECOMPILE_EXTENSIONS, DEFAULT_SCRIPT_PATH, DEFAULT_WEBSOCKET_PATH,
    SENTINEL_EXTENSION,
};
use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override the folder to monitor.
    pub folder: Option<PathBuf>,
    /// Override live reload enabled flag.
    pub live_reload_enabled: Option<bool>,
    /// Override the server recompile delay in milliseconds.
    pub server_refresh_timeout_ms: Option<u64>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "lr.toml";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,

    /// Absolute folder to monitor and serve (set after loading).
    #[serde(skip)]
    pub folder_resolved: PathBuf,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    #[allow(clippy::derivable_impls)]
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5000,
        }
    }
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether live reload is enabled.
    pub enabled: bool,
    /// Folder to monitor, relative to the config file.
    folder: Option<String>,
    /// Comma separated extensions that trigger a refresh.
    ///
    /// Must contain the `.live` sentinel used to signal server restarts.
    pub extensions: String,
    /// Extensions of templates the origin server compiles on demand.
    pub recompile_extensions: Vec<String>,
    /// Delay before telling browsers to reload after a template change
    /// (0 disables the delay).
    pub server_refresh_timeout_ms: u64,
    /// Path of the websocket endpoint.
    pub websocket_path: String,
    /// Explicit websocket host (e.g. `ws://localhost:5000`).
    pub websocket_host: Option<String>,
    /// Path the client script is served from; empty inlines the script.
    pub script_path: String,
    /// Globs (relative to the folder) that always refresh.
    pub force_refresh: Vec<String>,
    /// Globs (relative to the folder) that never refresh.
    pub ignore: Vec<String>,
    /// Request path globs that never get the client script injected.
    pub inject_exclude: Vec<String>,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            folder: None,
            extensions: DEFAULT_EXTENSIONS.to_owned(),
            recompile_extensions: DEFAULT_RECOMPILE_EXTENSIONS.map(str::to_owned).to_vec(),
            server_refresh_timeout_ms: 0,
            websocket_path: DEFAULT_WEBSOCKET_PATH.to_owned(),
            websocket_host: None,
            script_path: DEFAULT_SCRIPT_PATH.to_owned(),
            force_refresh: Vec::new(),
            ignore: Vec::new(),
            inject_exclude: Vec::new(),
        }
    }
}

impl LiveReloadConfig {
    /// Server recompile delay as a [`Duration`].
    #[must_use]
    pub fn server_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.server_refresh_timeout_ms)
    }

    /// Whether the client script is inlined into pages instead of linked.
    #[must_use]
    pub fn inline_script(&self) -> bool {
        self.script_path.is_empty()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`LR_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a URL path field to start with `/`.
fn require_absolute_path(value: &str, field: &str) -> Result<(), ConfigError> {
    if !value.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{field} must start with /"
        )));
    }
    Ok(())
}

/// Require a URL field to use ws:// or wss:// scheme.
fn require_ws_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("ws://") && !url.starts_with("wss://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with ws:// or wss://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `lr.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails
    /// or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(folder) = &settings.folder {
            self.folder_resolved.clone_from(folder);
        }
        if let Some(enabled) = settings.live_reload_enabled {
            self.live_reload.enabled = enabled;
        }
        if let Some(timeout) = settings.server_refresh_timeout_ms {
            self.live_reload.server_refresh_timeout_ms = timeout;
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    #[must_use]
    pub fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            live_reload: LiveReloadConfig::default(),
            folder_resolved: base.to_path_buf(),
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically after loading from file and after CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_live_reload()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 is technically valid (OS assigns a random port), but the
        // injected client script needs a stable address to reconnect to
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate live reload configuration.
    fn validate_live_reload(&self) -> Result<(), ConfigError> {
        let live_reload = &self.live_reload;

        let has_sentinel = live_reload
            .extensions
            .split(',')
            .map(str::trim)
            .any(|ext| ext.eq_ignore_ascii_case(SENTINEL_EXTENSION));
        if !has_sentinel {
            return Err(ConfigError::Validation(format!(
                "live_reload.extensions must include {SENTINEL_EXTENSION} (used to signal server restarts)"
            )));
        }

        require_absolute_path(&live_reload.websocket_path, "live_reload.websocket_path")?;
        if !live_reload.script_path.is_empty() {
            require_absolute_path(&live_reload.script_path, "live_reload.script_path")?;
        }
        if let Some(ref host) = live_reload.websocket_host {
            require_non_empty(host, "live_reload.websocket_host")?;
            require_ws_url(host, "live_reload.websocket_host")?;
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;

        if let Some(ref folder) = self.live_reload.folder {
            self.live_reload.folder = Some(expand::expand_env(folder, "live_reload.folder")?);
        }
        if let Some(ref host) = self.live_reload.websocket_host {
            self.live_reload.websocket_host =
                Some(expand::expand_env(host, "live_reload.websocket_host")?);
        }

        Ok(())
    }

    /// Resolve the monitored folder against the config file directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.folder_resolved = config_dir.join(self.live_reload.folder.as_deref().unwrap_or("."));
    }
}
