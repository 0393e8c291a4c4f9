//! Embedded client script and the markup that loads it.

use axum::http::HeaderMap;
use axum::http::header;
use rust_embed::RustEmbed;

use crate::error::ServerError;

#[derive(RustEmbed)]
#[folder = "client"]
struct ClientAssets;

/// File name of the client script inside the embedded folder.
const SCRIPT_FILE: &str = "live-reload.js";

/// Placeholder in the script replaced by the websocket endpoint.
const ENDPOINT_PLACEHOLDER: &str = "{{websocket_url}}";

/// Comment marking a page that already loads the client script.
pub(crate) const INJECTION_MARKER: &str = "<!-- lr:live-reload -->";

/// Client script template, loaded once at startup.
#[derive(Debug)]
pub(crate) struct ClientScript {
    template: String,
}

impl ClientScript {
    /// Load the embedded script.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingClientScript`] if the script was not
    /// embedded or is not valid UTF-8.
    pub(crate) fn load() -> Result<Self, ServerError> {
        let file = ClientAssets::get(SCRIPT_FILE).ok_or(ServerError::MissingClientScript(SCRIPT_FILE))?;
        let template = String::from_utf8(file.data.into_owned())
            .map_err(|_| ServerError::MissingClientScript(SCRIPT_FILE))?;
        Ok(Self { template })
    }

    /// Script source connecting to `endpoint`.
    pub(crate) fn render(&self, endpoint: &str) -> String {
        self.template.replace(ENDPOINT_PLACEHOLDER, endpoint)
    }

    /// Markup spliced into HTML pages.
    ///
    /// With an empty `script_path` the script is inlined, otherwise the page
    /// references the script endpoint.
    pub(crate) fn block(&self, script_path: &str, endpoint: &str) -> String {
        if script_path.is_empty() {
            format!("\n{INJECTION_MARKER}\n<script>\n{}\n</script>\n", self.render(endpoint))
        } else {
            format!("\n{INJECTION_MARKER}\n<script src=\"{script_path}\"></script>\n")
        }
    }
}

/// Websocket URL clients should connect to for this request.
///
/// A configured host wins; otherwise the scheme follows
/// `x-forwarded-proto` and the host comes from the `Host` header.
pub(crate) fn websocket_endpoint(
    websocket_host: Option<&str>,
    websocket_path: &str,
    headers: &HeaderMap,
) -> String {
    if let Some(host) = websocket_host {
        return format!("{}{websocket_path}", host.trim_end_matches('/'));
    }

    let secure = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    let scheme = if secure { "wss" } else { "ws" };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    format!("{scheme}://{host}{websocket_path}")
}
