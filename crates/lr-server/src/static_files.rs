//! Static file serving from the watched folder.
//!
//! HTML responses get the live reload client spliced in when enabled.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;

use crate::live_reload::inject_script;
use crate::state::AppState;

/// Map a request path to a file under `root`.
///
/// Returns `None` for paths trying to leave the root.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Serve a file from the root folder, `index.html` for directories.
pub(crate) async fn serve_file(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let Ok(request_path) = percent_decode_str(req.uri().path()).decode_utf8() else {
        tracing::debug!(path = req.uri().path(), "Rejected path that is not UTF-8");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let request_path: &str = &request_path;
    let Some(mut path) = resolve(&state.root, request_path) else {
        tracing::debug!(path = request_path, "Rejected path outside root");
        return StatusCode::BAD_REQUEST.into_response();
    };
    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push("index.html");
    }

    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let is_html = mime.type_() == mime_guess::mime::TEXT && mime.subtype() == mime_guess::mime::HTML;

    // Legacy-encoded pages keep the bare type
    let content_type = if is_html && std::str::from_utf8(&content).is_ok() {
        "text/html; charset=utf-8".to_owned()
    } else {
        mime.to_string()
    };

    let body = match state.live_reload {
        Some(ref live_reload) if is_html && live_reload.should_inject(request_path) => {
            let block = live_reload
                .script
                .block(&live_reload.script_path, &live_reload.endpoint(req.headers()));
            Body::from(inject_script(&content, &block))
        }
        _ => Body::from(content),
    };

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}
