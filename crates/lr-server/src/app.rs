//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::live_reload;
use crate::middleware::headers;
use crate::state::AppState;
use crate::static_files;

/// Create the application router.
///
/// Live reload routes exist only when live reload is enabled; everything
/// else falls through to the static files.
pub(crate) fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    if let Some(ref live_reload) = state.live_reload {
        router = router.route(&live_reload.websocket_path, get(live_reload::ws_handler));
        if !live_reload.script_path.is_empty() {
            router = router.route(&live_reload.script_path, get(live_reload::script_handler));
        }
    }

    router
        .fallback(static_files::serve_file)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(headers::no_cache_layer())
                .layer(headers::content_type_options_layer()),
        )
        .with_state(state)
}
