use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;
    // Imports may embed several images as base64
    let import_limit = upload_limit.saturating_mul(4);

    let mut router = Router::new()
        // Assets
        .route("/assets", get(handlers::list_assets))
        .route(
            "/assets",
            post(handlers::upload_asset).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/assets/stats", get(handlers::asset_stats))
        .route("/assets/evict", post(handlers::evict_assets))
        .route("/assets/:id", get(handlers::get_asset))
        .route("/assets/:id", delete(handlers::delete_asset))
        .route("/assets/:id/content", get(handlers::serve_asset_content))
        // Boards
        .route("/boards", get(handlers::list_boards))
        .route("/boards", post(handlers::create_board))
        .route(
            "/boards/import",
            post(handlers::import).layer(DefaultBodyLimit::max(import_limit)),
        )
        .route("/boards/:id", get(handlers::get_board))
        .route("/boards/:id", put(handlers::replace_board))
        .route("/boards/:id", delete(handlers::delete_board))
        .route("/boards/:id/export", get(handlers::export_board))
        // Editing session
        .route("/session", get(handlers::session_status))
        .route("/session/open/:id", post(handlers::open_board))
        .route("/session/board", put(handlers::edit_board))
        .route("/session/flush", post(handlers::flush))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
