use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub assets_deleted: u64,
    pub boards_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    // Unload first so a pending autosave cannot recreate a board
    state.autosave.open(None)?;

    let records = state.assets.list_all().await?;
    for record in &records {
        state.assets.delete(&record.id).await?;
    }
    let stats = state.db.purge_all()?;
    let assets_deleted = records.len() as u64 + stats.assets;

    tracing::warn!(
        assets = assets_deleted,
        boards = stats.boards,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        assets_deleted,
        boards_deleted: stats.boards,
    }))
}
