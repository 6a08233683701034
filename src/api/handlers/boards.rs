use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::boards::{ensure_board, BoardStore};
use crate::sanitize::sanitize;
use crate::storage::models::{Board, BoardSummary};
use crate::transfer::{build_export, export_with_assets, import_board, parse_import, ImportOutcome};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoardRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub column_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub include_assets: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_boards(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<BoardSummary>>>, ApiError> {
    Ok(JSend::success(state.db.list().await?))
}

pub async fn create_board(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateBoardRequest>,
) -> Result<Json<JSend<Board>>, ApiError> {
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Untitled Board".to_string());

    let mut board = Board::empty(title);
    if let Some(column_count) = req.column_count {
        board.column_count = column_count;
    }
    board.validate()?;

    let board = state.db.put(board).await?;
    tracing::debug!(board_id = %board.id, "Created board");
    Ok(JSend::success(board))
}

pub async fn get_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Board>>, ApiError> {
    let board = state
        .db
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;

    Ok(JSend::success(board))
}

pub async fn replace_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(board): AppJson<Board>,
) -> Result<Json<JSend<Board>>, ApiError> {
    if board.id != id {
        return Err(ApiError::bad_request(format!(
            "board id '{}' does not match path id '{id}'",
            board.id
        )));
    }
    board.validate()?;

    let stored = state.db.put(sanitize(&board)).await?;
    Ok(JSend::success(stored))
}

/// Deletes through the autosave coordinator so a pending save cannot bring
/// the board back. Deleting the last board leaves a fresh empty one.
pub async fn delete_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    if !state.autosave.delete(&id).await? {
        return Err(ApiError::not_found("Board not found"));
    }

    if state.autosave.status().document_id.is_none() {
        let next = ensure_board(&state.db).await?;
        state.autosave.open(Some(next))?;
    }

    Ok(JSend::success(()))
}

pub async fn export_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<ExportParams>,
) -> Result<Response, ApiError> {
    let board = state
        .db
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;

    let bundle = if params.include_assets {
        export_with_assets(&board, &state.assets).await?
    } else {
        build_export(&board, chrono::Utc::now())
    };

    let mut response = Json(bundle).into_response();
    if let Ok(value) = format!("attachment; filename=\"{id}.json\"").parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Accepts an export bundle or a bare board as the raw request body.
pub async fn import(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<JSend<ImportOutcome>>, ApiError> {
    let payload = parse_import(&body)?;
    let outcome = import_board(
        &state.db,
        &state.assets,
        state.config.storage.budget_bytes,
        payload,
    )
    .await?;

    Ok(JSend::success(outcome))
}
