use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::autosave::SaveStatus;
use crate::boards::BoardStore;
use crate::storage::models::Board;
use crate::AppState;

pub async fn session_status(State(state): State<Arc<AppState>>) -> Json<JSend<SaveStatus>> {
    JSend::success(state.autosave.status())
}

/// Make a stored board the working copy. Unsaved edits to the previous board
/// are dropped.
pub async fn open_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Board>>, ApiError> {
    let board = state
        .db
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;

    state.autosave.open(Some(board.clone()))?;
    Ok(JSend::success(board))
}

/// Replace the working copy; the save happens after the debounce.
pub async fn edit_board(
    State(state): State<Arc<AppState>>,
    AppJson(board): AppJson<Board>,
) -> Result<Json<JSend<SaveStatus>>, ApiError> {
    board.validate()?;

    state.autosave.edit(board)?;
    Ok(JSend::success(state.autosave.status()))
}

pub async fn flush(State(state): State<Arc<AppState>>) -> Result<Json<JSend<SaveStatus>>, ApiError> {
    state.autosave.flush().await?;
    Ok(JSend::success(state.autosave.status()))
}
