//! Board document store.
//!
//! Boards are independent of the asset store: a card's `asset_id` is never
//! checked against stored assets when a board is written.

use async_trait::async_trait;

use crate::storage::models::{Board, BoardSummary};
use crate::storage::{Database, DatabaseError};

/// Durable table of boards. `put` is a full replace and is atomic per board.
#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Board>, DatabaseError>;
    /// Upsert a sanitized board. Returns the board as stored, with `updated_at` refreshed.
    async fn put(&self, board: Board) -> Result<Board, DatabaseError>;
    /// Store a sanitized board only if no board has its id. Returns `None` if the id is taken.
    async fn insert_if_absent(&self, board: Board) -> Result<Option<Board>, DatabaseError>;
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
    async fn list(&self) -> Result<Vec<BoardSummary>, DatabaseError>;
}

#[async_trait]
impl BoardStore for Database {
    async fn get(&self, id: &str) -> Result<Option<Board>, DatabaseError> {
        self.get_board(id)
    }

    async fn put(&self, board: Board) -> Result<Board, DatabaseError> {
        let stored = self.put_board(&board)?;
        tracing::debug!(board_id = %stored.id, cells = stored.cells.len(), "Stored board");
        Ok(stored)
    }

    async fn insert_if_absent(&self, board: Board) -> Result<Option<Board>, DatabaseError> {
        let stored = self.insert_board_if_absent(&board)?;
        if let Some(stored) = &stored {
            tracing::debug!(board_id = %stored.id, cells = stored.cells.len(), "Inserted board");
        }
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let deleted = self.delete_board(id)?;
        if deleted {
            tracing::debug!(board_id = %id, "Deleted board");
        }
        Ok(deleted)
    }

    async fn list(&self) -> Result<Vec<BoardSummary>, DatabaseError> {
        self.list_boards()
    }
}

/// Write the example board if the store holds no boards. Returns true if it did.
pub async fn seed_if_empty(store: &dyn BoardStore) -> Result<bool, DatabaseError> {
    if !store.list().await?.is_empty() {
        return Ok(false);
    }
    let board = store.put(Board::core_example()).await?;
    tracing::info!(board_id = %board.id, "Seeded example board");
    Ok(true)
}

/// The first stored board, or a freshly stored empty one when there are none.
pub async fn ensure_board(store: &dyn BoardStore) -> Result<Board, DatabaseError> {
    for summary in store.list().await? {
        if let Some(board) = store.get(&summary.id).await? {
            return Ok(board);
        }
    }
    let board = store.put(Board::empty("Untitled Board")).await?;
    tracing::info!(board_id = %board.id, "Created empty board");
    Ok(board)
}
