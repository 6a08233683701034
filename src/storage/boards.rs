use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{Board, BoardSummary};
use super::tables::*;

impl Database {
    // ========================================================================
    // Board operations
    // ========================================================================

    /// Store a board, replacing any previous version. Stamps `updated_at`
    /// and returns the board as written.
    pub fn put_board(&self, board: &Board) -> Result<Board, DatabaseError> {
        let stored = self.stamp(board);

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(BOARDS)?;
            let data = rmp_serde::to_vec_named(&stored)?;
            table.insert(stored.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    /// Store a board only if its id is free. The check and the write share one
    /// transaction. Returns `None` and writes nothing if the id is taken.
    pub fn insert_board_if_absent(&self, board: &Board) -> Result<Option<Board>, DatabaseError> {
        let stored = self.stamp(board);

        let write_txn = self.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(BOARDS)?;
            if table.get(stored.id.as_str())?.is_some() {
                false
            } else {
                let data = rmp_serde::to_vec_named(&stored)?;
                table.insert(stored.id.as_str(), data.as_slice())?;
                true
            }
        };
        if !inserted {
            write_txn.abort()?;
            return Ok(None);
        }
        write_txn.commit()?;
        Ok(Some(stored))
    }

    fn stamp(&self, board: &Board) -> Board {
        debug_assert!(!board.id.is_empty(), "board id must not be empty");
        debug_assert!(
            !board.has_previews(),
            "boards must be sanitized before they are stored"
        );

        let mut stored = board.clone();
        stored.updated_at = self.now();
        stored
    }

    /// Get a board by id
    pub fn get_board(&self, id: &str) -> Result<Option<Board>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOARDS)?;

        match table.get(id)? {
            Some(data) => {
                let board: Board = rmp_serde::from_slice(data.value())?;
                Ok(Some(board))
            }
            None => Ok(None),
        }
    }

    /// Delete a board. Returns false if it was already gone.
    pub fn delete_board(&self, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(BOARDS)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// All boards, oldest first
    pub fn get_all_boards(&self) -> Result<Vec<Board>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BOARDS)?;

        let mut boards = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let board: Board = rmp_serde::from_slice(value.value())?;
            boards.push(board);
        }

        boards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(boards)
    }

    /// Board summaries for pickers, oldest first
    pub fn list_boards(&self) -> Result<Vec<BoardSummary>, DatabaseError> {
        Ok(self.get_all_boards()?.iter().map(Board::summary).collect())
    }
}
