//! Strips transient, non-persistable fields from a working board.

use crate::storage::models::Board;

/// Copy of `board` fit for storage: previews removed, and provenance cleared
/// on cards that no longer reference an asset.
pub fn sanitize(board: &Board) -> Board {
    let mut clean = board.clone();
    for card in &mut clean.cells {
        card.preview = None;
        if card.asset_id.is_none() && card.has_provenance() {
            card.clear_asset();
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{Card, Provenance};
    use bytes::Bytes;

    fn working_board() -> Board {
        let mut with_preview = Card::new("c1", "apple");
        with_preview.preview = Some(Bytes::from_static(b"\x89PNG preview"));
        with_preview.assign_asset(
            "asset-1",
            &Provenance {
                source: Some("Pixabay".to_string()),
                license: Some("Pixabay".to_string()),
                ..Default::default()
            },
        );

        let mut orphaned = Card::new("c2", "banana");
        orphaned.image_author = Some("someone".to_string());

        Board::new("Fruit", 2, vec![with_preview, orphaned, Card::new("c3", "pear")])
    }

    #[test]
    fn test_removes_previews() {
        let board = working_board();
        assert!(board.has_previews());

        let clean = sanitize(&board);
        assert!(!clean.has_previews());
        assert_eq!(clean.cells[0].asset_id.as_deref(), Some("asset-1"));
        assert_eq!(clean.cells[0].image_source.as_deref(), Some("Pixabay"));
    }

    #[test]
    fn test_leaves_working_copy_untouched() {
        let board = working_board();
        let _ = sanitize(&board);
        assert!(board.cells[0].preview.is_some());
    }

    #[test]
    fn test_clears_orphaned_provenance() {
        let clean = sanitize(&working_board());
        assert_eq!(clean.cells[1].image_author, None);
        assert!(!clean.cells[1].has_provenance());
    }

    #[test]
    fn test_is_idempotent() {
        let once = sanitize(&working_board());
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_preserves_order_and_geometry() {
        let board = working_board();
        let clean = sanitize(&board);
        let ids: Vec<&str> = clean.cells.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(clean.column_count, 2);
        assert_eq!(clean.id, board.id);
    }
}
