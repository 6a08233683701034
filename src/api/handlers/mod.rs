mod admin;
mod assets;
mod boards;
mod session;

pub use admin::{admin_purge, health};
pub use assets::{
    asset_stats, delete_asset, evict_assets, get_asset, list_assets, serve_asset_content,
    upload_asset,
};
pub use boards::{
    create_board, delete_board, export_board, get_board, import, list_boards, replace_board,
};
pub use session::{edit_board, flush, open_board, session_status};
