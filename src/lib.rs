//! aac-store - Offline asset cache and board persistence for AAC board editors
//!
//! This crate provides the storage engine behind a board editor:
//! - Blob store for image payloads with provenance and recency metadata
//! - Least-recently-used eviction under a byte budget
//! - Revocable render handles that own their bytes
//! - redb-backed board documents with a debounced autosave coordinator
//! - Board export/import with embedded images
//! - Local REST API for the editor front-end

pub mod api;
pub mod assets;
pub mod autosave;
pub mod boards;
pub mod clock;
pub mod config;
pub mod data_url;
pub mod eviction;
pub mod handles;
pub mod object_store;
pub mod sanitize;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod transfer;

use assets::AssetStore;
use autosave::AutosaveCoordinator;
use config::Config;
use handles::HandleBroker;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub assets: AssetStore,
    pub handles: HandleBroker,
    pub autosave: AutosaveCoordinator,
}
