//! Shared test helpers for aac-store unit tests.

use std::sync::Arc;

use crate::assets::AssetStore;
use crate::autosave::{AutosaveConfig, AutosaveCoordinator};
use crate::config::{AssetBackend, AutosaveSettings, Config, ServerConfig, StorageConfig};
use crate::handles::HandleBroker;
use crate::object_store::MemoryStore;
use crate::storage::Database;
use crate::AppState;

/// Create a test AppState with a temporary database and an in-memory asset store.
/// Must be called from within a tokio runtime.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");

    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            backend: AssetBackend::Memory,
            asset_storage_path: temp_dir.path().join("assets").to_string_lossy().to_string(),
            quota_bytes: None,
            budget_bytes: 1024 * 1024,
            eviction_interval_seconds: 0,
        },
        autosave: AutosaveSettings::default(),
        seed_example_board: false,
        test_mode: true,
        max_upload_size: 1024 * 1024, // 1MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let assets = AssetStore::new(db.clone(), Arc::new(MemoryStore::new()));
    let handles = HandleBroker::new(assets.clone());
    let autosave = AutosaveCoordinator::spawn(Arc::new(db.clone()), AutosaveConfig::default());

    Arc::new(AppState {
        config,
        db,
        assets,
        handles,
        autosave,
    })
}
