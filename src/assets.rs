//! Blob store for image payloads.
//!
//! Metadata (size, provenance, recency) lives in redb; payload bytes live in an
//! [`ObjectStore`] keyed by the asset id. The store is policy-free: it reports
//! [`BlobStoreError::StorageFull`] and leaves eviction to its caller.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::{Asset, AssetRecord, Provenance};
use crate::storage::{Admission, Database, DatabaseError};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Storage full: {requested} bytes requested, {used} bytes in use (quota {quota:?})")]
    StorageFull {
        requested: u64,
        used: u64,
        quota: Option<u64>,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
}

/// Descriptive fields supplied by a producer alongside a payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAsset {
    pub mime_type: Option<String>,
    pub provenance: Provenance,
}

impl NewAsset {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            provenance: Provenance::default(),
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// Handle to the asset store. Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct AssetStore {
    db: Database,
    objects: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    quota: Option<u64>,
}

impl AssetStore {
    pub fn new(db: Database, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            db,
            objects,
            clock: Arc::new(SystemClock),
            quota: None,
        }
    }

    /// Refuse writes that would push the stored total past `quota` bytes.
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Store a payload and return its freshly generated id.
    pub async fn put(&self, payload: Bytes, asset: NewAsset) -> Result<String, BlobStoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let byte_size = payload.len() as u64;
        let now = self.clock.now();

        // Phase 1: payload bytes
        match self.objects.put(&id, payload).await {
            Ok(()) => {}
            Err(ObjectStoreError::Full(_)) => {
                return Err(BlobStoreError::StorageFull {
                    requested: byte_size,
                    used: self.db.total_asset_bytes()?,
                    quota: self.quota,
                });
            }
            Err(e) => return Err(e.into()),
        }

        // Phase 2: metadata, admitted against the quota
        let record = AssetRecord {
            id: id.clone(),
            mime_type: asset
                .mime_type
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            byte_size,
            created_at: now,
            last_used_at: now,
            provenance: asset.provenance,
        };

        let admission = match self.db.insert_asset(&record, self.quota) {
            Ok(admission) => admission,
            Err(e) => {
                self.discard_payload(&id).await;
                return Err(e.into());
            }
        };

        if let Admission::Rejected { used } = admission {
            self.discard_payload(&id).await;
            return Err(BlobStoreError::StorageFull {
                requested: byte_size,
                used,
                quota: self.quota,
            });
        }

        tracing::debug!(asset_id = %id, byte_size, "Stored asset");
        Ok(id)
    }

    /// Look up an asset and its payload. Does not affect recency.
    pub async fn get(&self, id: &str) -> Result<Option<Asset>, BlobStoreError> {
        let Some(record) = self.db.get_asset(id)? else {
            return Ok(None);
        };

        match self.objects.get(id).await {
            Ok(payload) => Ok(Some(Asset { record, payload })),
            Err(ObjectStoreError::NotFound(_)) => {
                // Evicted or deleted between the two reads
                tracing::debug!(asset_id = %id, "Asset payload missing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata only
    pub async fn record(&self, id: &str) -> Result<Option<AssetRecord>, BlobStoreError> {
        Ok(self.db.get_asset(id)?)
    }

    /// Mark an asset as used now. Absent ids are ignored.
    pub async fn touch(&self, id: &str) -> Result<bool, BlobStoreError> {
        let touched = self.db.touch_asset(id, self.clock.now())?;
        if !touched {
            tracing::debug!(asset_id = %id, "Touch on absent asset ignored");
        }
        Ok(touched)
    }

    /// Remove an asset. Deleting an absent id is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool, BlobStoreError> {
        let deleted = self.db.delete_asset(id)?;
        self.objects.delete(id).await?;
        if deleted {
            tracing::debug!(asset_id = %id, "Deleted asset");
        }
        Ok(deleted)
    }

    /// Metadata for every stored asset, payloads omitted
    pub async fn list_all(&self) -> Result<Vec<AssetRecord>, BlobStoreError> {
        Ok(self.db.list_assets()?)
    }

    pub async fn total_bytes(&self) -> Result<u64, BlobStoreError> {
        Ok(self.db.total_asset_bytes()?)
    }

    async fn discard_payload(&self, id: &str) {
        if let Err(e) = self.objects.delete(id).await {
            tracing::warn!(asset_id = %id, error = %e, "Failed to discard orphaned payload");
        }
    }
}
