//! Render handles: scoped, revocable references to an asset's bytes.
//!
//! Acquiring a handle touches the asset's recency and copies a reference to
//! its payload into the handle, so the handle stays valid if the asset is
//! deleted or evicted afterwards. Each handle also registers a URI with the
//! broker that resolves until the handle is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use uuid::Uuid;

use crate::assets::{AssetStore, BlobStoreError};
use crate::storage::models::Card;

/// Scheme prefix of handle URIs
pub const HANDLE_URI_PREFIX: &str = "blob:aac/";

struct Checkout {
    asset_id: String,
    payload: Bytes,
}

#[derive(Clone, Default)]
struct Registry {
    live: Arc<Mutex<HashMap<Uuid, Checkout>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Checkout>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hands out [`RenderHandle`]s for stored assets.
#[derive(Clone)]
pub struct HandleBroker {
    store: AssetStore,
    registry: Registry,
}

impl HandleBroker {
    pub fn new(store: AssetStore) -> Self {
        Self {
            store,
            registry: Registry::default(),
        }
    }

    /// Acquire a handle for an asset. Returns `None` when the asset is absent.
    pub async fn acquire(&self, asset_id: &str) -> Result<Option<RenderHandle>, BlobStoreError> {
        let Some(asset) = self.store.get(asset_id).await? else {
            return Ok(None);
        };
        self.store.touch(asset_id).await?;

        let key = Uuid::new_v4();
        self.registry.lock().insert(
            key,
            Checkout {
                asset_id: asset_id.to_string(),
                payload: asset.payload.clone(),
            },
        );

        tracing::debug!(asset_id = %asset_id, handle = %key, "Acquired render handle");
        Ok(Some(RenderHandle {
            key,
            asset_id: asset_id.to_string(),
            mime_type: asset.record.mime_type,
            payload: asset.payload,
            registry: self.registry.clone(),
            released: AtomicBool::new(false),
        }))
    }

    /// Release a handle. Releasing twice is a no-op.
    pub fn release(&self, handle: &RenderHandle) -> bool {
        handle.release()
    }

    /// Bytes behind a live handle URI
    pub fn resolve(&self, uri: &str) -> Option<Bytes> {
        let key = uri
            .strip_prefix(HANDLE_URI_PREFIX)
            .and_then(|k| Uuid::parse_str(k).ok())?;
        self.registry.lock().get(&key).map(|c| c.payload.clone())
    }

    /// Number of handles acquired and not yet released
    pub fn live_handles(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of live handles for one asset
    pub fn checkouts(&self, asset_id: &str) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|c| c.asset_id == asset_id)
            .count()
    }

    /// Resolve a card for display. Missing assets and lookup failures fall
    /// back to a label-only view.
    pub async fn resolve_card(&self, card: &Card) -> CardView {
        let image = match card.asset_id.as_deref() {
            Some(asset_id) => match self.acquire(asset_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(card_id = %card.id, asset_id = %asset_id, error = %e, "Failed to resolve card image");
                    None
                }
            },
            None => None,
        };

        CardView {
            card_id: card.id.clone(),
            label: card.label.clone(),
            speech: card.speech().to_string(),
            preview: card.preview.clone(),
            image,
        }
    }
}

/// A revocable reference to an asset's bytes. Released on drop.
pub struct RenderHandle {
    key: Uuid,
    asset_id: String,
    mime_type: String,
    payload: Bytes,
    registry: Registry,
    released: AtomicBool,
}

impl RenderHandle {
    pub fn uri(&self) -> String {
        format!("{HANDLE_URI_PREFIX}{}", self.key)
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The bytes captured at acquisition. Still readable after release.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Revoke the handle's URI. Returns true only for the call that revoked it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry.lock().remove(&self.key);
        tracing::debug!(asset_id = %self.asset_id, handle = %self.key, "Released render handle");
        true
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("uri", &self.uri())
            .field("asset_id", &self.asset_id)
            .field("mime_type", &self.mime_type)
            .field("byte_size", &self.payload.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// What a render surface needs to draw a card
#[derive(Debug)]
pub struct CardView {
    pub card_id: String,
    pub label: String,
    pub speech: String,
    /// Transient preview from the working copy, shown before the stored image
    pub preview: Option<Bytes>,
    pub image: Option<RenderHandle>,
}

impl CardView {
    pub fn is_label_only(&self) -> bool {
        self.image.is_none() && self.preview.is_none()
    }
}
