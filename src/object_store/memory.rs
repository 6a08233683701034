use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{ObjectStore, ObjectStoreError};

/// In-process object store. Payloads are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
    capacity: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses writes once `capacity` bytes are held.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            objects: RwLock::default(),
            capacity: Some(capacity),
        }
    }

    pub async fn used_bytes(&self) -> u64 {
        self.objects
            .read()
            .await
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write().await;
        if let Some(capacity) = self.capacity {
            let used: u64 = objects
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            if used + data.len() as u64 > capacity {
                return Err(ObjectStoreError::Full(key.to_string()));
            }
        }
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.objects.read().await.contains_key(key))
    }
}
