use async_trait::async_trait;
use dashmap::DashMap;
use jamroom_core::{BlobMetadata, BlobStore, StorageError};
use log::debug;

/// A blob stored in memory.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}

/// Keeps blobs in memory. Everything is lost when the process exits.
pub struct MemoryBlobStore {
    base_url: String,
    blobs: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: Default::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredBlob> {
        self.blobs.get(key).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.contains_key(key))
    }

    fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<String, StorageError> {
        debug!("Storing {} bytes as {}", bytes.len(), key);

        self.blobs
            .insert(key.to_string(), StoredBlob { bytes, metadata });

        Ok(self.public_url_for(key))
    }
}
