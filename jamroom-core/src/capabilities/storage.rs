use async_trait::async_trait;

use crate::StorageError;

/// Describes an uploaded blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobMetadata {
    pub content_type: String,
    pub title: String,
    pub artist: String,
    pub external_id: String,
}

/// Stores finished media and hands out public references to it.
#[async_trait]
pub trait BlobStore
where
    Self: Send + Sync + 'static,
{
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    fn public_url_for(&self, key: &str) -> String;

    /// Uploads the bytes and returns the public url of the new blob.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<String, StorageError>;
}
