use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use jamroom_core::{BlobMetadata, BlobStore, Id, StorageError};
use log::debug;
use serde::Serialize;
use tokio::fs;

/// Stores blobs as files in a directory, with a `.json` file of metadata next to each.
///
/// Files are written under a temporary name and renamed when complete, so a blob either
/// exists fully or not at all. Every write gets its own temporary name, so uploads of the
/// same key from different rooms never share a partial file.
pub struct FileBlobStore {
    root: PathBuf,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFile<'a> {
    content_type: &'a str,
    title: &'a str,
    artist: &'a str,
    external_id: &'a str,
    size: usize,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let is_plain = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\'])
            && !key.contains("..");

        if !is_plain {
            return Err(StorageError::PermissionDenied(format!(
                "{} is not a valid blob key",
                key
            )));
        }

        Ok(self.root.join(key))
    }

    /// Writes `contents` to `path` through a temporary file, removing it if anything fails.
    async fn write_complete(
        &self,
        key: &str,
        path: &Path,
        contents: &[u8],
    ) -> Result<(), StorageError> {
        let write_id = Id::<FileBlobStore>::new();
        let partial = self.root.join(format!(".{}.{}.part", key, write_id));

        let result = match fs::write(&partial, contents).await {
            Ok(()) => fs::rename(&partial, path).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("Could not remove {}: {}", partial.display(), cleanup);
            }

            return Err(storage_error(err));
        }

        Ok(())
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        fs::try_exists(path).await.map_err(storage_error)
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
        let path = self.path_for(key)?;
        let sidecar_key = format!("{}.json", key);
        let sidecar_path = self.path_for(&sidecar_key)?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(storage_error)?;

        let sidecar = MetadataFile {
            content_type: &metadata.content_type,
            title: &metadata.title,
            artist: &metadata.artist,
            external_id: &metadata.external_id,
            size: bytes.len(),
        };

        let sidecar =
            serde_json::to_vec_pretty(&sidecar).map_err(|e| StorageError::Io(e.to_string()))?;

        self.write_complete(key, &path, &bytes).await?;
        self.write_complete(&sidecar_key, &sidecar_path, &sidecar).await?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(self.public_url_for(key))
    }
}

fn storage_error(err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
        _ => StorageError::Io(err.to_string()),
    }
}
