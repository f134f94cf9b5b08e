//! Directory-backed content-addressed store.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::error::{ChunkError, Result};
use crate::store::{ContentHash, HandleStore, NodeContent};

const CONTENT_SEED: u64 = 0x5EED_CAFE;

/// Content-addressed store writing one blob file per handle.
///
/// Blobs are JSON-encoded payloads named by the hex form of their content
/// hash, so a directory can be reopened later and resolves the same handles.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn blob_path(&self, handle: ContentHash) -> PathBuf {
        self.root
            .join(format!("{}.node", hex::encode(handle.0.to_be_bytes())))
    }
}

impl<T> HandleStore<T> for DirStore
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type NodeHandle = ContentHash;
    type ValueHandle = ContentHash;

    fn create_handle(
        &self,
        content: NodeContent<T, ContentHash>,
    ) -> impl Future<Output = Result<ContentHash>> + Send {
        async move {
            let encoded = serde_json::to_vec(&content)
                .map_err(|e| ChunkError::Serialization(e.to_string()))?;
            let handle = ContentHash(xxh64(&encoded, CONTENT_SEED));
            let path = self.blob_path(handle);
            if !fs::try_exists(&path).await? {
                fs::write(&path, &encoded).await?;
                trace!(handle = %handle, len = encoded.len(), "dirstore.create");
            }
            Ok(handle)
        }
    }

    fn resolve_handle(
        &self,
        handle: &ContentHash,
    ) -> impl Future<Output = Result<NodeContent<T, ContentHash>>> + Send {
        let path = self.blob_path(*handle);
        async move {
            let blob = match fs::read(&path).await {
                Ok(blob) => blob,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ChunkError::HandleNotFound)
                }
                Err(e) => return Err(ChunkError::Io(e)),
            };
            serde_json::from_slice(&blob).map_err(|e| ChunkError::Serialization(e.to_string()))
        }
    }

    fn discover_handles(&self, _value: &T) -> Vec<ContentHash> {
        Vec::new()
    }
}
