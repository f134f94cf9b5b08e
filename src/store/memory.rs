//! In-memory content-addressed store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::error::{ChunkError, Result};
use crate::store::{ContentHash, HandleStore, NodeContent};

const CONTENT_SEED: u64 = 0x5EED_CAFE;

/// Metrics tracking for handle store operations.
#[derive(Default)]
pub struct StoreMetrics {
    writes: AtomicU64,
    dedup_hits: AtomicU64,
    resolves: AtomicU64,
    misses: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

/// Snapshot of handle store metrics at a point in time.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreMetricsSnapshot {
    /// Number of distinct blobs written.
    pub writes: u64,
    /// Number of creates that matched an already-stored blob.
    pub dedup_hits: u64,
    /// Number of successful handle resolutions.
    pub resolves: u64,
    /// Number of resolutions for unknown handles.
    pub misses: u64,
    /// Total bytes written to the store.
    pub bytes_written: u64,
    /// Total bytes read back from the store.
    pub bytes_read: u64,
}

impl StoreMetrics {
    /// Creates a snapshot of the current metrics.
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            resolves: self.resolves.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    fn record_write(&self, len: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_read(&self, len: usize) {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Content-addressed blob store kept entirely in memory.
///
/// Payloads are JSON-encoded and addressed by their xxh64 digest, so
/// `create_handle` is idempotent per distinct content. Values are assumed to
/// embed no handles of their own; containers whose values do carry handles
/// wrap this store and override discovery.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<ContentHash, Bytes>>,
    metrics: StoreMetrics,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs currently held.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Returns a snapshot of current store metrics.
    pub fn metrics_snapshot(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// True if the store holds content for `handle`.
    pub fn contains(&self, handle: ContentHash) -> bool {
        self.blobs.lock().contains_key(&handle)
    }
}

impl<T> HandleStore<T> for MemoryStore
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
            let len = encoded.len();
            let mut blobs = self.blobs.lock();
            if blobs.insert(handle, Bytes::from(encoded)).is_none() {
                self.metrics.record_write(len);
                trace!(handle = %handle, len, "memstore.create");
            } else {
                self.metrics.dedup_hits.fetch_add(1, Ordering::Relaxed);
            }
            Ok(handle)
        }
    }

    fn resolve_handle(
        &self,
        handle: &ContentHash,
    ) -> impl Future<Output = Result<NodeContent<T, ContentHash>>> + Send {
        async move {
            let blob = match self.blobs.lock().get(handle) {
                Some(blob) => blob.clone(),
                None => {
                    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                    return Err(ChunkError::HandleNotFound);
                }
            };
            self.metrics.record_read(blob.len());
            serde_json::from_slice(&blob).map_err(|e| ChunkError::Serialization(e.to_string()))
        }
    }

    fn discover_handles(&self, _value: &T) -> Vec<ContentHash> {
        Vec::new()
    }
}
