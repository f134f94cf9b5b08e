//! Handle contract and persisted state types.
//!
//! The tree never talks to durable storage directly. It hands node payloads
//! to a [`HandleStore`] and gets back opaque handles; later it resolves those
//! handles back to payloads. The store is also the authority on which handles
//! an application value embeds, which feeds the reachability ledger the
//! owning container uses for garbage collection.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::{MemoryStore, StoreMetrics, StoreMetricsSnapshot};

/// Sorted key/value run persisted for a leaf node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafPayload<T> {
    /// Keys in strictly increasing order.
    pub keys: Vec<String>,
    /// Values parallel to `keys`.
    pub values: Vec<T>,
}

/// Separator keys plus child handles persisted for an interior node.
///
/// Holds exactly one more child than separators; child `i` covers keys below
/// `keys[i]` (the last child is unbounded above).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteriorPayload<H> {
    /// Separator keys in strictly increasing order.
    pub keys: Vec<String>,
    /// Handles of the child nodes, one more than `keys`.
    pub children: Vec<H>,
}

/// Content record stored behind a node handle.
///
/// The wire shape is discriminated by field presence: a leaf record carries
/// `values`, an interior record carries `children`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeContent<T, H> {
    /// Terminal run of key/value pairs.
    Leaf(LeafPayload<T>),
    /// Routing node referencing children by handle.
    Interior(InteriorPayload<H>),
}

/// A handle participating in the reachability set.
///
/// Node handles address persisted node content; value handles are embedded
/// inside application values and discovered via
/// [`HandleStore::discover_handles`]. Both kinds share one ledger but stay
/// distinguishable so the container can attribute deletions.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackedHandle<N, V> {
    /// Handle addressing persisted node content.
    Node(N),
    /// Handle embedded in an application value.
    Value(V),
}

/// Tracked-handle type produced by a given store.
pub type Tracked<T, S> =
    TrackedHandle<<S as HandleStore<T>>::NodeHandle, <S as HandleStore<T>>::ValueHandle>;

/// Persisted root reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootState<T, H> {
    /// Chunked tree: the root was uploaded and is addressed by handle.
    Handle(H),
    /// Small-tree optimization: the whole tree inline as one leaf payload.
    Inline(LeafPayload<T>),
}

/// The state used to save and load a chunked B-tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeState<T, N, V> {
    /// Branching threshold, fixed for the tree's lifetime.
    pub order: usize,
    /// Element count.
    pub size: usize,
    /// Root reference, chunked or inline.
    pub root: RootState<T, N>,
    /// All handles reachable from `root`.
    pub handles: Vec<TrackedHandle<N, V>>,
}

/// Delta produced by a flush.
///
/// The container persists `new_root` and feeds the handle deltas into its
/// garbage-collection ledger. Applying this record to the pre-flush tree via
/// [`crate::ChunkedBTree::update`] yields a tree equivalent to reloading from
/// the new state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushResult<N, V> {
    /// Element count after the batch was applied.
    pub new_size: usize,
    /// Handle of the uploaded root.
    pub new_root: N,
    /// Handles created by the flush: uploaded nodes plus value handles
    /// discovered inside written values.
    pub new_handles: Vec<TrackedHandle<N, V>>,
    /// Handles no longer reachable after the flush.
    pub deleted_handles: Vec<TrackedHandle<N, V>>,
}

/// Durable content-addressed storage for node payloads, supplied by the
/// surrounding container.
///
/// `create_handle` must be stable per distinct content within one flush, and
/// `resolve_handle` must return the content a handle was created from.
/// Handle comparison uses the `Ord` bound on the handle types; any consistent
/// total order suffices for the reachability set.
pub trait HandleStore<T>: Send + Sync {
    /// Opaque durable reference to node content.
    type NodeHandle: Clone
        + fmt::Debug
        + Eq
        + Ord
        + Hash
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;
    /// Handle embedded inside an application value.
    type ValueHandle: Clone
        + fmt::Debug
        + Eq
        + Ord
        + Hash
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;

    /// Persists a content record and returns its handle.
    fn create_handle(
        &self,
        content: NodeContent<T, Self::NodeHandle>,
    ) -> impl Future<Output = Result<Self::NodeHandle>> + Send;

    /// Resolves a handle back to the content record it was created from.
    fn resolve_handle(
        &self,
        handle: &Self::NodeHandle,
    ) -> impl Future<Output = Result<NodeContent<T, Self::NodeHandle>>> + Send;

    /// Enumerates the handles embedded in an application value.
    fn discover_handles(&self, value: &T) -> Vec<Self::ValueHandle>;
}

/// 64-bit content address used by the bundled stores.
///
/// Computed as the xxh64 digest of the encoded payload, so identical content
/// always maps to the same handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(
    /// Raw digest value.
    pub u64,
);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
