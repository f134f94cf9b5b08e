//! Persisted copy-on-write chunked B-tree.
//!
//! Implements the storage engine beneath a large key-value container: keys
//! live in sorted leaf runs, interior nodes route by separator key, and
//! flushed subtrees are held as lazy handle-backed nodes that resolve from a
//! content-addressed store on demand and can be evicted under memory
//! pressure. Every mutating operation returns a new tree value; unchanged
//! subtrees are shared structurally between versions.

#![warn(missing_docs)]

pub mod error;
pub mod store;
pub mod tree;

pub use error::{ChunkError, Result};
pub use store::{
    ContentHash, DirStore, FlushResult, HandleStore, InteriorPayload, LeafPayload, MemoryStore,
    NodeContent, RootState, Tracked, TrackedHandle, TreeState,
};
pub use tree::ChunkedBTree;
