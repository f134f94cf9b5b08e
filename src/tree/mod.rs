//! The chunked B-tree aggregate.
//!
//! A [`ChunkedBTree`] owns a root node, the tree order, the element count,
//! and the set of handles reachable from the root. It has immutable value
//! semantics: `set` and `delete` return a new tree and leave the receiver
//! usable, with unchanged subtrees shared between the two versions. Any
//! operation that touches a not-yet-resolved subtree suspends on store I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ChunkError, Result};
use crate::store::{FlushResult, HandleStore, LeafPayload, RootState, Tracked, TreeState};

mod node;

use node::{InteriorNode, LazyNode, LeafNode, Node, SetResult};

/// Persisted copy-on-write B-tree over content-addressed storage.
pub struct ChunkedBTree<T, S: HandleStore<T>> {
    order: usize,
    size: usize,
    root: Arc<Node<T, S>>,
    handles: Arc<BTreeSet<Tracked<T, S>>>,
    store: Arc<S>,
}

impl<T, S: HandleStore<T>> Clone for ChunkedBTree<T, S> {
    fn clone(&self) -> Self {
        Self {
            order: self.order,
            size: self.size,
            root: Arc::clone(&self.root),
            handles: Arc::clone(&self.handles),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T, S: HandleStore<T>> std::fmt::Debug for ChunkedBTree<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedBTree")
            .field("order", &self.order)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl<T, S> ChunkedBTree<T, S>
where
    T: Clone + Send + Sync,
    S: HandleStore<T>,
{
    /// Creates an empty tree of the given order.
    pub fn create(order: usize, store: Arc<S>) -> Result<Self> {
        if order < 2 {
            return Err(ChunkError::InvalidArgument("tree order must be at least 2"));
        }
        Ok(Self {
            order,
            size: 0,
            root: Arc::new(Node::Leaf(LeafNode::empty())),
            handles: Arc::new(BTreeSet::new()),
            store,
        })
    }

    /// Loads a tree from persisted state.
    ///
    /// A handle root is wrapped lazily without I/O. An inline leaf payload
    /// (small-tree optimization) is replayed through `set`, re-chunking it
    /// under the configured order; the persisted `size` must match the
    /// replayed entry count.
    pub async fn load(
        state: TreeState<T, S::NodeHandle, S::ValueHandle>,
        store: Arc<S>,
    ) -> Result<Self> {
        match state.root {
            RootState::Handle(handle) => {
                Self::from_root_handle(state.order, state.size, handle, state.handles, store)
            }
            RootState::Inline(payload) => {
                if payload.keys.len() != payload.values.len() {
                    return Err(ChunkError::Corruption("leaf keys/values length mismatch"));
                }
                let mut tree = Self::create(state.order, store)?;
                let mut added = Vec::new();
                let mut deleted = Vec::new();
                for (key, value) in payload.keys.into_iter().zip(payload.values) {
                    tree = tree.set(key, value, &mut added, &mut deleted).await?;
                }
                if tree.size != state.size {
                    return Err(ChunkError::Corruption("inline tree size mismatch"));
                }
                Ok(tree)
            }
        }
    }

    /// Synchronous load. Defined only for a handle root, which wraps lazily
    /// without touching the store; inline payloads need the asynchronous
    /// replay in [`ChunkedBTree::load`].
    pub fn load_sync(
        state: TreeState<T, S::NodeHandle, S::ValueHandle>,
        store: Arc<S>,
    ) -> Result<Self> {
        match state.root {
            RootState::Handle(handle) => {
                Self::from_root_handle(state.order, state.size, handle, state.handles, store)
            }
            RootState::Inline(_) => Err(ChunkError::Unsupported(
                "synchronous load of an inline tree",
            )),
        }
    }

    fn from_root_handle(
        order: usize,
        size: usize,
        root: S::NodeHandle,
        handles: Vec<Tracked<T, S>>,
        store: Arc<S>,
    ) -> Result<Self> {
        if order < 2 {
            return Err(ChunkError::InvalidArgument("tree order must be at least 2"));
        }
        Ok(Self {
            order,
            size,
            root: Arc::new(Node::Lazy(LazyNode::new(root))),
            handles: Arc::new(handles.into_iter().collect()),
            store,
        })
    }

    /// Branching threshold of this tree.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.size
    }

    /// True if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Looks up the value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let mut current = Arc::clone(&self.root);
        loop {
            let next = match &*current {
                Node::Leaf(leaf) => return Ok(leaf.get(key).cloned()),
                Node::Interior(node) => Arc::clone(&node.children[node.route_index(key)]),
                Node::Lazy(lazy) => lazy.resolve(self.store.as_ref()).await?,
            };
            current = next;
        }
    }

    /// True if `key` is present.
    pub async fn has(&self, key: &str) -> Result<bool> {
        let mut current = Arc::clone(&self.root);
        loop {
            let next = match &*current {
                Node::Leaf(leaf) => return Ok(leaf.has(key)),
                Node::Interior(node) => Arc::clone(&node.children[node.route_index(key)]),
                Node::Lazy(lazy) => lazy.resolve(self.store.as_ref()).await?,
            };
            current = next;
        }
    }

    /// First entry in key order, or `None` for an empty tree.
    pub async fn min(&self) -> Result<Option<(String, T)>> {
        let mut current = Arc::clone(&self.root);
        loop {
            let next = match &*current {
                Node::Leaf(leaf) => return Ok(leaf.first()),
                Node::Interior(node) => Arc::clone(&node.children[0]),
                Node::Lazy(lazy) => lazy.resolve(self.store.as_ref()).await?,
            };
            current = next;
        }
    }

    /// Last entry in key order, or `None` for an empty tree.
    pub async fn max(&self) -> Result<Option<(String, T)>> {
        let mut current = Arc::clone(&self.root);
        loop {
            let next = match &*current {
                Node::Leaf(leaf) => return Ok(leaf.last()),
                Node::Interior(node) => Arc::clone(&node.children[node.children.len() - 1]),
                Node::Lazy(lazy) => lazy.resolve(self.store.as_ref()).await?,
            };
            current = next;
        }
    }

    /// Inserts or updates `key`, returning the new tree version.
    ///
    /// Handles discovered inside `value` are appended to `added`; handles of
    /// persisted nodes invalidated by the write path, and value handles of
    /// any value replaced later in a flush cycle, accumulate in `deleted`.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: T,
        added: &mut Vec<Tracked<T, S>>,
        deleted: &mut Vec<Tracked<T, S>>,
    ) -> Result<Self> {
        let outcome = self
            .root
            .set(
                self.store.as_ref(),
                self.order,
                key.into(),
                value,
                added,
                deleted,
            )
            .await?;
        let root = match outcome.result {
            SetResult::One(node) => node,
            SetResult::Split { left, sep, right } => Arc::new(Node::Interior(
                InteriorNode::root_after_split(left, sep, right),
            )),
        };
        let size = if outcome.inserted {
            self.size + 1
        } else {
            self.size
        };
        Ok(self.with_root(root, size))
    }

    /// Removes `key` if present, returning the new tree version.
    ///
    /// A miss returns a tree sharing the receiver's root node, so callers can
    /// detect no-ops by identity. Value handles of the removed value are
    /// appended to `deleted`.
    pub async fn delete(&self, key: &str, deleted: &mut Vec<Tracked<T, S>>) -> Result<Self> {
        match self
            .root
            .delete(self.store.as_ref(), key, deleted)
            .await?
        {
            None => Ok(self.clone()),
            Some(root) => Ok(self.with_root(root, self.size - 1)),
        }
    }

    fn with_root(&self, root: Arc<Node<T, S>>, size: usize) -> Self {
        Self {
            order: self.order,
            size,
            root,
            handles: Arc::clone(&self.handles),
            store: Arc::clone(&self.store),
        }
    }

    /// Applies a batch of updates then deletes against a working copy and
    /// uploads every node that exists only in memory, bottom-up.
    ///
    /// Both lists apply in iteration order, updates strictly first, so later
    /// writes to the same key win. The receiver is left untouched; callers
    /// typically persist the result and then apply it with
    /// [`ChunkedBTree::update`].
    pub async fn flush(
        &self,
        updates: impl IntoIterator<Item = (String, T)>,
        deletes: impl IntoIterator<Item = String>,
    ) -> Result<FlushResult<S::NodeHandle, S::ValueHandle>> {
        let mut new_handles = Vec::new();
        let mut deleted_handles = Vec::new();
        let mut tree = self.clone();
        for (key, value) in updates {
            tree = tree
                .set(key, value, &mut new_handles, &mut deleted_handles)
                .await?;
        }
        for key in deletes {
            tree = tree.delete(&key, &mut deleted_handles).await?;
        }
        let new_root = tree
            .root
            .upload(self.store.as_ref(), &mut new_handles)
            .await?;
        debug!(
            new_size = tree.size,
            new_root = ?new_root,
            new_handles = new_handles.len(),
            deleted_handles = deleted_handles.len(),
            "tree.flush"
        );
        Ok(FlushResult {
            new_size: tree.size,
            new_root,
            new_handles,
            deleted_handles,
        })
    }

    /// Synchronous, non-chunked fallback: materializes the given batch as a
    /// single inline leaf payload, for contexts that cannot await store I/O.
    ///
    /// The emitted state is self-contained — its `size` is the materialized
    /// entry count and its handle set is empty.
    pub fn summarize_sync(
        &self,
        updates: impl IntoIterator<Item = (String, T)>,
        deletes: impl IntoIterator<Item = String>,
    ) -> TreeState<T, S::NodeHandle, S::ValueHandle> {
        let mut map: BTreeMap<String, T> = updates.into_iter().collect();
        for key in deletes {
            map.remove(&key);
        }
        let size = map.len();
        let (keys, values) = map.into_iter().unzip();
        TreeState {
            order: self.order,
            size,
            root: RootState::Inline(LeafPayload { keys, values }),
            handles: Vec::new(),
        }
    }

    /// Applies a flush result, producing the tree that a reload from the new
    /// persisted state would yield: a lazy root around the new root handle
    /// and the prior handle set adjusted by the flush deltas.
    pub fn update(&self, update: FlushResult<S::NodeHandle, S::ValueHandle>) -> Self {
        let mut handles: BTreeSet<Tracked<T, S>> = (*self.handles).clone();
        handles.extend(update.new_handles);
        for handle in &update.deleted_handles {
            handles.remove(handle);
        }
        Self {
            order: self.order,
            size: update.new_size,
            root: Arc::new(Node::Lazy(LazyNode::new(update.new_root))),
            handles: Arc::new(handles),
            store: Arc::clone(&self.store),
        }
    }

    /// Returns an empty tree of the same order backed by the same store.
    pub fn clear(&self) -> Self {
        Self {
            order: self.order,
            size: 0,
            root: Arc::new(Node::Leaf(LeafNode::empty())),
            handles: Arc::new(BTreeSet::new()),
            store: Arc::clone(&self.store),
        }
    }

    /// All handles reachable from the current root, the basis for the
    /// container's garbage-collection ledger.
    pub fn get_all_handles(&self) -> Vec<Tracked<T, S>> {
        self.handles.iter().cloned().collect()
    }

    /// Best-effort reclamation of resolved subtrees, bounded by `hint`
    /// entries. Never loses data: evicted subtrees reload from their handles
    /// on next access. Observe the effect through
    /// [`ChunkedBTree::working_set_size`].
    pub fn evict(&self, hint: usize) {
        let mut remaining = isize::try_from(hint).unwrap_or(isize::MAX);
        self.root.evict(&mut remaining);
    }

    /// Number of entries currently resident in memory.
    pub fn working_set_size(&self) -> usize {
        self.root.working_set_size()
    }
}
