//! Node variants and node-level operations.
//!
//! The variant set is closed: a node is an eager leaf, an eager interior
//! router, or a lazy wrapper around a durable handle. Nodes are immutable
//! once built; mutations construct new nodes and share unchanged children
//! via `Arc`.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::{ChunkError, Result};
use crate::store::{
    HandleStore, InteriorPayload, LeafPayload, NodeContent, Tracked, TrackedHandle,
};

/// A node of the chunked B-tree.
pub(crate) enum Node<T, S: HandleStore<T>> {
    Leaf(LeafNode<T>),
    Interior(InteriorNode<T, S>),
    Lazy(LazyNode<T, S>),
}

/// Result of a copy-on-write `set` below some node.
pub(crate) enum SetResult<T, S: HandleStore<T>> {
    /// The subtree was rebuilt in place.
    One(Arc<Node<T, S>>),
    /// The subtree split; `sep` is the smallest key of `right`.
    Split {
        left: Arc<Node<T, S>>,
        sep: String,
        right: Arc<Node<T, S>>,
    },
}

pub(crate) struct SetOutcome<T, S: HandleStore<T>> {
    /// True if a new key was inserted, false if an existing one was updated.
    pub(crate) inserted: bool,
    pub(crate) result: SetResult<T, S>,
}

/// Sorted run of key/value pairs.
pub(crate) struct LeafNode<T> {
    pub(crate) keys: Vec<String>,
    pub(crate) values: Vec<T>,
}

/// Separator keys routing to one-more child subtrees.
pub(crate) struct InteriorNode<T, S: HandleStore<T>> {
    pub(crate) keys: Vec<String>,
    pub(crate) children: Vec<Arc<Node<T, S>>>,
}

/// Deferred node known only by handle until first access.
///
/// Two states: unresolved (cache empty) and resolved (cache holds the
/// concrete node). `resolve` moves forward, `evict` moves back; the handle
/// itself never changes for the wrapper's lifetime.
pub(crate) struct LazyNode<T, S: HandleStore<T>> {
    pub(crate) handle: S::NodeHandle,
    cached: RwLock<Option<Arc<Node<T, S>>>>,
}

impl<T> LeafNode<T> {
    pub(crate) fn empty() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub(crate) fn from_payload(payload: LeafPayload<T>) -> Result<Self> {
        if payload.keys.len() != payload.values.len() {
            return Err(ChunkError::Corruption("leaf keys/values length mismatch"));
        }
        if !payload.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(ChunkError::Corruption("leaf keys out of order"));
        }
        Ok(Self {
            keys: payload.keys,
            values: payload.values,
        })
    }

    fn position(&self, key: &str) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_str().cmp(key))
    }

    pub(crate) fn has(&self, key: &str) -> bool {
        self.position(key).is_ok()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&T> {
        self.position(key).ok().map(|i| &self.values[i])
    }
}

impl<T: Clone> LeafNode<T> {
    pub(crate) fn first(&self) -> Option<(String, T)> {
        self.keys
            .first()
            .map(|k| (k.clone(), self.values[0].clone()))
    }

    pub(crate) fn last(&self) -> Option<(String, T)> {
        self.keys
            .last()
            .map(|k| (k.clone(), self.values[self.values.len() - 1].clone()))
    }

    /// Copy-on-write set. Splits into equal halves when the run reaches
    /// `order` keys; the separator is the first key of the upper half.
    fn set<S: HandleStore<T>>(&self, order: usize, key: String, value: T) -> SetOutcome<T, S> {
        match self.position(&key) {
            Ok(i) => {
                let mut values = self.values.clone();
                values[i] = value;
                SetOutcome {
                    inserted: false,
                    result: SetResult::One(Arc::new(Node::Leaf(Self {
                        keys: self.keys.clone(),
                        values,
                    }))),
                }
            }
            Err(i) => {
                let mut keys = self.keys.clone();
                let mut values = self.values.clone();
                keys.insert(i, key);
                values.insert(i, value);
                if keys.len() < order {
                    return SetOutcome {
                        inserted: true,
                        result: SetResult::One(Arc::new(Node::Leaf(Self { keys, values }))),
                    };
                }
                let mid = (keys.len() + 1) / 2;
                let upper_keys = keys.split_off(mid);
                let upper_values = values.split_off(mid);
                let sep = upper_keys[0].clone();
                SetOutcome {
                    inserted: true,
                    result: SetResult::Split {
                        left: Arc::new(Node::Leaf(Self { keys, values })),
                        sep,
                        right: Arc::new(Node::Leaf(Self {
                            keys: upper_keys,
                            values: upper_values,
                        })),
                    },
                }
            }
        }
    }

    /// Copy-on-write delete. `None` means the key was absent and the caller
    /// should keep its existing node untouched. Leaves shrink without
    /// rebalancing.
    fn delete<S: HandleStore<T>>(
        &self,
        store: &S,
        key: &str,
        deleted: &mut Vec<Tracked<T, S>>,
    ) -> Option<Arc<Node<T, S>>> {
        let i = self.position(key).ok()?;
        for handle in store.discover_handles(&self.values[i]) {
            deleted.push(TrackedHandle::Value(handle));
        }
        let mut keys = self.keys.clone();
        let mut values = self.values.clone();
        keys.remove(i);
        values.remove(i);
        Some(Arc::new(Node::Leaf(Self { keys, values })))
    }
}

impl<T, S: HandleStore<T>> InteriorNode<T, S> {
    pub(crate) fn root_after_split(
        left: Arc<Node<T, S>>,
        sep: String,
        right: Arc<Node<T, S>>,
    ) -> Self {
        Self {
            keys: vec![sep],
            children: vec![left, right],
        }
    }

    /// Index of the child responsible for `key`: the first child whose
    /// separator exceeds the key, or the unbounded last child.
    pub(crate) fn route_index(&self, key: &str) -> usize {
        self.keys.partition_point(|sep| sep.as_str() <= key)
    }

    fn with_child_replaced(&self, index: usize, child: Arc<Node<T, S>>) -> Self {
        let mut children = self.children.clone();
        children[index] = child;
        Self {
            keys: self.keys.clone(),
            children,
        }
    }

    /// Folds a child split into this node, splitting in turn once the key
    /// count reaches `order`. The promoted separator is the first key of the
    /// upper half and is removed from that half's own key list.
    fn with_child_split(
        &self,
        index: usize,
        left: Arc<Node<T, S>>,
        sep: String,
        right: Arc<Node<T, S>>,
        order: usize,
    ) -> SetResult<T, S> {
        let mut keys = self.keys.clone();
        let mut children = self.children.clone();
        keys.insert(index, sep);
        children[index] = left;
        children.insert(index + 1, right);
        if keys.len() < order {
            return SetResult::One(Arc::new(Node::Interior(Self { keys, children })));
        }
        let mid = keys.len() / 2;
        let mut upper_keys = keys.split_off(mid);
        let promoted = upper_keys.remove(0);
        let upper_children = children.split_off(mid + 1);
        SetResult::Split {
            left: Arc::new(Node::Interior(Self { keys, children })),
            sep: promoted,
            right: Arc::new(Node::Interior(Self {
                keys: upper_keys,
                children: upper_children,
            })),
        }
    }
}

impl<T, S: HandleStore<T>> LazyNode<T, S> {
    pub(crate) fn new(handle: S::NodeHandle) -> Self {
        Self {
            handle,
            cached: RwLock::new(None),
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.cached.read().is_some()
    }
}

impl<T, S> LazyNode<T, S>
where
    T: Clone + Send + Sync,
    S: HandleStore<T>,
{
    /// Loads the concrete node behind the handle, caching it for subsequent
    /// accesses. Concurrent readers racing here keep the first winner.
    pub(crate) async fn resolve(&self, store: &S) -> Result<Arc<Node<T, S>>> {
        if let Some(node) = self.cached.read().clone() {
            return Ok(node);
        }
        trace!(handle = ?self.handle, "node.resolve");
        let content = store.resolve_handle(&self.handle).await?;
        let node = Arc::new(Node::from_content(content)?);
        let node = self.cached.write().get_or_insert_with(|| node).clone();
        Ok(node)
    }

    /// Budgeted eviction. Children are considered first; if the budget still
    /// allows reclaiming this whole subtree afterwards, the cache is dropped
    /// and the wrapper reverts to unresolved.
    fn evict(&self, remaining: &mut isize) -> usize {
        let mut cached = self.cached.write();
        let Some(inner) = cached.clone() else {
            return 0;
        };
        let below = inner.evict(remaining);
        *remaining -= below as isize;
        if *remaining > 0 {
            trace!(handle = ?self.handle, entries = below, "node.evict");
            *cached = None;
        }
        0
    }
}

impl<T, S> Node<T, S>
where
    T: Clone + Send + Sync,
    S: HandleStore<T>,
{
    /// Rebuilds a node from its persisted content record. Child handles of an
    /// interior record are wrapped lazily; nothing below is fetched.
    pub(crate) fn from_content(content: NodeContent<T, S::NodeHandle>) -> Result<Self> {
        match content {
            NodeContent::Leaf(payload) => Ok(Node::Leaf(LeafNode::from_payload(payload)?)),
            NodeContent::Interior(payload) => {
                if payload.children.is_empty() {
                    return Err(ChunkError::Corruption("interior node without children"));
                }
                if payload.children.len() != payload.keys.len() + 1 {
                    return Err(ChunkError::Corruption(
                        "interior node must have exactly one more child than keys",
                    ));
                }
                Ok(Node::Interior(InteriorNode {
                    keys: payload.keys,
                    children: payload
                        .children
                        .into_iter()
                        .map(|handle| Arc::new(Node::Lazy(LazyNode::new(handle))))
                        .collect(),
                }))
            }
        }
    }

    /// Copy-on-write set along the root-to-leaf path.
    ///
    /// Crossing a lazy wrapper records its handle as deleted: the persisted
    /// version of everything on this path stops being reachable once the
    /// mutated tree is flushed.
    pub(crate) fn set<'a>(
        &'a self,
        store: &'a S,
        order: usize,
        key: String,
        value: T,
        added: &'a mut Vec<Tracked<T, S>>,
        deleted: &'a mut Vec<Tracked<T, S>>,
    ) -> BoxFuture<'a, Result<SetOutcome<T, S>>> {
        Box::pin(async move {
            match self {
                Node::Leaf(leaf) => {
                    for handle in store.discover_handles(&value) {
                        added.push(TrackedHandle::Value(handle));
                    }
                    Ok(leaf.set(order, key, value))
                }
                Node::Interior(node) => {
                    let index = node.route_index(&key);
                    let outcome = node.children[index]
                        .set(store, order, key, value, added, deleted)
                        .await?;
                    let result = match outcome.result {
                        SetResult::One(child) => SetResult::One(Arc::new(Node::Interior(
                            node.with_child_replaced(index, child),
                        ))),
                        SetResult::Split { left, sep, right } => {
                            node.with_child_split(index, left, sep, right, order)
                        }
                    };
                    Ok(SetOutcome {
                        inserted: outcome.inserted,
                        result,
                    })
                }
                Node::Lazy(lazy) => {
                    deleted.push(TrackedHandle::Node(lazy.handle.clone()));
                    let inner = lazy.resolve(store).await?;
                    inner.set(store, order, key, value, added, deleted).await
                }
            }
        })
    }

    /// Copy-on-write delete. A miss propagates `None` without recloning
    /// anything, so the caller's node identity is preserved.
    pub(crate) fn delete<'a>(
        &'a self,
        store: &'a S,
        key: &'a str,
        deleted: &'a mut Vec<Tracked<T, S>>,
    ) -> BoxFuture<'a, Result<Option<Arc<Node<T, S>>>>> {
        Box::pin(async move {
            match self {
                Node::Leaf(leaf) => Ok(leaf.delete(store, key, deleted)),
                Node::Interior(node) => {
                    let index = node.route_index(key);
                    match node.children[index].delete(store, key, deleted).await? {
                        None => Ok(None),
                        Some(child) => Ok(Some(Arc::new(Node::Interior(
                            node.with_child_replaced(index, child),
                        )))),
                    }
                }
                Node::Lazy(lazy) => {
                    deleted.push(TrackedHandle::Node(lazy.handle.clone()));
                    let inner = lazy.resolve(store).await?;
                    inner.delete(store, key, deleted).await
                }
            }
        })
    }

    /// Serializes this subtree bottom-up, returning the handle for this node.
    ///
    /// Lazy wrappers short-circuit to their existing handle, so unchanged
    /// flushed subtrees cost O(1) regardless of size.
    pub(crate) fn upload<'a>(
        &'a self,
        store: &'a S,
        new_handles: &'a mut Vec<Tracked<T, S>>,
    ) -> BoxFuture<'a, Result<S::NodeHandle>> {
        Box::pin(async move {
            match self {
                Node::Leaf(leaf) => {
                    let handle = store
                        .create_handle(NodeContent::Leaf(LeafPayload {
                            keys: leaf.keys.clone(),
                            values: leaf.values.clone(),
                        }))
                        .await?;
                    new_handles.push(TrackedHandle::Node(handle.clone()));
                    Ok(handle)
                }
                Node::Interior(node) => {
                    let mut children = Vec::with_capacity(node.children.len());
                    for child in &node.children {
                        children.push(child.upload(store, new_handles).await?);
                    }
                    let handle = store
                        .create_handle(NodeContent::Interior(InteriorPayload {
                            keys: node.keys.clone(),
                            children,
                        }))
                        .await?;
                    new_handles.push(TrackedHandle::Node(handle.clone()));
                    Ok(handle)
                }
                Node::Lazy(lazy) => Ok(lazy.handle.clone()),
            }
        })
    }

    /// Best-effort depth-first eviction pass. Returns the entry count still
    /// pinned below this node for the parent lazy wrapper's budget math;
    /// whole resolved subtrees are preferred over partial reclamation.
    pub(crate) fn evict(&self, remaining: &mut isize) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.keys.len(),
            Node::Interior(node) => {
                let mut below = 0;
                for child in &node.children {
                    below += child.evict(remaining);
                    if *remaining <= 0 {
                        break;
                    }
                }
                below
            }
            Node::Lazy(lazy) => lazy.evict(remaining),
        }
    }

    /// Number of entries currently resident in memory below this node.
    pub(crate) fn working_set_size(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.keys.len(),
            Node::Interior(node) => node
                .children
                .iter()
                .map(|child| child.working_set_size())
                .sum(),
            Node::Lazy(lazy) => lazy
                .cached
                .read()
                .as_ref()
                .map_or(0, |inner| inner.working_set_size()),
        }
    }
}
