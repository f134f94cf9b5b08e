#![allow(missing_docs)]

use std::sync::Arc;

use chunktree::{
    ChunkError, ChunkedBTree, ContentHash, DirStore, Result, RootState, TreeState,
};
use tempfile::tempdir;

type Tree = ChunkedBTree<String, DirStore>;

#[tokio::test]
async fn flush_and_reload_across_store_instances() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(DirStore::open(dir.path()).await?);
    let tree = Tree::create(4, store)?;

    let result = tree
        .flush(
            (0..40).map(|i| (format!("doc{i:02}"), format!("body-{i}"))),
            [],
        )
        .await?;
    let state = TreeState {
        order: 4,
        size: result.new_size,
        root: RootState::Handle(result.new_root),
        handles: result.new_handles,
    };

    // Reopen the directory as a brand-new store instance: every handle must
    // still resolve from the blob files on disk.
    let reopened = Arc::new(DirStore::open(dir.path()).await?);
    let reloaded = Tree::load(state, reopened).await?;
    assert_eq!(reloaded.count(), 40);
    for i in 0..40 {
        assert_eq!(
            reloaded.get(&format!("doc{i:02}")).await?,
            Some(format!("body-{i}"))
        );
    }
    Ok(())
}

#[tokio::test]
async fn eviction_reloads_from_disk() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(DirStore::open(dir.path()).await?);
    let tree = Tree::create(4, store)?;
    let result = tree
        .flush((0..60).map(|i| (format!("doc{i:02}"), format!("v{i}"))), [])
        .await?;
    let tree = tree.update(result);

    for i in 0..60 {
        tree.get(&format!("doc{i:02}")).await?;
    }
    assert_eq!(tree.working_set_size(), 60);

    tree.evict(usize::MAX);
    assert_eq!(tree.working_set_size(), 0);
    for i in 0..60 {
        assert_eq!(tree.get(&format!("doc{i:02}")).await?, Some(format!("v{i}")));
    }
    Ok(())
}

#[tokio::test]
async fn unknown_handle_reports_not_found() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(DirStore::open(dir.path()).await?);
    let state = TreeState {
        order: 4,
        size: 1,
        root: RootState::Handle(ContentHash(0xDEAD_BEEF)),
        handles: Vec::new(),
    };
    let tree = Tree::load(state, store).await?;
    let err = tree.get("anything").await.unwrap_err();
    assert!(matches!(err, ChunkError::HandleNotFound));
    Ok(())
}
