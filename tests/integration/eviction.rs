#![allow(missing_docs)]

use std::sync::Arc;

use chunktree::{ChunkedBTree, MemoryStore, Result};

type Tree = ChunkedBTree<i64, MemoryStore>;

async fn flushed_tree(order: usize, entries: usize) -> Result<Tree> {
    let tree = Tree::create(order, Arc::new(MemoryStore::new()))?;
    let result = tree
        .flush((0..entries).map(|i| (format!("key{i:04}"), i as i64)), [])
        .await?;
    Ok(tree.update(result))
}

#[tokio::test]
async fn working_set_grows_with_reads_only() -> Result<()> {
    let tree = flushed_tree(4, 200).await?;
    assert_eq!(tree.working_set_size(), 0);

    // Resolving a single key pulls in exactly one leaf's run.
    tree.get("key0000").await?;
    let after_one = tree.working_set_size();
    assert!(after_one > 0);
    assert!(after_one < 200, "one probe must not resolve the whole tree");

    for i in 0..200 {
        tree.get(&format!("key{i:04}")).await?;
    }
    assert_eq!(tree.working_set_size(), 200);
    Ok(())
}

#[tokio::test]
async fn eviction_is_budgeted_and_lossless() -> Result<()> {
    let tree = flushed_tree(4, 200).await?;
    for i in 0..200 {
        tree.get(&format!("key{i:04}")).await?;
    }
    assert_eq!(tree.working_set_size(), 200);

    // A generous budget reclaims the entire resolved working set.
    tree.evict(10_000);
    assert_eq!(tree.working_set_size(), 0);

    // Reads after eviction reload from the store and stay correct.
    for i in 0..200 {
        assert_eq!(tree.get(&format!("key{i:04}")).await?, Some(i));
    }
    Ok(())
}

#[tokio::test]
async fn partial_budget_reclaims_partial_working_set() -> Result<()> {
    let tree = flushed_tree(4, 200).await?;
    for i in 0..200 {
        tree.get(&format!("key{i:04}")).await?;
    }

    // A mid-sized budget frees some subtrees and runs out; what remains
    // resident must still be a subset of what was resident before.
    tree.evict(50);
    let remaining = tree.working_set_size();
    assert!(remaining < 200, "budget of 50 must evict something");

    for i in 0..200 {
        assert_eq!(tree.get(&format!("key{i:04}")).await?, Some(i));
    }
    Ok(())
}

#[tokio::test]
async fn eviction_on_eager_tree_is_a_no_op() -> Result<()> {
    // A never-flushed tree has no lazy wrappers, so nothing is evictable.
    let tree = Tree::create(4, Arc::new(MemoryStore::new()))?;
    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut tree = tree;
    for i in 0..50 {
        tree = tree
            .set(format!("key{i:04}"), i, &mut added, &mut deleted)
            .await?;
    }
    assert_eq!(tree.working_set_size(), 50);
    tree.evict(usize::MAX);
    assert_eq!(tree.working_set_size(), 50);
    Ok(())
}

#[tokio::test]
async fn eviction_in_one_version_does_not_corrupt_another() -> Result<()> {
    let tree = flushed_tree(4, 100).await?;
    for i in 0..100 {
        tree.get(&format!("key{i:04}")).await?;
    }

    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let edited = tree.set("key0000", -1, &mut added, &mut deleted).await?;

    tree.evict(10_000);

    // The edited version re-resolves what it needs and reads correctly.
    assert_eq!(edited.get("key0000").await?, Some(-1));
    assert_eq!(edited.get("key0099").await?, Some(99));
    assert_eq!(tree.get("key0000").await?, Some(0));
    Ok(())
}
