//! Integration tests for the Redis backend
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test redis_integration -- --ignored

use rank_store::{
    IndexSlot, Order, RankedPath, RedisStore, ScriptExecutor, SortedSetStore, StoreConfig,
};

async fn connect(prefix: &str) -> (RedisStore, String) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rank_store=debug")
        .with_test_writer()
        .try_init();

    let store = RedisStore::connect(&StoreConfig::default())
        .await
        .expect("Failed to connect to Redis");
    let path = format!("rank-store-test:{}:{}", prefix, std::process::id());
    store
        .clear_indexed(&path, 0)
        .await
        .expect("Failed to reset test key");
    (store, path)
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_recency_add_keeps_single_member() {
    let (store, path) = connect("add").await;
    let slot = IndexSlot::new(&path, "alice");

    store.recency_add(&slot, "0001:alice", 10.0).await.unwrap();
    store.recency_add(&slot, "0002:alice", 15.0).await.unwrap();

    assert_eq!(
        store.zmembers(&path).await.unwrap(),
        vec!["0002:alice".to_string()]
    );
    assert_eq!(
        store.get(&slot.pointer).await.unwrap(),
        Some("0002:alice".to_string())
    );

    assert_eq!(store.clear_indexed(&path, 5).await.unwrap(), 1);
    assert_eq!(store.get(&slot.pointer).await.unwrap(), None);
    assert_eq!(store.zcard(&path).await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_recency_improve_and_incr() {
    let (store, path) = connect("improve").await;
    let slot = IndexSlot::new(&path, "bob");

    assert!(store
        .recency_improve(&slot, "0001:bob", 20.0, Order::Descending)
        .await
        .unwrap());
    assert!(!store
        .recency_improve(&slot, "0002:bob", 20.0, Order::Descending)
        .await
        .unwrap());
    assert!(store
        .recency_improve(&slot, "0003:bob", 21.5, Order::Descending)
        .await
        .unwrap());

    let total = store.recency_incr(&slot, "0004:bob", 0.5).await.unwrap();
    assert_eq!(total, 22.0);
    assert_eq!(store.zscore(&path, "0004:bob").await.unwrap(), Some(22.0));
    assert_eq!(store.zcard(&path).await.unwrap(), 1);

    assert!(store.recency_remove(&slot).await.unwrap());
    assert_eq!(store.zcard(&path).await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_replace_if_lower_compares_bytes() {
    let (store, path) = connect("lower").await;
    let slot = IndexSlot::new(&path, "carol");

    assert!(store.replace_if_lower(&slot, "05-42-:carol").await.unwrap());
    assert!(!store.replace_if_lower(&slot, "05-43-:carol").await.unwrap());
    assert!(store.replace_if_lower(&slot, "04-99-:carol").await.unwrap());
    assert_eq!(
        store.zmembers(&path).await.unwrap(),
        vec!["04-99-:carol".to_string()]
    );

    store.clear_indexed(&path, 7).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_retrieval_procedures_match_memory_backend() {
    let (store, wins) = connect("wins").await;
    let losses = format!("{}:losses", wins);
    store.clear_indexed(&losses, 2).await.unwrap();

    for (id, w, l) in [("a", 5.0, 1.0), ("b", 9.0, 3.0), ("c", 7.0, 2.0)] {
        let member = format!("0:{}", id);
        store
            .recency_add(&IndexSlot::new(&wins, id), &member, w)
            .await
            .unwrap();
        store
            .recency_add(&IndexSlot::new(&losses, id), &member, l)
            .await
            .unwrap();
    }

    let paths = vec![wins.clone(), losses.clone()];
    let ranked = RankedPath {
        path: wins.clone(),
        order: Order::Descending,
        prefix_len: 2,
    };

    let scores = store.retrieve_entity(&paths, "c").await.unwrap();
    assert_eq!(scores, vec![Some(7.0), Some(2.0)]);

    let table = store.retrieve_range(&ranked, &paths, 0, 1).await.unwrap();
    let ids: Vec<_> = table.rows.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);

    let table = store.retrieve_range(&ranked, &paths, 0, u64::MAX).await.unwrap();
    assert_eq!(table.rows.len(), 3);
    let around = store
        .retrieve_around(&ranked, "b", u64::MAX, false, &paths)
        .await
        .unwrap()
        .expect("b is ranked");
    assert_eq!(around.rows.len(), 3);

    let around = store
        .retrieve_around(&ranked, "a", 1, true, &paths)
        .await
        .unwrap()
        .expect("a is ranked");
    assert_eq!(around.start, 0);
    assert_eq!(around.rows.len(), 3);
    assert_eq!(around.rows[2].scores, vec![Some(5.0), Some(1.0)]);

    assert!(store
        .retrieve_around(&ranked, "missing", 1, true, &paths)
        .await
        .unwrap()
        .is_none());

    store.clear_indexed(&wins, 2).await.unwrap();
    store.clear_indexed(&losses, 2).await.unwrap();
}
