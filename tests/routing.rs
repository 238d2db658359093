//! Placement compatibility tests
//!
//! Pins the key→shard mapping so already-sharded data keeps resolving to the
//! same server. If one of the golden vectors changes, placement has drifted
//! (wrong encoding, wrong CRC polynomial, or a different reduction).

use arrakis_kv_router::pool::MemoryConnection;
use arrakis_kv_router::{shard_index, CacheClient, RouterError, ShardPool, ShardedPool};
use tokio_test::{assert_err, assert_ok};

const SERVERS: [&str; 3] = ["s0:6379", "s1:6379", "s2:6379"];

#[test]
fn golden_vector_user_42_on_three_shards() {
    assert_eq!(assert_ok!(shard_index("user:42", 3)), 2);

    let registry = assert_ok!(ShardedPool::in_memory(SERVERS));
    assert_eq!(assert_ok!(registry.route("user:42")).address, "s2:6379");
}

#[test]
fn zero_shards_is_invalid_configuration() {
    let err = assert_err!(shard_index("user:42", 0));
    assert!(matches!(err, RouterError::InvalidConfiguration(_)));
}

#[test]
fn duplicate_addresses_rejected() {
    let err = assert_err!(ShardedPool::in_memory(["A", "A"]));
    assert!(matches!(err, RouterError::DuplicateShardAddress { ref address } if address == "A"));
}

#[test]
fn shard_list_order_changes_placement() {
    let forward = assert_ok!(ShardedPool::in_memory(["A", "B"]));
    let reversed = assert_ok!(ShardedPool::in_memory(["B", "A"]));

    let moved = (0..32)
        .map(|i| format!("key-{i}"))
        .any(|key| forward.route(&key).unwrap().address != reversed.route(&key).unwrap().address);
    assert!(moved, "reordering servers must move at least one key");
}

#[test]
fn routing_is_stable_across_registries() {
    let first = assert_ok!(ShardedPool::in_memory(SERVERS));
    let second = assert_ok!(ShardedPool::in_memory(SERVERS));

    for i in 0..100 {
        let key = format!("user:{i}");
        let route = first.route(&key).unwrap();
        assert_eq!(route, second.route(&key).unwrap());
        assert!(route.index < SERVERS.len());
        assert_eq!(route.address, SERVERS[route.index]);
    }
}

#[tokio::test]
async fn client_and_cache_client_hit_the_same_shard() {
    let registry = assert_ok!(ShardedPool::in_memory(SERVERS));

    for key in ["k", "user:42", "session-1", "a", "hello"] {
        let client: MemoryConnection = assert_ok!(registry.client(key).await);
        let cache = assert_ok!(registry.cache_client(key).await);
        assert_eq!(client.address(), cache.address(), "key {key}");
    }
}

#[tokio::test]
async fn session_key_end_to_end() {
    let registry = assert_ok!(ShardedPool::in_memory(SERVERS));
    let expected = assert_ok!(shard_index("session-1", SERVERS.len()));
    assert_eq!(expected, 0);

    let client = assert_ok!(registry.client("session-1").await);
    assert_eq!(client.address(), SERVERS[expected]);

    let expected_pool = registry.pool_for(SERVERS[expected]).unwrap();
    assert_eq!(expected_pool.leased(), 1);
    for (index, address) in SERVERS.iter().enumerate() {
        if index != expected {
            assert_eq!(registry.pool_for(address).unwrap().leased(), 0);
        }
    }
    assert_eq!(registry.stats().acquisitions(expected), 1);
}

#[tokio::test]
async fn values_stay_on_their_shard() {
    let registry = assert_ok!(ShardedPool::in_memory(SERVERS));

    for i in 0..30 {
        let key = format!("user:{i}");
        let mut cache = registry.cache_client(&key).await.unwrap();
        cache.set(&key, key.as_bytes(), None).await.unwrap();
    }

    for i in 0..30 {
        let key = format!("user:{i}");
        let route = registry.route(&key).unwrap();
        for (index, pool) in (0..SERVERS.len()).map(|n| (n, registry.pool(n).unwrap())) {
            let conn = pool.client().await.unwrap();
            assert_eq!(conn.exists(&key), index == route.index, "key {key}");
        }
    }
}

#[tokio::test]
async fn concurrent_lookups_share_one_registry() {
    let registry = assert_ok!(ShardedPool::in_memory(SERVERS));

    let mut handles = Vec::new();
    for task in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("task-{task}-{i}");
                let route = registry.route(&key).unwrap();
                let client = registry.client(&key).await.unwrap();
                assert_eq!(client.address(), route.address);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(registry.stats().total_acquisitions(), 400);
}
