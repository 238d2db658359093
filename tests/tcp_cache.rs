//! TCP pool and RESP cache client against a fake server
//!
//! The fake server keeps one keyspace per listener and understands just the
//! commands `RespCache` sends. A few reserved keys misbehave on GET: `slow`
//! answers late, `garbage` answers with an invalid frame and `hangup` sends
//! half a reply then closes the socket.

use arrakis_kv_router::pool::{parse_reply, Reply, TcpPool};
use arrakis_kv_router::{CacheClient, PoolConfig, PoolError, RouterError, ShardPool, ShardedPool};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct FakeServer {
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    ttls: Mutex<HashMap<Vec<u8>, u64>>,
    accepted: AtomicUsize,
}

async fn spawn_server() -> (String, Arc<FakeServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = Arc::new(FakeServer::default());

    let shared = Arc::clone(&server);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            shared.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(socket, Arc::clone(&shared)));
        }
    });

    (address, server)
}

const SLOW_REPLY_DELAY: Duration = Duration::from_millis(100);

async fn serve_connection(mut socket: TcpStream, server: Arc<FakeServer>) {
    let mut buf = BytesMut::new();
    loop {
        while let Some((request, used)) = parse_reply(&buf).unwrap() {
            buf.advance(used);
            let is_get = argument(&request, 0).as_deref() == Some(&b"GET"[..]);
            let key = argument(&request, 1);
            if is_get && key.as_deref() == Some(&b"slow"[..]) {
                tokio::time::sleep(SLOW_REPLY_DELAY).await;
            }
            let reply = handle(&server, request);
            if socket.write_all(&reply).await.is_err() {
                return;
            }
            if is_get && key.as_deref() == Some(&b"hangup"[..]) {
                return;
            }
        }
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn argument(request: &Reply, index: usize) -> Option<Bytes> {
    match request {
        Reply::Array(Some(items)) => match items.get(index) {
            Some(Reply::Bulk(Some(arg))) => Some(arg.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn handle(server: &FakeServer, request: Reply) -> Vec<u8> {
    let Reply::Array(Some(items)) = request else {
        return b"-ERR expected array\r\n".to_vec();
    };
    let args: Vec<Bytes> = items
        .into_iter()
        .map(|item| match item {
            Reply::Bulk(Some(arg)) => arg,
            _ => Bytes::new(),
        })
        .collect();

    match &args[0][..] {
        b"GET" if args[1].as_ref() == b"garbage" => b"?garbage\r\n".to_vec(),
        b"GET" if args[1].as_ref() == b"hangup" => b"$10\r\npart".to_vec(),
        b"GET" => match server.store.lock().get(&args[1][..]) {
            Some(value) => {
                let mut out = format!("${}\r\n", value.len()).into_bytes();
                out.extend_from_slice(value);
                out.extend_from_slice(b"\r\n");
                out
            }
            None => b"$-1\r\n".to_vec(),
        },
        b"SET" => {
            if args[1].as_ref() == b"boom" {
                return b"-ERR refused\r\n".to_vec();
            }
            server.store.lock().insert(args[1].to_vec(), args[2].to_vec());
            if args.len() == 5 && args[3].as_ref() == b"PX" {
                let millis = std::str::from_utf8(&args[4]).unwrap().parse().unwrap();
                server.ttls.lock().insert(args[1].to_vec(), millis);
            }
            b"+OK\r\n".to_vec()
        }
        b"PEXPIRE" => {
            if server.store.lock().contains_key(&args[1][..]) {
                let millis = std::str::from_utf8(&args[2]).unwrap().parse().unwrap();
                server.ttls.lock().insert(args[1].to_vec(), millis);
                b":1\r\n".to_vec()
            } else {
                b":0\r\n".to_vec()
            }
        }
        b"DEL" => {
            let removed = server.store.lock().remove(&args[1][..]).is_some();
            format!(":{}\r\n", u8::from(removed)).into_bytes()
        }
        _ => b"-ERR unknown command\r\n".to_vec(),
    }
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        max_connections: 2,
        max_idle: 2,
        checkout_timeout_ms: 200,
        connect_timeout_ms: 500,
        idle_timeout_ms: 60_000,
    }
}

#[tokio::test]
async fn cache_round_trip_over_tcp() {
    let (address, server) = spawn_server().await;
    let pool = TcpPool::new(&address, pool_config()).unwrap();
    let mut cache = pool.cache_client().await.unwrap();

    assert_eq!(cache.get("user:42").await.unwrap(), None);
    cache.set("user:42", b"alice", None).await.unwrap();
    assert_eq!(
        cache.get("user:42").await.unwrap(),
        Some(Bytes::from_static(b"alice"))
    );

    assert!(cache.expire("user:42", Duration::from_secs(30)).await.unwrap());
    assert!(!cache.expire("missing", Duration::from_secs(30)).await.unwrap());
    assert_eq!(server.ttls.lock().get(&b"user:42"[..]), Some(&30_000));

    assert!(cache.delete("user:42").await.unwrap());
    assert!(!cache.delete("user:42").await.unwrap());
}

#[tokio::test]
async fn set_with_ttl_sends_px() {
    let (address, server) = spawn_server().await;
    let pool = TcpPool::new(&address, pool_config()).unwrap();
    let mut cache = pool.cache_client().await.unwrap();

    cache
        .set("session-1", b"token", Some(Duration::from_millis(1500)))
        .await
        .unwrap();
    assert_eq!(server.ttls.lock().get(&b"session-1"[..]), Some(&1_500));
}

#[tokio::test]
async fn server_error_keeps_connection_usable() {
    let (address, server) = spawn_server().await;
    let pool = TcpPool::new(&address, pool_config()).unwrap();

    {
        let mut cache = pool.cache_client().await.unwrap();
        let err = cache.set("boom", b"x", None).await.unwrap_err();
        assert!(matches!(err, PoolError::Server(ref msg) if msg == "ERR refused"));
        cache.set("fine", b"x", None).await.unwrap();
    }

    // Same connection went back to the pool
    let mut cache = pool.cache_client().await.unwrap();
    assert_eq!(cache.get("fine").await.unwrap(), Some(Bytes::from_static(b"x")));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(pool.created(), 1);
}

#[tokio::test]
async fn registry_routes_writes_to_owning_server() {
    let mut servers = Vec::new();
    let mut fakes = Vec::new();
    for _ in 0..3 {
        let (address, server) = spawn_server().await;
        servers.push(address);
        fakes.push(server);
    }

    let registry = ShardedPool::connect_tcp(&servers, &pool_config()).unwrap();
    for i in 0..20 {
        let key = format!("user:{i}");
        let mut cache = registry.cache_client(&key).await.unwrap();
        assert_eq!(cache.address(), registry.route(&key).unwrap().address);
        cache.set(&key, b"v", None).await.unwrap();
    }

    for i in 0..20 {
        let key = format!("user:{i}");
        let owner = registry.route(&key).unwrap().index;
        for (index, fake) in fakes.iter().enumerate() {
            assert_eq!(
                fake.store.lock().contains_key(key.as_bytes()),
                index == owner,
                "key {key}"
            );
        }
    }
}

#[tokio::test]
async fn exhausted_shard_surfaces_pool_error() {
    let (address, _server) = spawn_server().await;
    let config = PoolConfig {
        max_connections: 1,
        ..pool_config()
    };
    let registry = ShardedPool::connect_tcp([address.as_str()], &config).unwrap();

    let _held = registry.client("k").await.unwrap();
    let err = registry.client("k").await.unwrap_err();
    match err {
        RouterError::PoolUnavailable { address: ref shard, ref source } => {
            assert_eq!(shard, &address);
            assert!(matches!(source, PoolError::CheckoutTimeout { .. }));
        }
        ref other => panic!("unexpected error: {other}"),
    }
}

fn single_connection() -> PoolConfig {
    PoolConfig {
        max_connections: 1,
        ..pool_config()
    }
}

#[tokio::test]
async fn cancelled_get_does_not_leak_reply_to_next_lease() {
    let (address, server) = spawn_server().await;
    let pool = TcpPool::new(&address, single_connection()).unwrap();

    {
        let mut cache = pool.cache_client().await.unwrap();
        cache.set("slow", b"value-slow", None).await.unwrap();
        cache.set("b", b"value-b", None).await.unwrap();
    }
    assert_eq!(pool.created(), 1);

    {
        let mut cache = pool.cache_client().await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_millis(20), cache.get("slow")).await;
        assert!(outcome.is_err(), "slow GET should not finish in time");
    }

    // The interrupted stream is discarded, not reused
    assert_eq!(pool.idle(), 0);
    let mut cache = pool.cache_client().await.unwrap();
    assert_eq!(
        cache.get("b").await.unwrap(),
        Some(Bytes::from_static(b"value-b"))
    );
    assert_eq!(pool.created(), 2);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_reply_discards_connection() {
    let (address, _server) = spawn_server().await;
    let pool = TcpPool::new(&address, single_connection()).unwrap();

    {
        let mut cache = pool.cache_client().await.unwrap();
        cache.set("k", b"v", None).await.unwrap();
        let err = cache.get("garbage").await.unwrap_err();
        assert!(matches!(err, PoolError::Protocol(_)), "got {err}");
    }

    assert_eq!(pool.idle(), 0);
    let mut cache = pool.cache_client().await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    assert_eq!(pool.created(), 2);
}

#[tokio::test]
async fn connection_closed_mid_reply_is_discarded() {
    let (address, server) = spawn_server().await;
    let pool = TcpPool::new(&address, single_connection()).unwrap();

    {
        let mut cache = pool.cache_client().await.unwrap();
        let err = cache.get("hangup").await.unwrap_err();
        assert!(matches!(err, PoolError::Io(_)), "got {err}");
    }

    assert_eq!(pool.idle(), 0);
    let mut cache = pool.cache_client().await.unwrap();
    assert_eq!(cache.get("missing").await.unwrap(), None);
    assert_eq!(pool.created(), 2);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}
