//! Node Pool Tests
//!
//! These tests verify:
//! - Node lookup by key and alias
//! - Ring rebuilds on liveness transitions
//! - Health probes (closures, PING, background monitor)

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use kvring::cluster::{HashRing, HealthProbe, Node, NodePool, PingProbe};
use kvring::config::{ClientConfig, NodeConfig};
use kvring::network::SocketOptions;
use kvring::{KvError, PrefixKeyTransformer};

use common::MockServer;

// =============================================================================
// Helper Functions
// =============================================================================

fn offline_config(aliases: &[&str]) -> ClientConfig {
    let mut builder = ClientConfig::builder();
    for (i, alias) in aliases.iter().enumerate() {
        // Nothing listens here; these tests never open a socket
        builder = builder.node(NodeConfig::new(*alias, format!("127.0.0.1:{}", 1 + i)));
    }
    builder.build()
}

fn sample_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key:{}", i)).collect()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_servers_keep_configuration_order() {
    let pool = NodePool::new(&offline_config(&["c", "a", "b"]), None).unwrap();
    let aliases: Vec<&str> = pool.servers().iter().map(|n| n.alias()).collect();
    assert_eq!(aliases, vec!["c", "a", "b"]);
    assert_eq!(pool.live_servers().len(), 3);
    assert_eq!(pool.node_by_alias("a").unwrap().alias(), "a");
    assert!(pool.node_by_alias("zzz").is_none());
}

#[test]
fn test_locate_is_deterministic() {
    let pool = NodePool::new(&offline_config(&["a", "b", "c"]), None).unwrap();
    for key in sample_keys(200) {
        let first = pool.locate(key.as_bytes()).unwrap();
        let second = pool.locate(key.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}

#[test]
fn test_invalid_config_rejected() {
    assert!(matches!(
        NodePool::new(&ClientConfig::default(), None),
        Err(KvError::Config(_))
    ));
}

#[test]
fn test_pool_from_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kvring.toml");
    std::fs::write(
        &path,
        r#"
        points_per_weight = 80

        [[nodes]]
        alias = "east"
        address = "127.0.0.1:7001"

        [[nodes]]
        alias = "west"
        address = "127.0.0.1:7002"
        weight = 3
        "#,
    )
    .unwrap();

    let config = ClientConfig::from_file(&path).unwrap();
    let pool = NodePool::new(&config, None).unwrap();
    assert_eq!(pool.ring().len(), 4 * 80);
    assert_eq!(pool.node_by_alias("west").unwrap().weight(), 3);

    let missing = dir.path().join("missing.toml");
    assert!(ClientConfig::from_file(&missing).is_err());
}

#[test]
fn test_transformer_applied() {
    let transformer = Arc::new(PrefixKeyTransformer::new("app:"));
    let pool = NodePool::new(&offline_config(&["a"]), Some(transformer)).unwrap();
    assert_eq!(pool.transform_key(b"k"), Bytes::from_static(b"app:k"));

    let plain = NodePool::new(&offline_config(&["a"]), None).unwrap();
    assert_eq!(plain.transform_key(b"k"), Bytes::from_static(b"k"));
}

// =============================================================================
// Liveness Tests
// =============================================================================

#[test]
fn test_dead_node_keys_move_and_return() {
    let pool = NodePool::new(&offline_config(&["a", "b", "c"]), None).unwrap();
    let keys = sample_keys(1000);
    let before: Vec<String> = keys
        .iter()
        .map(|k| pool.locate(k.as_bytes()).unwrap().alias().to_string())
        .collect();

    let b = pool.node_by_alias("b").unwrap();
    assert!(pool.set_alive(&b, false));
    assert!(!pool.set_alive(&b, false), "unchanged flag must not rebuild");
    assert_eq!(pool.live_servers().len(), 2);

    for (key, old) in keys.iter().zip(&before) {
        let now = pool.locate(key.as_bytes()).unwrap();
        assert_ne!(now.alias(), "b");
        if old != "b" {
            assert_eq!(now.alias(), old);
        }
    }

    assert!(pool.set_alive(&b, true));
    for (key, old) in keys.iter().zip(&before) {
        assert_eq!(pool.locate(key.as_bytes()).unwrap().alias(), old);
    }
}

#[test]
fn test_no_live_nodes() {
    let pool = NodePool::new(&offline_config(&["a", "b"]), None).unwrap();
    for node in pool.servers() {
        pool.set_alive(node, false);
    }
    assert!(pool.ring().is_empty());
    assert!(matches!(pool.locate(b"key"), Err(KvError::Config(_))));
    // Dead nodes are still listed for stats
    assert_eq!(pool.servers().len(), 2);
}

#[test]
fn test_concurrent_transitions_leave_current_ring() {
    let mut config = offline_config(&["a", "b", "c"]);
    config.points_per_weight = 4000;

    for _ in 0..20 {
        let pool = Arc::new(NodePool::new(&config, None).unwrap());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|alias| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let node = pool.node_by_alias(alias).unwrap();
                    barrier.wait();
                    pool.set_alive(&node, false);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected = HashRing::build(pool.servers(), config.points_per_weight);
        assert_eq!(pool.ring().len(), expected.len());
        assert_eq!(pool.ring().len(), 4000);
        for key in sample_keys(50) {
            assert_eq!(pool.locate(key.as_bytes()).unwrap().alias(), "c");
        }
    }
}

#[test]
fn test_dead_node_drops_idle_sockets() {
    let server = MockServer::start();
    let config = ClientConfig::builder()
        .node(NodeConfig::new("live", server.addr()))
        .build();
    let pool = NodePool::new(&config, None).unwrap();
    let node = pool.node_by_alias("live").unwrap();

    drop(node.acquire(0).unwrap());
    assert_eq!(node.pool_stats().idle, 1);

    assert!(pool.set_alive(&node, false));
    let stats = node.pool_stats();
    assert_eq!((stats.idle, stats.retired), (0, 1));

    // The pool is not closed; the node gets fresh sockets once it is back
    assert!(pool.set_alive(&node, true));
    drop(node.acquire(0).unwrap());
    let stats = node.pool_stats();
    assert_eq!((stats.created, stats.idle), (2, 1));
}

#[test]
fn test_probe_now_with_closure() {
    let down = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&down);
    let pool = NodePool::new(&offline_config(&["a", "b", "c"]), None)
        .unwrap()
        .with_probe(move |node: &Node| !(node.alias() == "b" && flag.load(Ordering::SeqCst)));

    assert_eq!(pool.probe_now(), 2);
    assert!(!pool.node_by_alias("b").unwrap().is_alive());

    down.store(false, Ordering::SeqCst);
    assert_eq!(pool.probe_now(), 3);
    assert!(pool.node_by_alias("b").unwrap().is_alive());
}

#[test]
fn test_background_monitor_marks_node_dead() {
    let down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&down);
    let mut config = offline_config(&["a", "b"]);
    config.health_check_interval_ms = 20;

    let pool = Arc::new(
        NodePool::new(&config, None)
            .unwrap()
            .with_probe(move |node: &Node| !(node.alias() == "a" && flag.load(Ordering::SeqCst))),
    );
    pool.start().unwrap();

    let a = pool.node_by_alias("a").unwrap();
    assert!(a.is_alive());

    down.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(3), || !a.is_alive()));

    down.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(3), || a.is_alive()));

    pool.shutdown();
}

// =============================================================================
// PING Probe Tests
// =============================================================================

#[test]
fn test_ping_probe_against_server() {
    let server = MockServer::start();
    let config = ClientConfig::builder()
        .node(NodeConfig::new("live", server.addr()))
        .build();
    let pool = NodePool::new(&config, None).unwrap();
    let node = pool.node_by_alias("live").unwrap();

    let probe = PingProbe::new(SocketOptions::default(), Duration::from_millis(500));
    assert!(probe.probe(&node));
    assert_eq!(server.commands(), vec!["PING"]);
    // The probe uses its own socket, never the pool's
    assert_eq!(node.pool_stats().created, 0);

    server.stop();
    assert!(wait_until(Duration::from_secs(2), || !probe.probe(&node)));
}

#[test]
fn test_ping_probe_authenticates() {
    let server = MockServer::with_password("secret");
    let config = ClientConfig::builder()
        .node(NodeConfig::new("good", server.addr()).password("secret"))
        .node(NodeConfig::new("bad", server.addr()).password("wrong"))
        .build();
    let pool = NodePool::new(&config, None).unwrap();
    let probe = PingProbe::new(SocketOptions::default(), Duration::from_millis(500));

    assert!(probe.probe(&pool.node_by_alias("good").unwrap()));
    assert!(!probe.probe(&pool.node_by_alias("bad").unwrap()));
}
