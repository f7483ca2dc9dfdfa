//! Client Tests
//!
//! End-to-end tests of the typed client against in-process mock nodes.
//!
//! These tests verify:
//! - Typed commands and their reply conversions
//! - Multi-key commands split across nodes (DEL, MGET, MSET)
//! - Node scopes, sessions and lazy SELECT
//! - Key transformation
//! - Pipelines, transactions and aggregated stats

#[path = "../common/mod.rs"]
mod common;

use std::thread;

use bytes::Bytes;
use kvring::{
    Batch, Client, ClientConfig, KvError, NodeConfig, PrefixKeyTransformer, Reply,
    Sha256KeyTransformer, StatItem, StatsTarget,
};

use common::{config_for, key_on, MockServer};

// =============================================================================
// Helper Functions
// =============================================================================

fn cluster(count: usize) -> (Vec<MockServer>, Client) {
    let servers: Vec<MockServer> = (0..count).map(|_| MockServer::start()).collect();
    let refs: Vec<&MockServer> = servers.iter().collect();
    let client = Client::new(config_for(&refs)).unwrap();
    (servers, client)
}

fn bytes(values: &[&str]) -> Vec<Bytes> {
    values.iter().map(|v| Bytes::copy_from_slice(v.as_bytes())).collect()
}

fn sorted(mut values: Vec<Bytes>) -> Vec<Bytes> {
    values.sort();
    values
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_no_socket_until_first_command() {
    let (servers, mut client) = cluster(2);
    assert!(servers.iter().all(|s| s.connections() == 0));

    client.set("k", "v").unwrap();
    let opened: usize = servers.iter().map(|s| s.connections()).sum();
    assert_eq!(opened, 1);
}

#[test]
fn test_rejects_empty_config() {
    assert!(matches!(
        Client::new(ClientConfig::default()),
        Err(KvError::Config(_))
    ));
}

#[test]
fn test_password_sent_per_node() {
    let server = MockServer::with_password("hunter2");
    let config = ClientConfig::builder()
        .node(NodeConfig::new("secure", server.addr()).password("hunter2"))
        .build();
    let mut client = Client::new(config).unwrap();

    client.set("k", "v").unwrap();
    assert_eq!(client.get("k").unwrap(), Some(Bytes::from_static(b"v")));
    assert_eq!(server.commands(), vec!["AUTH", "SET", "GET"]);
}

// =============================================================================
// String Tests
// =============================================================================

#[test]
fn test_string_commands() {
    let (_servers, mut client) = cluster(3);

    assert_eq!(client.get("missing").unwrap(), None);
    client.set("name", "kv").unwrap();
    assert_eq!(client.get("name").unwrap(), Some(Bytes::from_static(b"kv")));

    assert!(!client.set_nx("name", "other").unwrap());
    assert!(client.set_nx("fresh", "1").unwrap());

    assert_eq!(
        client.get_set("name", "ring").unwrap(),
        Some(Bytes::from_static(b"kv"))
    );
    assert_eq!(client.append("name", "!").unwrap(), 5);
    assert_eq!(client.get("name").unwrap(), Some(Bytes::from_static(b"ring!")));
}

#[test]
fn test_empty_value_is_not_null() {
    let (_servers, mut client) = cluster(1);
    client.set("empty", "").unwrap();
    assert_eq!(client.get("empty").unwrap(), Some(Bytes::new()));
}

#[test]
fn test_binary_keys_and_values() {
    let (_servers, mut client) = cluster(2);
    let key: &[u8] = b"bin\x00\r\nkey";
    let value: &[u8] = b"\xff\xfe\r\n\x00";

    client.set(key, value).unwrap();
    assert_eq!(client.get(key).unwrap().as_deref(), Some(value));
}

#[test]
fn test_counters() {
    let (_servers, mut client) = cluster(2);

    assert_eq!(client.incr("hits").unwrap(), 1);
    assert_eq!(client.incr_by("hits", 10).unwrap(), 11);
    assert_eq!(client.decr("hits").unwrap(), 10);
    assert_eq!(client.decr_by("hits", 15).unwrap(), -5);

    client.set("text", "abc").unwrap();
    match client.incr("text") {
        Err(err) => assert!(matches!(err.root(), KvError::Server(_))),
        Ok(value) => panic!("expected server error, got {}", value),
    }
}

// =============================================================================
// Keyspace Tests
// =============================================================================

#[test]
fn test_keyspace_commands() {
    let (_servers, mut client) = cluster(2);

    client.set("k", "v").unwrap();
    assert!(client.exists("k").unwrap());
    assert!(!client.exists("nope").unwrap());
    assert_eq!(client.key_type("k").unwrap(), "string");
    assert_eq!(client.key_type("nope").unwrap(), "none");

    assert!(client.expire("k", 60).unwrap());
    assert!(!client.expire("nope", 60).unwrap());
    assert_eq!(client.ttl("nope").unwrap(), -2);
}

#[test]
fn test_del_spans_nodes() {
    let (servers, mut client) = cluster(2);
    let a = key_on(&client, "n0", "a");
    let b = key_on(&client, "n1", "b");

    client.set(&a, "1").unwrap();
    client.set(&b, "2").unwrap();
    assert_eq!(client.del([&a, &b, &"missing".to_string()]).unwrap(), 2);
    assert_eq!(servers[0].count("DEL") + servers[1].count("DEL"), 2);
    assert!(!client.exists(&a).unwrap());
    assert!(!client.exists(&b).unwrap());
}

#[test]
fn test_keys_broadcast() {
    let (_servers, mut client) = cluster(3);
    for i in 0..20 {
        client.set(format!("user:{}", i), "x").unwrap();
    }
    client.set("other", "x").unwrap();

    let found = client.keys("user:*").unwrap();
    assert_eq!(found.len(), 20);
    assert_eq!(client.dbsize().unwrap(), 21);
}

#[test]
fn test_rename_same_node_only() {
    let (servers, mut client) = cluster(2);
    let a = key_on(&client, "n0", "a");
    let a2 = key_on(&client, "n0", "c");
    let b = key_on(&client, "n1", "b");

    client.set(&a, "v").unwrap();
    client.rename(&a, &a2).unwrap();
    assert_eq!(client.get(&a2).unwrap(), Some(Bytes::from_static(b"v")));

    let before = servers[0].log().len() + servers[1].log().len();
    assert!(matches!(client.rename(&a2, &b), Err(KvError::Clustering { .. })));
    assert!(matches!(client.rename_nx(&a2, &b), Err(KvError::Clustering { .. })));
    assert_eq!(servers[0].log().len() + servers[1].log().len(), before);
}

// =============================================================================
// Multi-Key Split Tests
// =============================================================================

#[test]
fn test_mget_merges_in_request_order() {
    let (_servers, mut client) = cluster(3);
    let a = key_on(&client, "n0", "a");
    let b = key_on(&client, "n1", "b");
    let c = key_on(&client, "n2", "c");

    client.set(&a, "A").unwrap();
    client.set(&c, "C").unwrap();

    let values = client.mget([&c, &b, &a]).unwrap();
    assert_eq!(
        values,
        vec![Some(Bytes::from_static(b"C")), None, Some(Bytes::from_static(b"A"))]
    );
}

#[test]
fn test_mset_one_command_per_node() {
    let (servers, mut client) = cluster(2);
    let pairs: Vec<(String, String)> = (0..10)
        .map(|i| (format!("key{}", i), format!("value{}", i)))
        .collect();

    client.mset(pairs.iter().map(|(k, v)| (k, v))).unwrap();

    for server in &servers {
        assert!(server.count("MSET") <= 1);
    }
    let total = servers[0].key_count(0) + servers[1].key_count(0);
    assert_eq!(total, 10);

    let keys: Vec<&String> = pairs.iter().map(|(k, _)| k).collect();
    let values = client.mget(&keys).unwrap();
    for ((_, expected), value) in pairs.iter().zip(values) {
        assert_eq!(value.as_deref(), Some(expected.as_bytes()));
    }
}

#[test]
fn test_mset_nx_requires_one_node() {
    let (_servers, mut client) = cluster(2);
    let a = key_on(&client, "n0", "a");
    let a2 = key_on(&client, "n0", "x");
    let b = key_on(&client, "n1", "b");

    assert!(client.mset_nx([(&a, "1"), (&a2, "2")]).unwrap());
    assert!(!client.mset_nx([(&a, "3"), (&a2, "4")]).unwrap());
    assert!(matches!(
        client.mset_nx([(&a, "1"), (&b, "2")]),
        Err(KvError::Clustering { .. })
    ));
}

// =============================================================================
// List and Set Tests
// =============================================================================

#[test]
fn test_list_commands() {
    let (_servers, mut client) = cluster(2);

    assert_eq!(client.rpush("queue", "b").unwrap(), 1);
    assert_eq!(client.rpush("queue", "c").unwrap(), 2);
    assert_eq!(client.lpush("queue", "a").unwrap(), 3);
    assert_eq!(client.llen("queue").unwrap(), 3);
    assert_eq!(client.lrange("queue", 0, -1).unwrap(), bytes(&["a", "b", "c"]));

    assert_eq!(client.lpop("queue").unwrap(), Some(Bytes::from_static(b"a")));
    assert_eq!(client.rpop("queue").unwrap(), Some(Bytes::from_static(b"c")));
    assert_eq!(client.lpop("empty").unwrap(), None);
}

#[test]
fn test_rpoplpush_colocated() {
    let (_servers, mut client) = cluster(2);
    let src = key_on(&client, "n1", "src");
    let dst = key_on(&client, "n1", "dst");
    let far = key_on(&client, "n0", "far");

    client.rpush(&src, "x").unwrap();
    assert_eq!(
        client.rpoplpush(&src, &dst).unwrap(),
        Some(Bytes::from_static(b"x"))
    );
    assert_eq!(client.llen(&dst).unwrap(), 1);
    assert!(matches!(
        client.rpoplpush(&dst, &far),
        Err(KvError::Clustering { .. })
    ));
}

#[test]
fn test_set_commands() {
    let (_servers, mut client) = cluster(2);
    let s1 = key_on(&client, "n0", "s");
    let s2 = key_on(&client, "n0", "t");
    let dest = key_on(&client, "n0", "d");

    assert!(client.sadd(&s1, "a").unwrap());
    assert!(!client.sadd(&s1, "a").unwrap());
    client.sadd(&s1, "b").unwrap();
    client.sadd(&s2, "b").unwrap();
    client.sadd(&s2, "c").unwrap();

    assert_eq!(client.scard(&s1).unwrap(), 2);
    assert!(client.sismember(&s1, "a").unwrap());
    assert_eq!(sorted(client.smembers(&s1).unwrap()), bytes(&["a", "b"]));

    assert_eq!(client.sinter([&s1, &s2]).unwrap(), bytes(&["b"]));
    assert_eq!(sorted(client.sunion([&s1, &s2]).unwrap()), bytes(&["a", "b", "c"]));
    assert_eq!(client.sdiff([&s1, &s2]).unwrap(), bytes(&["a"]));

    assert_eq!(client.sunionstore(&dest, [&s1, &s2]).unwrap(), 3);
    assert_eq!(client.sinterstore(&dest, [&s1, &s2]).unwrap(), 1);
    assert_eq!(client.sdiffstore(&dest, [&s1, &s2]).unwrap(), 1);

    assert!(client.smove(&s1, &s2, "a").unwrap());
    assert!(!client.srem(&s1, "a").unwrap());
    assert_eq!(client.scard(&s2).unwrap(), 3);
}

#[test]
fn test_set_ops_across_nodes_refused() {
    let (_servers, mut client) = cluster(2);
    let a = key_on(&client, "n0", "a");
    let b = key_on(&client, "n1", "b");

    assert!(matches!(client.sinter([&a, &b]), Err(KvError::Clustering { .. })));
    assert!(matches!(client.sunionstore(&a, [&b]), Err(KvError::Clustering { .. })));
    assert!(matches!(client.smove(&a, &b, "m"), Err(KvError::Clustering { .. })));
}

// =============================================================================
// Scope and Session Tests
// =============================================================================

#[test]
fn test_node_scope_pins_and_restores() {
    let (servers, mut client) = cluster(2);
    let b = key_on(&client, "n1", "b");

    {
        let mut scope = client.on("n0").unwrap();
        scope.set(&b, "pinned").unwrap();
        assert_eq!(scope.node_for_key(&b).unwrap().alias(), "n0");
        assert_eq!(scope.dbsize().unwrap(), 1);
    }

    assert_eq!(client.node_for_key(&b).unwrap().alias(), "n1");
    assert_eq!(client.get(&b).unwrap(), None);
    assert_eq!(servers[0].get(0, b.as_bytes()), Some(b"pinned".to_vec()));
}

#[test]
fn test_nested_scopes() {
    let (_servers, mut client) = cluster(2);

    let mut outer = client.on("n1").unwrap();
    {
        let inner = outer.on("n0").unwrap();
        assert_eq!(inner.node_for_key("x").unwrap().alias(), "n0");
    }
    assert_eq!(outer.node_for_key("x").unwrap().alias(), "n1");
}

#[test]
fn test_unknown_alias() {
    let (_servers, mut client) = cluster(1);
    assert!(matches!(client.on("nope"), Err(KvError::Config(_))));
}

#[test]
fn test_select_is_lazy() {
    let (servers, mut client) = cluster(1);

    client.select(5).unwrap();
    assert_eq!(client.db(), 5);
    assert_eq!(servers[0].connections(), 0);

    client.set("k", "v").unwrap();
    client.get("k").unwrap();
    assert_eq!(servers[0].commands(), vec!["SELECT", "SET", "GET"]);
    assert_eq!(servers[0].get(5, b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_default_db_from_config() {
    let server = MockServer::start();
    let mut config = config_for(&[&server]);
    config.default_db = 2;
    let mut client = Client::new(config).unwrap();

    client.set("k", "v").unwrap();
    assert_eq!(server.get(2, b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_clone_is_independent_session() {
    let (servers, mut client) = cluster(1);
    client.select(1).unwrap();

    let mut other = client.clone();
    assert_eq!(other.db(), 1);
    other.select(2).unwrap();
    assert_eq!(client.db(), 1);

    let worker = thread::spawn(move || {
        other.set("from-thread", "yes").unwrap();
    });
    worker.join().unwrap();

    client.set("from-main", "yes").unwrap();
    assert_eq!(servers[0].get(2, b"from-thread"), Some(b"yes".to_vec()));
    assert_eq!(servers[0].get(1, b"from-main"), Some(b"yes".to_vec()));
}

#[test]
fn test_pipeline_state_not_shared_with_clone() {
    let (_servers, mut client) = cluster(1);
    let mut other = client.clone();

    let mut pipe = client.pipeline().unwrap();
    pipe.set("queued", "1").unwrap();
    // The other session still runs directly
    other.set("direct", "1").unwrap();
    assert_eq!(other.get("queued").unwrap(), None);
    pipe.flush().unwrap();
    assert_eq!(other.get("queued").unwrap(), Some(Bytes::from_static(b"1")));
}

// =============================================================================
// Key Transformer Tests
// =============================================================================

#[test]
fn test_prefix_transformer() {
    let server = MockServer::start();
    let mut client =
        Client::with_key_transformer(config_for(&[&server]), PrefixKeyTransformer::new("app:"))
            .unwrap();

    client.set("user", "1").unwrap();
    client.mset([("a", "1"), ("b", "2")]).unwrap();
    assert_eq!(server.get(0, b"app:user"), Some(b"1".to_vec()));
    assert_eq!(server.get(0, b"app:a"), Some(b"1".to_vec()));
    assert_eq!(server.get(0, b"user"), None);
    assert_eq!(client.get("user").unwrap(), Some(Bytes::from_static(b"1")));
}

#[test]
fn test_digest_transformer_routes_by_digest() {
    let s0 = MockServer::start();
    let s1 = MockServer::start();
    let mut client =
        Client::with_key_transformer(config_for(&[&s0, &s1]), Sha256KeyTransformer).unwrap();

    client.set("hello", "world").unwrap();
    let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    let stored = s0.get(0, digest.as_bytes()).or_else(|| s1.get(0, digest.as_bytes()));
    assert_eq!(stored, Some(b"world".to_vec()));
}

#[test]
fn test_closure_transformer() {
    let server = MockServer::start();
    let mut client = Client::with_key_transformer(config_for(&[&server]), |key: &[u8]| {
        Bytes::from(key.to_ascii_uppercase())
    })
    .unwrap();

    client.set("shout", "x").unwrap();
    assert_eq!(server.get(0, b"SHOUT"), Some(b"x".to_vec()));
}

// =============================================================================
// Pipeline and Transaction Tests
// =============================================================================

#[test]
fn test_pipeline_builders() {
    let (_servers, mut client) = cluster(2);

    let mut pipe = client.pipeline().unwrap();
    pipe.set("k1", "v1").unwrap().incr("counter").unwrap().get("k1").unwrap();
    assert_eq!(pipe.len(), 3);

    let replies = pipe.flush().unwrap();
    assert_eq!(replies[0].as_ref().unwrap(), &Reply::ok());
    assert_eq!(replies[1].as_ref().unwrap(), &Reply::Integer(1));
    assert_eq!(replies[2].as_ref().unwrap(), &Reply::bulk("v1"));
}

#[test]
fn test_dropped_pipeline_discards() {
    let (servers, mut client) = cluster(1);
    {
        let mut pipe = client.pipeline().unwrap();
        pipe.set("lost", "1").unwrap();
    }

    assert_eq!(servers[0].connections(), 0);
    // Back in direct mode
    client.set("kept", "1").unwrap();
    assert_eq!(client.get("lost").unwrap(), None);
}

#[test]
fn test_pipeline_rejects_clustered_command_at_enqueue() {
    let (_servers, mut client) = cluster(2);
    let a = key_on(&client, "n0", "a");
    let b = key_on(&client, "n1", "b");

    let mut pipe = client.pipeline().unwrap();
    pipe.set(&a, "1").unwrap();
    assert!(matches!(
        pipe.push(kvring::Command::rename(&a, &b)),
        Err(KvError::Clustering { .. })
    ));
    assert_eq!(pipe.len(), 1);
    assert_eq!(pipe.flush().unwrap().len(), 1);
}

#[test]
fn test_transaction_via_client() {
    let (servers, mut client) = cluster(2);
    let a = key_on(&client, "n1", "acct");

    let mut tx = client.transaction().unwrap();
    tx.watch([&a]).unwrap();
    tx.incr_by(&a, 100).unwrap().decr(&a).unwrap();
    let results = tx.commit().unwrap();

    assert_eq!(results[0].as_ref().unwrap(), &Reply::Integer(100));
    assert_eq!(results[1].as_ref().unwrap(), &Reply::Integer(99));
    assert_eq!(servers[1].commands(), vec!["WATCH", "MULTI", "INCRBY", "DECR", "EXEC"]);
    assert_eq!(servers[0].connections(), 0);
}

#[test]
fn test_dropped_transaction_aborts() {
    let (servers, mut client) = cluster(1);
    {
        let mut tx = client.transaction().unwrap();
        tx.watch(["k"]).unwrap();
        tx.set("k", "v").unwrap();
    }

    assert_eq!(servers[0].commands(), vec!["WATCH", "UNWATCH"]);
    assert!(client.transaction().is_ok());
}

#[test]
fn test_transaction_abort_after_watch_conflict() {
    let (servers, mut client) = cluster(1);

    let mut tx = client.transaction().unwrap();
    tx.watch(["k"]).unwrap();
    tx.set("k", "mine").unwrap();
    servers[0].abort_next_exec();

    let err = tx.commit().unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, KvError::TransactionAborted));
    assert_eq!(client.get("k").unwrap(), None);
}

// =============================================================================
// Server Command Tests
// =============================================================================

#[test]
fn test_ping_and_echo() {
    let (servers, mut client) = cluster(3);

    client.ping().unwrap();
    for server in &servers {
        assert_eq!(server.count("PING"), 1);
    }
    assert_eq!(client.echo("hi").unwrap(), Bytes::from_static(b"hi"));
}

#[test]
fn test_flushdb_hits_every_node() {
    let (servers, mut client) = cluster(2);
    for i in 0..10 {
        client.set(format!("k{}", i), "v").unwrap();
    }

    client.flushdb().unwrap();
    assert_eq!(client.dbsize().unwrap(), 0);
    assert!(servers.iter().all(|s| s.count("FLUSHDB") == 1));
}

#[test]
fn test_dead_node_skipped_by_broadcast() {
    let (servers, mut client) = cluster(2);
    let n1 = client.node_by_alias("n1").unwrap();
    client.pool().set_alive(&n1, false);

    client.ping().unwrap();
    assert_eq!(servers[0].count("PING"), 1);
    assert_eq!(servers[1].count("PING"), 0);
    // Every key now routes to the survivor
    assert_eq!(client.node_for_key("anything").unwrap().alias(), "n0");
}

#[test]
fn test_info_and_stats() {
    let (servers, mut client) = cluster(2);
    servers[1].set_version("2.6.0");
    client.set("k", "v").unwrap();

    let info = client.info().unwrap();
    let aliases: Vec<&str> = info.iter().map(|(alias, _)| alias.as_str()).collect();
    assert_eq!(aliases, vec!["n0", "n1"]);
    assert!(info[0].1.contains("redis_version:2.0.0"));

    let stats = client.stats().unwrap();
    assert_eq!(stats.value(StatsTarget::All, StatItem::ConnectedClients).unwrap(), 2);
    assert_eq!(stats.version("n1").unwrap(), "2.6.0");
    assert_eq!(stats.uptime("n0").unwrap().as_secs(), 42);
    assert!(stats.value(StatsTarget::All, StatItem::Version).is_err());
    assert!(stats.value(StatsTarget::Node("nope"), StatItem::Uptime).is_err());
}

#[test]
fn test_custom_command_needs_pin() {
    let (_servers, mut client) = cluster(1);

    assert!(matches!(
        client.command(kvring::Command::custom("dbsize", Vec::<&str>::new())),
        Err(KvError::InvalidState(_))
    ));

    let mut scope = client.on("n0").unwrap();
    let reply = scope
        .command(kvring::Command::custom("dbsize", Vec::<&str>::new()))
        .unwrap();
    assert_eq!(reply, Reply::Integer(0));
}
