//! End-to-end tests against in-process mock memcached servers.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use common::MockServer;
use spindle::{
    CasResponse, Client, ClientConfig, ConnectionObserver, Error, FailureMode, LocatorKind,
};

fn test_config() -> ClientConfig {
    ClientConfig {
        operation_timeout: Duration::from_secs(10),
        ..ClientConfig::default()
    }
}

fn client_for(servers: &[&MockServer]) -> Client {
    let addrs: Vec<SocketAddr> = servers.iter().map(|server| server.addr()).collect();
    Client::new(&addrs, test_config()).unwrap()
}

#[test]
fn set_then_get_round_trip() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(client.set("foo", 0, "bar").unwrap().wait(), Ok(true));
    let value = client.get("foo").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"bar");
    assert_eq!(value.flags, 0);
}

#[test]
fn get_miss_returns_none() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(client.get("never-stored").unwrap().wait(), Ok(None));
}

#[test]
fn flags_survive_the_round_trip() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    let data = spindle::CachedData {
        flags: 0xbeef,
        data: Bytes::from_static(b"typed"),
    };
    assert_eq!(client.set_data("typed-key", 0, &data).unwrap().wait(), Ok(true));
    let value = client.get("typed-key").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.flags, 0xbeef);
    assert_eq!(value.data.as_ref(), b"typed");
}

#[test]
fn add_and_replace_semantics() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(client.add("fresh", 0, "first").unwrap().wait(), Ok(true));
    assert_eq!(client.add("fresh", 0, "second").unwrap().wait(), Ok(false));
    assert_eq!(client.replace("fresh", 0, "third").unwrap().wait(), Ok(true));
    assert_eq!(
        client.replace("missing", 0, "nope").unwrap().wait(),
        Ok(false)
    );

    let value = client.get("fresh").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"third");
}

#[test]
fn append_and_prepend() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    client.set("concat", 0, "middle").unwrap().wait().unwrap();
    assert_eq!(client.append("concat", "-end").unwrap().wait(), Ok(true));
    assert_eq!(client.prepend("concat", "start-").unwrap().wait(), Ok(true));

    let value = client.get("concat").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"start-middle-end");

    assert_eq!(client.append("absent", "x").unwrap().wait(), Ok(false));
}

#[test]
fn delete_existing_and_missing() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    client.set("doomed", 0, "v").unwrap().wait().unwrap();
    assert_eq!(client.delete("doomed").unwrap().wait(), Ok(true));
    assert_eq!(client.delete("doomed").unwrap().wait(), Ok(false));
    assert_eq!(client.get("doomed").unwrap().wait(), Ok(None));
}

#[test]
fn cas_succeeds_then_detects_the_race() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    client.set("x", 0, "v1").unwrap().wait().unwrap();
    let first = client.gets("x").unwrap().wait().unwrap().unwrap();
    assert_eq!(first.value.data.as_ref(), b"v1");

    // Token still fresh: the swap lands.
    assert_eq!(
        client.cas("x", first.cas, 0, "v2").unwrap().wait(),
        Ok(CasResponse::Ok)
    );

    // Another writer bumps the version; the stale token loses.
    client.set("x", 0, "interloper").unwrap().wait().unwrap();
    assert_eq!(
        client.cas("x", first.cas, 0, "v3").unwrap().wait(),
        Ok(CasResponse::Exists)
    );

    assert_eq!(
        client.cas("ghost", 1, 0, "v").unwrap().wait(),
        Ok(CasResponse::NotFound)
    );
}

#[test]
fn incr_and_decr() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    client.set("counter", 0, "10").unwrap().wait().unwrap();
    assert_eq!(client.incr("counter", 5), Ok(15));
    assert_eq!(client.decr("counter", 3), Ok(12));
}

#[test]
fn incr_on_missing_key_returns_minus_one() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(client.incr("no-such-counter", 1), Ok(-1));
}

#[test]
fn incr_with_default_seeds_then_increments() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(client.incr_with_default("visits", 1, 10, 0), Ok(10));
    assert_eq!(client.incr_with_default("visits", 1, 10, 0), Ok(11));
}

#[test]
fn bulk_get_spans_nodes_and_omits_misses() {
    let one = MockServer::start();
    let two = MockServer::start();
    let client = client_for(&[&one, &two]);

    let keys: Vec<String> = (0..40).map(|i| format!("bulk:{i}")).collect();
    for key in &keys {
        client
            .set(key, 0, format!("value-{key}"))
            .unwrap()
            .wait()
            .unwrap();
    }

    let mut requested: Vec<&str> = keys.iter().map(String::as_str).collect();
    requested.push("bulk:never-stored");
    let map = client.get_bulk(&requested).unwrap().wait().unwrap();

    assert_eq!(map.len(), keys.len());
    for key in &keys {
        let value = &map[&Bytes::copy_from_slice(key.as_bytes())];
        assert_eq!(value.data.as_ref(), format!("value-{key}").as_bytes());
    }
    assert!(!map.contains_key(&Bytes::from_static(b"bulk:never-stored")));

    // With 40 ketama-routed keys both nodes end up holding some.
    assert!(one.item_count() > 0, "node one received no keys");
    assert!(two.item_count() > 0, "node two received no keys");
}

#[test]
fn per_node_completion_is_fifo() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    let sets: Vec<_> = (0..20)
        .map(|i| {
            client
                .set(format!("fifo:{i}"), 0, format!("{i}"))
                .unwrap()
        })
        .collect();
    let sentinel = client.get("fifo:19").unwrap();

    // The sentinel was submitted last on the same node, so once it
    // resolves every earlier operation must already have resolved.
    assert!(sentinel.wait().unwrap().is_some());
    for set in sets {
        assert!(set.is_done(), "earlier operation completed after later one");
    }
}

#[test]
fn values_larger_than_the_read_buffer_stream_through() {
    let server = MockServer::start();
    let addrs = [server.addr()];
    let config = ClientConfig {
        read_buf_size: 1024,
        write_buf_size: 1024,
        ..test_config()
    };
    let client = Client::new(&addrs, config).unwrap();

    let big = vec![b'z'; 100 * 1024];
    assert_eq!(
        client.set("big", 0, big.clone()).unwrap().wait(),
        Ok(true)
    );
    let value = client.get("big").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.len(), big.len());
    assert_eq!(value.data.as_ref(), &big[..]);
}

#[test]
fn full_ingress_queue_fails_fast() {
    let addrs = [MockServer::refused_addr()];
    let config = ClientConfig {
        op_queue_max: 0,
        ..test_config()
    };
    let client = Client::new(&addrs, config).unwrap();

    assert!(matches!(
        client.set("k", 0, "v"),
        Err(Error::QueueFull)
    ));
}

#[test]
fn cancel_mode_fails_operations_when_the_node_is_down() {
    let addrs = [MockServer::refused_addr()];
    let config = ClientConfig {
        failure_mode: FailureMode::Cancel,
        ..test_config()
    };
    let client = Client::new(&addrs, config).unwrap();

    let future = client.get("unreachable").unwrap();
    assert_eq!(
        future.wait_timeout(Duration::from_secs(5)),
        Err(Error::ConnectionLost)
    );
}

#[test]
fn retry_mode_replays_after_the_node_comes_back() {
    // Reserve a port, leave it closed, and only start the server after
    // the operation is already queued.
    let addr = MockServer::refused_addr();
    let addrs = [addr];
    let client = Client::new(&addrs, test_config()).unwrap();

    let future = client.set("replayed", 0, "survived").unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let _server = MockServer::start_on(addr).expect("rebind test port");

    assert_eq!(future.wait_timeout(Duration::from_secs(15)), Ok(true));
    let value = client.get("replayed").unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"survived");
}

#[test]
fn redistribute_mode_falls_back_to_a_live_node() {
    let live = MockServer::start();
    let dead_addr = MockServer::refused_addr();
    let addrs = [dead_addr, live.addr()];

    let (events_tx, events_rx) = mpsc::channel();
    struct Recorder(Mutex<mpsc::Sender<SocketAddr>>);
    impl ConnectionObserver for Recorder {
        fn connection_established(&self, addr: SocketAddr, _reconnect_count: u32) {
            let _ = self.0.lock().unwrap().send(addr);
        }
        fn connection_lost(&self, _addr: SocketAddr) {}
    }

    let config = ClientConfig {
        failure_mode: FailureMode::Redistribute,
        ..test_config()
    };
    let client =
        Client::with_observer(&addrs, config, Box::new(Recorder(Mutex::new(events_tx)))).unwrap();

    // Wait until the live node is connected.
    let established = events_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(established, live.addr());

    // Pick a key whose primary is the dead node.
    let locator = client.node_locator();
    let key = (0..10_000)
        .map(|i| format!("fallback:{i}"))
        .find(|key| locator.primary(key.as_bytes()) == 0)
        .expect("some key must map to the dead node");

    assert_eq!(client.set(&key, 0, "rerouted").unwrap().wait(), Ok(true));
    let value = client.get(&key).unwrap().wait().unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"rerouted");
    assert!(live.item_count() > 0);
}

#[test]
fn version_and_stats_fan_out_to_every_node() {
    let one = MockServer::start();
    let two = MockServer::start();
    let client = client_for(&[&one, &two]);

    let versions = client.version().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[&one.addr()], "1.6.0-mock");
    assert_eq!(versions[&two.addr()], "1.6.0-mock");

    client.set("stat-seed", 0, "v").unwrap().wait().unwrap();
    let stats = client.stats(None).unwrap();
    assert_eq!(stats.len(), 2);
    for addr in [one.addr(), two.addr()] {
        assert_eq!(stats[&addr]["pid"], "1");
        assert!(stats[&addr].contains_key("curr_items"));
    }
}

#[test]
fn flush_clears_every_node() {
    let one = MockServer::start();
    let two = MockServer::start();
    let client = client_for(&[&one, &two]);

    for i in 0..10 {
        client
            .set(format!("flush:{i}"), 0, "v")
            .unwrap()
            .wait()
            .unwrap();
    }
    assert_eq!(client.flush(None).unwrap().wait(), Ok(true));
    assert_eq!(one.item_count() + two.item_count(), 0);
    assert_eq!(client.get("flush:0").unwrap().wait(), Ok(None));
}

#[test]
fn wait_for_queues_round_trips_every_node() {
    let one = MockServer::start();
    let two = MockServer::start();
    let client = client_for(&[&one, &two]);

    assert!(client.wait_for_queues(Duration::from_secs(5)));
}

#[test]
fn server_errors_carry_the_message_verbatim() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert_eq!(
        client.set("__error__key", 0, "v").unwrap().wait(),
        Err(Error::Server("boom".into()))
    );
}

#[test]
fn cancelling_a_future_resolves_it_immediately() {
    let addrs = [MockServer::refused_addr()];
    let client = Client::new(&addrs, test_config()).unwrap();

    let future = client.get("whatever").unwrap();
    future.cancel();
    assert_eq!(future.wait(), Err(Error::Cancelled));
}

#[test]
fn invalid_keys_fail_synchronously() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    assert!(matches!(
        client.get("bad key"),
        Err(Error::InvalidKey(_))
    ));
    assert!(matches!(
        client.set("", 0, "v"),
        Err(Error::InvalidKey(_))
    ));
    assert!(matches!(
        client.delete("a".repeat(251)),
        Err(Error::InvalidKey(_))
    ));
}

#[test]
fn shutdown_rejects_later_submissions() {
    let server = MockServer::start();
    let client = client_for(&[&server]);

    client.set("pre", 0, "v").unwrap().wait().unwrap();
    client.shutdown();
    assert!(matches!(client.set("post", 0, "v"), Err(Error::Shutdown)));
}

#[test]
fn array_locator_round_trips_too() {
    let one = MockServer::start();
    let two = MockServer::start();
    let addrs = [one.addr(), two.addr()];
    let config = ClientConfig {
        locator: LocatorKind::Array,
        hash_alg: spindle::HashAlg::Native,
        ..test_config()
    };
    let client = Client::new(&addrs, config).unwrap();

    for i in 0..20 {
        let key = format!("array:{i}");
        client.set(&key, 0, format!("{i}")).unwrap().wait().unwrap();
        let value = client.get(&key).unwrap().wait().unwrap().unwrap();
        assert_eq!(value.data.as_ref(), format!("{i}").as_bytes());
    }
}
