//! End-to-end cluster scenarios driven entirely through `ChannelTransport`,
//! each replica running its own thread with the same tick/message loop the
//! production binary uses, at test-scaled timing.
//!
//! Run with `cargo test --features test-support` — `Timing::scaled_for_tests`
//! is only compiled in under that feature (or `cfg(test)` inside the crate
//! itself, which doesn't apply to this external test binary).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use raft_kvstore::config::ReplicaConfig;
use raft_kvstore::message::{Body, Envelope};
use raft_kvstore::raft::Replica;
use raft_kvstore::timing::Timing;
use raft_kvstore::transport::{ChannelTransport, Transport};

const REPLICAS: &[&str] = &["N1", "N2", "N3"];
const CLIENT: &str = "C1";

fn run_replica(
    mut replica: Replica,
    transport: ChannelTransport,
    shutdown: Arc<AtomicBool>,
) -> Replica {
    while !shutdown.load(Ordering::Relaxed) {
        replica.apply_committed(&transport);
        let now = Instant::now();
        if let Some(envelope) = transport.recv_timeout(Duration::from_millis(3)) {
            replica.on_message(&transport, now, envelope);
        }
        replica.on_tick(&transport, Instant::now());
    }
    replica
}

/// Spin up one thread per replica id in `REPLICAS`, wired together through a
/// `ChannelTransport` cluster that also includes a bare client transport.
/// Returns the client's own transport plus a handle to stop and collect the
/// final replica states.
struct RunningCluster {
    client: ChannelTransport,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<Replica>>,
}

impl RunningCluster {
    fn spawn() -> Self {
        let mut ids: Vec<String> = REPLICAS.iter().map(|s| s.to_string()).collect();
        ids.push(CLIENT.to_string());
        let mut transports = ChannelTransport::cluster(&ids);
        let client = transports.remove(CLIENT).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();
        for &id in REPLICAS {
            let peers: Vec<String> = REPLICAS
                .iter()
                .copied()
                .filter(|&p| p != id)
                .map(|s| s.to_string())
                .collect();
            let config = ReplicaConfig {
                relay_port: 0,
                id: id.to_string(),
                peers,
                timing: Timing::scaled_for_tests(),
            };
            let transport = transports.remove(id).unwrap();
            let replica = Replica::new(&config, Instant::now());
            let shutdown = shutdown.clone();
            handles.push(thread::spawn(move || run_replica(replica, transport, shutdown)));
        }

        RunningCluster {
            client,
            shutdown,
            handles,
        }
    }

    fn stop_and_join(self) -> Vec<Replica> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handles.into_iter().map(|h| h.join().unwrap()).collect()
    }
}

/// A few election-timeout periods at test scale (30-60ms), enough for one
/// candidate to win even with a split vote on the first round.
fn election_window() -> Duration {
    Duration::from_millis(400)
}

#[test]
fn eventually_elects_exactly_one_leader() {
    let cluster = RunningCluster::spawn();
    thread::sleep(election_window());
    let replicas = cluster.stop_and_join();

    let leaders = replicas.iter().filter(|r| r.is_leader()).count();
    assert_eq!(leaders, 1, "exactly one replica should have become leader");
}

#[test]
fn all_replicas_agree_on_current_term_after_election() {
    let cluster = RunningCluster::spawn();
    thread::sleep(election_window());
    let replicas = cluster.stop_and_join();

    let term = replicas[0].current_term();
    assert!(term >= 1, "an election must bump the term at least once");
    for r in &replicas {
        assert_eq!(r.current_term(), term, "a stray replica is stuck on a stale term");
    }
}

/// Wait up to `timeout` for an `ok` reply to `mid` on `client`, ignoring any
/// `redirect`s a follower sends in the meantime.
fn wait_for_ok(client: &ChannelTransport, mid: &str, timeout: Duration) -> Option<Envelope> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(env) = client.recv_timeout(Duration::from_millis(50)) {
            if let Body::Ok { mid: got, .. } = &env.body {
                if got == mid {
                    return Some(env);
                }
            }
        }
    }
    None
}

#[test]
fn client_put_is_committed_and_applied_across_the_cluster() {
    let cluster = RunningCluster::spawn();
    thread::sleep(election_window());

    cluster.client.send(&Envelope::new(
        CLIENT.to_string(),
        "FFFF".to_string(),
        "FFFF".to_string(),
        Body::Put {
            mid: "put-1".to_string(),
            key: "x".to_string(),
            value: "42".to_string(),
        },
    ));

    let reply = wait_for_ok(&cluster.client, "put-1", Duration::from_millis(500));
    assert!(reply.is_some(), "client never received an ok for its put");

    // A little more settling time for the followers to catch up and apply.
    thread::sleep(Duration::from_millis(150));
    let replicas = cluster.stop_and_join();

    for r in &replicas {
        assert_eq!(
            r.state_machine().get("x"),
            "42",
            "replica {} never applied the committed write",
            r.id()
        );
    }
}

#[test]
fn client_get_reads_back_a_committed_value() {
    let cluster = RunningCluster::spawn();
    thread::sleep(election_window());

    cluster.client.send(&Envelope::new(
        CLIENT.to_string(),
        "FFFF".to_string(),
        "FFFF".to_string(),
        Body::Put {
            mid: "put-2".to_string(),
            key: "y".to_string(),
            value: "hello".to_string(),
        },
    ));

    let reply = wait_for_ok(&cluster.client, "put-2", Duration::from_millis(500))
        .expect("client never received an ok for its put");
    let leader = reply.leader;

    cluster.client.send(&Envelope::new(
        CLIENT.to_string(),
        leader,
        "FFFF".to_string(),
        Body::Get {
            mid: "get-1".to_string(),
            key: "y".to_string(),
        },
    ));

    let mut value = None;
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        if let Some(env) = cluster.client.recv_timeout(Duration::from_millis(50)) {
            if let Body::Ok { mid, value: v } = env.body {
                if mid == "get-1" {
                    value = v;
                    break;
                }
            }
        }
    }

    cluster.stop_and_join();
    assert_eq!(value.as_deref(), Some("hello"));
}

/// A client write sent before any leader has emerged gets redirected rather
/// than silently dropped: followers/candidates answer client writes with
/// `redirect`.
#[test]
fn early_write_before_election_gets_redirected_or_eventually_applied() {
    let cluster = RunningCluster::spawn();

    cluster.client.send(&Envelope::new(
        CLIENT.to_string(),
        "FFFF".to_string(),
        "FFFF".to_string(),
        Body::Put {
            mid: "put-early".to_string(),
            key: "z".to_string(),
            value: "1".to_string(),
        },
    ));

    let mut saw_redirect = false;
    let mut saw_ok = false;
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline && !(saw_redirect || saw_ok) {
        if let Some(env) = cluster.client.recv_timeout(Duration::from_millis(50)) {
            match env.body {
                Body::Redirect { .. } => saw_redirect = true,
                Body::Ok { .. } => saw_ok = true,
                _ => {}
            }
        }
    }

    cluster.stop_and_join();
    assert!(
        saw_redirect || saw_ok,
        "client got neither a redirect nor an ok for a write racing the first election"
    );
}
