//! Entry point: one replica, one UDP socket, one thread.
//!
//! The event loop is deliberately simple and synchronous (no tokio, no
//! background threads, no locks): apply whatever just got committed, wait up
//! to 200ms for a single datagram, dispatch it if one arrived, then run the
//! role-appropriate per-tick maintenance.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info};

use raft_kvstore::config::ReplicaConfig;
use raft_kvstore::raft::Replica;
use raft_kvstore::transport::{Transport, UdpTransport};

fn main() -> ExitCode {
    env_logger::init();

    let config = match ReplicaConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let relay_addr: SocketAddr = match format!("127.0.0.1:{}", config.relay_port).parse() {
        Ok(a) => a,
        Err(e) => {
            error!("invalid relay port {}: {}", config.relay_port, e);
            return ExitCode::FAILURE;
        }
    };

    let transport = match UdpTransport::bind(relay_addr) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to start transport: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        }) {
            error!("failed to install shutdown handler: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let now = Instant::now();
    let mut replica = Replica::new(&config, now);
    info!(
        "{}: starting with peers {:?}, relaying through {}",
        replica.id(),
        config.peers,
        relay_addr
    );
    replica.announce(&transport);

    run_event_loop(&mut replica, &transport, &shutdown);

    info!("{}: shutting down", replica.id());
    ExitCode::SUCCESS
}

/// The main loop body, pulled out so it's independently testable without
/// needing a real signal handler wired up.
fn run_event_loop(replica: &mut Replica, transport: &dyn Transport, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        replica.apply_committed(transport);
        let now = Instant::now();
        if let Some(envelope) = transport.recv_timeout(replica.timing().event_loop_wait) {
            replica.on_message(transport, now, envelope);
        }
        replica.on_tick(transport, Instant::now());
    }
}
