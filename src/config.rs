//! CLI parsing into a validated `ReplicaConfig`.

use anyhow::{bail, Result};
use clap::Parser;

use crate::message::ReplicaId;
use crate::timing::Timing;

/// `<program> <port> <id> <peer_id>...`
#[derive(Parser, Debug)]
#[command(
    name = "replica",
    about = "A single Raft replica in a fixed-membership key-value cluster"
)]
struct Cli {
    /// Port of the relay/simulator this replica sends all outbound datagrams to.
    port: u16,

    /// This replica's own id.
    id: String,

    /// Ids of every other replica in the cluster.
    #[arg(required = true, num_args = 1..)]
    peers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub relay_port: u16,
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
    pub timing: Timing,
}

impl ReplicaConfig {
    /// Parse `std::env::args()`, validating the result.
    pub fn from_args() -> Result<Self> {
        let cli = Cli::parse();
        Self::from_parts(cli.port, cli.id, cli.peers)
    }

    fn from_parts(relay_port: u16, id: String, peers: Vec<String>) -> Result<Self> {
        if id.is_empty() {
            bail!("replica id must not be empty");
        }
        if peers.iter().any(|p| p == &id) {
            bail!("replica id {:?} must not also appear in the peer list", id);
        }
        let mut seen = std::collections::HashSet::new();
        for p in &peers {
            if !seen.insert(p) {
                bail!("duplicate peer id {:?}", p);
            }
        }

        Ok(ReplicaConfig {
            relay_port,
            id,
            peers,
            timing: Timing::default(),
        })
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}
