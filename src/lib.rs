pub mod config;
pub mod message;
pub mod raft;
pub mod state_machine;
pub mod timing;
pub mod transport;

pub use config::ReplicaConfig;
pub use raft::Replica;
