//! Advancing `last_applied` toward `commit_index` and mutating the state
//! machine, plus acking the originating client once its write lands here.

use log::debug;

use super::{Replica, Role};
use crate::message::Body;
use crate::transport::Transport;

/// Apply every log entry between `last_applied` and `commit_index`, in
/// order. Run on every tick, before any role-specific work.
pub(super) fn apply_committed(replica: &mut Replica, transport: &dyn Transport) {
    while replica.last_applied < replica.commit_index {
        let index = replica.last_applied + 1;
        let entry = replica
            .log
            .get((index - 1) as usize)
            .expect("commit_index must never exceed the length of the local log")
            .clone();

        replica.state_machine.set(entry.key.clone(), entry.value.clone());
        replica.last_applied = index;
        debug!(
            "{}: applied index {} ({} = {})",
            replica.id, index, entry.key, entry.value
        );

        // Only the leader that accepted this write still has a client
        // waiting on it; followers apply the same entry with no one to ack.
        if matches!(replica.role, Role::Leader(_)) {
            replica.send(
                transport,
                entry.client_src,
                Body::Ok {
                    mid: entry.mid,
                    value: None,
                },
            );
        }
    }
}
