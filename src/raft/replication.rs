//! Leader-side replication bookkeeping and the AppendEntries RPC itself,
//! both the leader's construction/response handling and the
//! follower/candidate acceptance procedure.

use std::time::Instant;

use log::{debug, info};

use super::{Replica, Role};
use crate::message::{Body, Envelope, LogEntry, ReplicaId, NO_PREV};
use crate::transport::Transport;

/// Run once per event-loop tick while leader: send AppendEntries to any peer
/// whose heartbeat interval has elapsed, then try to advance commit_index.
pub(super) fn leader_tick(replica: &mut Replica, transport: &dyn Transport, now: Instant) {
    broadcast_append_entries(replica, transport, now, false);
    try_advance_commit(replica);
}

/// Send AppendEntries to every peer whose heartbeat interval has elapsed
/// (or, when `force` is true, to every peer unconditionally — used right
/// after winning an election, to assert leadership right away).
pub(super) fn broadcast_append_entries(
    replica: &mut Replica,
    transport: &dyn Transport,
    now: Instant,
    force: bool,
) {
    let peers = replica.peers.clone();
    for peer in peers {
        let due = {
            let state = leader_state(replica);
            force
                || now.duration_since(*state.last_sent.get(&peer).unwrap())
                    >= replica.timing.heartbeat_interval
        };
        if !due {
            continue;
        }
        send_append_entries_to(replica, transport, &peer);
        leader_state_mut(replica).last_sent.insert(peer, now);
    }
}

fn send_append_entries_to(replica: &Replica, transport: &dyn Transport, peer: &ReplicaId) {
    let next_index = *leader_state(replica).next_index.get(peer).unwrap();
    let log_len = replica.last_log_index();

    let (prev_log_index, prev_log_term, entries): (i64, i64, Vec<LogEntry>) = if log_len >= next_index
    {
        let prev = next_index - 1;
        let prev_term = replica.term_at(prev).map(|t| t as i64).unwrap_or(NO_PREV);
        let entries = replica.log[(next_index - 1) as usize..].to_vec();
        (prev as i64, prev_term, entries)
    } else {
        (NO_PREV, NO_PREV, Vec::new())
    };

    debug!(
        "{}: sending AE to {} (prev={}, entries={})",
        replica.id,
        peer,
        prev_log_index,
        entries.len()
    );

    replica.send(
        transport,
        peer.clone(),
        Body::AppendEntries {
            term: replica.current_term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: replica.commit_index,
        },
    );
}

pub(super) fn handle_append_entries_reply(
    replica: &mut Replica,
    transport: &dyn Transport,
    _now: Instant,
    envelope: Envelope,
) {
    let (term, success, last_index) = match envelope.body {
        Body::AppendEntriesReply {
            term,
            r,
            last_index,
        } => (term, r, last_index),
        _ => unreachable!(),
    };

    if term > replica.current_term {
        replica.observe_term(transport, term);
        return;
    }

    if !matches!(replica.role, Role::Leader(_)) {
        return;
    }

    let peer = envelope.src;
    if success {
        let li = last_index.unwrap_or(0);
        let state = leader_state_mut(replica);
        state.next_index.insert(peer.clone(), li + 1);
        state.match_index.insert(peer, li);
    } else {
        let state = leader_state_mut(replica);
        let cur = *state.next_index.get(&peer).unwrap_or(&1);
        state.next_index.insert(peer, cur.saturating_sub(1).max(1));
    }
}

/// Canonical Raft commit rule: only entries from the leader's current term
/// are committed by counting; earlier-term entries become committed only as
/// a side effect of a later own-term entry at a higher index committing.
fn try_advance_commit(replica: &mut Replica) {
    let last_log_index = replica.last_log_index();
    let majority = replica.majority();
    let mut n = replica.commit_index + 1;
    while n <= last_log_index {
        let count = {
            let state = leader_state(replica);
            let mut c = 1; // the leader always counts itself, at last_log_index
            for m in state.match_index.values() {
                if *m >= n {
                    c += 1;
                }
            }
            c
        };
        if count < majority {
            break;
        }
        if replica.term_at(n) == Some(replica.current_term) {
            replica.commit_index = n;
            info!(
                "{}: advanced commit_index to {}",
                replica.id, replica.commit_index
            );
        }
        n += 1;
    }
}

/// Follower/candidate-side acceptance of an AppendEntries RPC.
pub(super) fn handle_append_entries(
    replica: &mut Replica,
    transport: &dyn Transport,
    now: Instant,
    envelope: Envelope,
) {
    let (term, prev_log_index, prev_log_term, entries, leader_commit) = match envelope.body {
        Body::AppendEntries {
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } => (term, prev_log_index, prev_log_term, entries, leader_commit),
        _ => unreachable!(),
    };
    let leader = envelope.src;

    if term < replica.current_term {
        replica.send(
            transport,
            leader,
            Body::AppendEntriesReply {
                term: replica.current_term,
                r: false,
                last_index: None,
            },
        );
        return;
    }

    replica.observe_term(transport, term);
    // A candidate observing a current-term leader steps down.
    if matches!(replica.role, Role::Candidate(_)) {
        replica.become_follower(transport);
    }

    // Sentinel (-1) and 0 both mean "no previous entry".
    let prev: u64 = if prev_log_index <= 0 {
        0
    } else {
        prev_log_index as u64
    };

    let log_matches = prev == 0
        || (replica.last_log_index() >= prev && replica.term_at(prev) == Some(prev_log_term as u64));

    if !log_matches {
        replica.reset_election_deadline(now);
        replica.send(
            transport,
            leader,
            Body::AppendEntriesReply {
                term: replica.current_term,
                r: false,
                last_index: None,
            },
        );
        return;
    }

    // A true heartbeat (no entries) never touches the log: only a
    // non-empty entries list can trigger the truncate-then-append step.
    if !entries.is_empty() {
        replica.log.truncate(prev as usize);
        replica.log.extend(entries);
    }

    if leader_commit > replica.commit_index {
        replica.commit_index = leader_commit.min(replica.last_log_index());
    }

    replica.leader_hint = leader.clone();
    replica.reset_election_deadline(now);

    replica.send(
        transport,
        leader,
        Body::AppendEntriesReply {
            term: replica.current_term,
            r: true,
            last_index: Some(replica.last_log_index()),
        },
    );
}

fn leader_state(replica: &Replica) -> &super::LeaderState {
    match &replica.role {
        Role::Leader(state) => state,
        _ => panic!("leader_state called while not leader"),
    }
}

fn leader_state_mut(replica: &mut Replica) -> &mut super::LeaderState {
    match &mut replica.role {
        Role::Leader(state) => state,
        _ => panic!("leader_state_mut called while not leader"),
    }
}
