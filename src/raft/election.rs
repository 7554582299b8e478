//! Randomized election timeouts, RequestVote emission/tallying, and
//! promotion to leader.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::info;
use rand::Rng;

use super::{CandidateState, LeaderState, Replica, Role};
use crate::message::{Body, Envelope};
use crate::timing::Timing;
use crate::transport::Transport;

/// Sample a fresh election timeout uniformly from `[timing.election_timeout_min, ..max]`.
pub(super) fn sample_timeout(timing: &Timing) -> Duration {
    let lo = timing.election_timeout_min.as_millis() as u64;
    let hi = timing.election_timeout_max.as_millis() as u64;
    let millis = if hi > lo {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    Duration::from_millis(millis)
}

/// If not leader and the election deadline has passed, start a new election.
pub(super) fn check_timeout(replica: &mut Replica, transport: &dyn Transport, now: Instant) {
    if matches!(replica.role, Role::Leader(_)) {
        return;
    }
    if now >= replica.election_deadline {
        start_election(replica, transport, now);
    }
}

fn start_election(replica: &mut Replica, transport: &dyn Transport, now: Instant) {
    replica.current_term += 1;
    replica.voted_for = Some(replica.id.clone());
    let mut votes = std::collections::HashSet::new();
    votes.insert(replica.id.clone());
    replica.role = Role::Candidate(CandidateState {
        votes_received: votes,
    });
    replica.reset_election_deadline(now);

    info!(
        "{}: election timeout, starting election for term {}",
        replica.id, replica.current_term
    );

    let body = Body::RequestVote {
        term: replica.current_term,
        last_log_index: replica.last_log_index(),
        last_log_term: replica.last_log_term(),
    };
    replica.send(transport, crate::message::BROADCAST.to_string(), body);
}

/// The vote decision, applicable regardless of the replica's current role: a
/// leader or candidate that has already voted for itself this term will
/// simply fail the `voted_for` check.
pub(super) fn handle_request_vote(
    replica: &mut Replica,
    transport: &dyn Transport,
    now: Instant,
    envelope: Envelope,
) {
    let (term, last_log_index, last_log_term) = match envelope.body {
        Body::RequestVote {
            term,
            last_log_index,
            last_log_term,
        } => (term, last_log_index, last_log_term),
        _ => unreachable!(),
    };
    let candidate = envelope.src;

    replica.observe_term(transport, term);
    if matches!(replica.role, Role::Follower) {
        replica.reset_election_deadline(now);
    }

    let granted = term >= replica.current_term
        && replica
            .voted_for
            .as_ref()
            .map_or(true, |v| v == &candidate)
        && is_log_up_to_date(replica, last_log_index, last_log_term);

    if granted {
        replica.voted_for = Some(candidate.clone());
        info!(
            "{}: granted vote to {} for term {}",
            replica.id, candidate, replica.current_term
        );
    }

    replica.send(
        transport,
        candidate,
        Body::RequestVoteReply {
            term: replica.current_term,
            r: granted,
        },
    );
}

fn is_log_up_to_date(replica: &Replica, candidate_last_index: u64, candidate_last_term: u64) -> bool {
    let our_last_term = replica.last_log_term();
    let our_last_index = replica.last_log_index();
    if our_last_index == 0 {
        // An empty local log is trivially not more up-to-date than the
        // candidate's, whatever the candidate's log looks like.
        return true;
    }
    candidate_last_term > our_last_term
        || (candidate_last_term == our_last_term && candidate_last_index >= our_last_index)
}

pub(super) fn handle_request_vote_reply(
    replica: &mut Replica,
    transport: &dyn Transport,
    _now: Instant,
    envelope: Envelope,
) {
    let (term, granted) = match envelope.body {
        Body::RequestVoteReply { term, r } => (term, r),
        _ => unreachable!(),
    };
    replica.observe_term(transport, term);

    // Stale reply from an election we've since moved past.
    if term < replica.current_term {
        return;
    }

    let votes = if let Role::Candidate(ref mut state) = replica.role {
        if granted {
            state.votes_received.insert(envelope.src);
        }
        state.votes_received.len()
    } else {
        0
    };

    if votes >= replica.majority() && matches!(replica.role, Role::Candidate(_)) {
        become_leader(replica, transport);
    }
}

fn become_leader(replica: &mut Replica, transport: &dyn Transport) {
    info!(
        "{}: won election for term {}, becoming leader",
        replica.id, replica.current_term
    );
    replica.leader_hint = replica.id.clone();
    replica.voted_for = None;

    let next_index_default = replica.last_log_index() + 1;
    let mut next_index = HashMap::new();
    let mut match_index = HashMap::new();
    let mut last_sent = HashMap::new();
    for peer in &replica.peers {
        next_index.insert(peer.clone(), next_index_default);
        match_index.insert(peer.clone(), 0);
        // Force an immediate send on the first replication tick.
        last_sent.insert(peer.clone(), Instant::now() - replica.timing.heartbeat_interval);
    }
    replica.role = Role::Leader(LeaderState {
        next_index,
        match_index,
        last_sent,
    });

    super::replication::broadcast_append_entries(replica, transport, Instant::now(), true);
}

/// Test-only: install leader state directly, without sending the initial
/// broadcast, so replication tests can seed `match_index` before any I/O.
#[cfg(test)]
pub(super) fn become_leader_for_test(replica: &mut Replica) {
    replica.leader_hint = replica.id.clone();
    let next_index_default = replica.last_log_index() + 1;
    let mut next_index = HashMap::new();
    let mut match_index = HashMap::new();
    let mut last_sent = HashMap::new();
    for peer in &replica.peers {
        next_index.insert(peer.clone(), next_index_default);
        match_index.insert(peer.clone(), 0);
        last_sent.insert(peer.clone(), Instant::now());
    }
    replica.role = Role::Leader(LeaderState {
        next_index,
        match_index,
        last_sent,
    });
}
