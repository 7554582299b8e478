//! The Raft state machine: role as a tagged variant, plus the bits shared by
//! every role (term bookkeeping, log indexing, election-deadline resets).
//!
//! Role-specific logic lives in the sibling modules: `election` (vote
//! requests/replies, timeout handling), `replication` (leader AE
//! construction/response handling, follower AE acceptance, commit
//! advancement), and `apply` (advancing `last_applied` into the state map).

mod apply;
mod election;
mod replication;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::info;

use crate::config::ReplicaConfig;
use crate::message::{Body, Envelope, LogEntry, ReplicaId, BROADCAST};
use crate::state_machine::StateMachine;
use crate::timing::Timing;
use crate::transport::Transport;

/// Role-specific volatile state, kept out of the common fields so a
/// follower never carries stale leader bookkeeping around.
#[derive(Debug)]
pub enum Role {
    Follower,
    Candidate(CandidateState),
    Leader(LeaderState),
}

#[derive(Debug, Default)]
pub struct CandidateState {
    pub votes_received: HashSet<ReplicaId>,
}

#[derive(Debug)]
pub struct LeaderState {
    pub next_index: HashMap<ReplicaId, u64>,
    pub match_index: HashMap<ReplicaId, u64>,
    pub last_sent: HashMap<ReplicaId, Instant>,
}

pub struct Replica {
    pub(crate) id: ReplicaId,
    pub(crate) peers: Vec<ReplicaId>,
    pub(crate) timing: Timing,

    pub(crate) current_term: u64,
    pub(crate) voted_for: Option<ReplicaId>,
    /// 0-indexed storage for a 1-indexed log: external index `i` lives at
    /// `log[i - 1]`; index 0 is the "no previous entry" sentinel and is
    /// never stored.
    pub(crate) log: Vec<LogEntry>,

    pub(crate) commit_index: u64,
    pub(crate) last_applied: u64,
    pub(crate) leader_hint: ReplicaId,
    pub(crate) election_deadline: Instant,

    pub(crate) state_machine: StateMachine,
    pub(crate) role: Role,
}

impl Replica {
    pub fn new(config: &ReplicaConfig, now: Instant) -> Self {
        let mut replica = Replica {
            id: config.id.clone(),
            peers: config.peers.clone(),
            timing: config.timing,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            leader_hint: BROADCAST.to_string(),
            election_deadline: now,
            state_machine: StateMachine::new(),
            role: Role::Follower,
        };
        replica.election_deadline = now + election::sample_timeout(&replica.timing);
        replica
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log_len(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    /// Announce this replica to the cluster at startup.
    pub fn announce(&self, transport: &dyn Transport) {
        self.send(transport, BROADCAST.to_string(), Body::Hello);
    }

    /// Advance `last_applied` toward `commit_index`, mutating the state map
    /// and (on the leader) acking clients along the way. Run once at the
    /// start of every event-loop iteration, before waiting on the socket.
    pub fn apply_committed(&mut self, transport: &dyn Transport) {
        apply::apply_committed(self, transport);
    }

    /// Role-appropriate per-tick maintenance: leader replication, or a
    /// follower/candidate election-timeout check. Run once per event-loop
    /// iteration, after any inbound message for that iteration was dispatched.
    pub fn on_tick(&mut self, transport: &dyn Transport, now: Instant) {
        match self.role {
            Role::Leader(_) => replication::leader_tick(self, transport, now),
            Role::Follower | Role::Candidate(_) => election::check_timeout(self, transport, now),
        }
    }

    /// Dispatch one inbound envelope to the handler for the current role.
    pub fn on_message(&mut self, transport: &dyn Transport, now: Instant, envelope: Envelope) {
        match envelope.body {
            Body::RequestVote { .. } => election::handle_request_vote(self, transport, now, envelope),
            Body::RequestVoteReply { .. } => {
                election::handle_request_vote_reply(self, transport, now, envelope)
            }
            Body::AppendEntries { .. } => {
                replication::handle_append_entries(self, transport, now, envelope)
            }
            Body::AppendEntriesReply { .. } => {
                replication::handle_append_entries_reply(self, transport, now, envelope)
            }
            Body::Get { .. } => self.handle_client_get(transport, envelope),
            Body::Put { .. } => self.handle_client_put(transport, envelope),
            // hello/ok/fail/redirect are never sent *to* a replica in this protocol.
            Body::Hello | Body::Ok { .. } | Body::Fail { .. } | Body::Redirect { .. } => {}
        }
    }

    fn handle_client_get(&mut self, transport: &dyn Transport, envelope: Envelope) {
        let (mid, key) = match envelope.body {
            Body::Get { mid, key } => (mid, key),
            _ => unreachable!(),
        };
        match &self.role {
            Role::Leader(_) => {
                let value = self.state_machine.get(&key);
                self.send(
                    transport,
                    envelope.src,
                    Body::Ok {
                        mid,
                        value: Some(value),
                    },
                );
            }
            _ => self.redirect(transport, envelope.src, mid),
        }
    }

    fn handle_client_put(&mut self, transport: &dyn Transport, envelope: Envelope) {
        let (mid, key, value) = match envelope.body {
            Body::Put { mid, key, value } => (mid, key, value),
            _ => unreachable!(),
        };
        match &self.role {
            Role::Leader(_) => {
                self.log.push(LogEntry {
                    key,
                    value,
                    term: self.current_term,
                    mid,
                    client_src: envelope.src,
                });
                // Ack is deferred to the apply path: no send here.
            }
            _ => self.redirect(transport, envelope.src, mid),
        }
    }

    fn redirect(&self, transport: &dyn Transport, dst: ReplicaId, mid: String) {
        self.send(transport, dst, Body::Redirect { mid });
    }

    pub(crate) fn send(&self, transport: &dyn Transport, dst: ReplicaId, body: Body) {
        let envelope = Envelope::new(self.id.clone(), dst, self.leader_hint.clone(), body);
        transport.send(&envelope);
    }

    /// External (1-indexed) index of the last log entry, or 0 if empty.
    pub(crate) fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    /// Term of the entry at `index` (0 denotes "no previous entry").
    pub(crate) fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            None
        } else {
            self.log.get((index - 1) as usize).map(|e| e.term)
        }
    }

    pub(crate) fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Strict majority of the full cluster (self + peers).
    pub(crate) fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Run once whenever a message carries a term; adopts it and demotes to
    /// follower on any strictly higher term.
    pub(crate) fn observe_term(&mut self, transport: &dyn Transport, term: u64) {
        if term > self.current_term {
            info!(
                "{}: observed higher term {} (was {}), stepping down",
                self.id, term, self.current_term
            );
            self.current_term = term;
            self.voted_for = None;
            self.become_follower(transport);
        }
    }

    /// Demote to follower, failing any uncommitted client writes first so
    /// callers don't hang waiting on entries this leader may never commit.
    pub(crate) fn become_follower(&mut self, transport: &dyn Transport) {
        if matches!(self.role, Role::Leader(_)) {
            self.fail_uncommitted_writes(transport);
        }
        self.role = Role::Follower;
        self.leader_hint = BROADCAST.to_string();
        self.reset_election_deadline(Instant::now());
    }

    fn fail_uncommitted_writes(&self, transport: &dyn Transport) {
        for entry in self.log.iter().skip(self.last_applied as usize) {
            self.send(
                transport,
                entry.client_src.clone(),
                Body::Fail {
                    mid: entry.mid.clone(),
                },
            );
        }
    }

    pub(crate) fn reset_election_deadline(&mut self, now: Instant) {
        self.election_deadline = now + election::sample_timeout(&self.timing);
    }
}
