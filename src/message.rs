//! Wire envelope shared by every message exchanged between replicas and clients.
//!
//! Every datagram is a single JSON object: the four envelope fields (`src`,
//! `dst`, `leader`, `type`) plus whatever fields that `type` requires. Serde's
//! internally-tagged representation maps directly onto that shape.

use serde::{Deserialize, Serialize};

/// Reserved destination id the transport fans out to every cluster member.
pub const BROADCAST: &str = "FFFF";

pub type ReplicaId = String;

/// A single committed-or-pending write proposal.
///
/// `(key, value, term, mid, client_src)` on the wire — kept as a struct here
/// so field access stays named, but (de)serializes as that 5-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "LogEntryTuple", from = "LogEntryTuple")]
pub struct LogEntry {
    pub key: String,
    pub value: String,
    pub term: u64,
    pub mid: String,
    pub client_src: ReplicaId,
}

type LogEntryTuple = (String, String, u64, String, String);

impl From<LogEntry> for LogEntryTuple {
    fn from(e: LogEntry) -> LogEntryTuple {
        (e.key, e.value, e.term, e.mid, e.client_src)
    }
}

impl From<LogEntryTuple> for LogEntry {
    fn from(t: LogEntryTuple) -> LogEntry {
        LogEntry {
            key: t.0,
            value: t.1,
            term: t.2,
            mid: t.3,
            client_src: t.4,
        }
    }
}

/// Sentinel for "no previous entry" on the wire (`prev_log_index` / `prev_log_term`).
pub const NO_PREV: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Body {
    #[serde(rename = "hello")]
    Hello,

    #[serde(rename = "get")]
    Get {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },

    #[serde(rename = "put")]
    Put {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },

    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },

    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    #[serde(rename = "aerpc")]
    AppendEntries {
        term: u64,
        #[serde(rename = "pLI")]
        prev_log_index: i64,
        #[serde(rename = "pLT")]
        prev_log_term: i64,
        entries: Vec<LogEntry>,
        #[serde(rename = "lC")]
        leader_commit: u64,
    },

    #[serde(rename = "aerpcR")]
    AppendEntriesReply {
        term: u64,
        r: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(rename = "LI")]
        last_index: Option<u64>,
    },

    #[serde(rename = "rvrpc")]
    RequestVote {
        term: u64,
        #[serde(rename = "pLI")]
        last_log_index: u64,
        #[serde(rename = "pLT")]
        last_log_term: u64,
    },

    #[serde(rename = "rvrpcR")]
    RequestVoteReply { term: u64, r: bool },
}

/// A complete datagram: common envelope fields plus a type-tagged body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub src: ReplicaId,
    pub dst: ReplicaId,
    pub leader: ReplicaId,
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    pub fn new(src: ReplicaId, dst: ReplicaId, leader: ReplicaId, body: Body) -> Self {
        Envelope {
            src,
            dst,
            leader,
            body,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}
