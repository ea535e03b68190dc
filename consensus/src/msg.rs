use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::participant::{ParticipantId, Term};
use crate::strategy::StrategyOptions;

pub type Payload = Vec<u8>;

pub const HEARTBEAT_DURATION: Duration = Duration::from_millis(150);
pub const ELECTION_TIMEOUT_MS_LOW: u64 = 500;
pub const ELECTION_TIMEOUT_MS_HIGH: u64 = 1000;

/// Version tag carried with replicated payloads.
pub const PAYLOAD_VERSION: u16 = 1;
/// Version of the replication protocol spoken by this node.
pub const RAFT_VERSION: u16 = 1;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: Term,
    pub payload: Payload,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RaftMsg {
    RequestVote {
        term: Term,
        candidate_id: ParticipantId,
        last_log_index: i64,
        last_log_term: Term,
    },
    RequestVoteReply {
        term: Term,
        vote_granted: bool,
    },
    AppendEntries {
        term: Term,
        leader_id: ParticipantId,
        prev_log_index: u64,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: u64,
        /// Highest index known to be replicated on every member, -1 if
        /// unknown.
        replicated_to_all_index: i64,
        payload_version: u16,
        leader_raft_version: u16,
        leader_address: Option<String>,
    },
    AppendEntriesReply {
        term: Term,
        follower_id: ParticipantId,
        match_index: u64,
        success: bool,
    },
    InstallSnapshotReply {
        term: Term,
        follower_id: ParticipantId,
        chunk_index: u32,
        success: bool,
    },
}

///////////////////////////////////////////////////
// The rest of this module supports local testing.
///////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeSummary {
    pub id: ParticipantId,
    pub term: Term,
    pub is_leader: bool,
    pub commit_index: u64,
    pub log: Vec<LogEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalNodeSummary {
    pub id: ParticipantId,
    pub is_dead: bool,
    pub is_disconnected: bool,
    pub node: NodeSummary,
}

#[derive(Clone, Debug)]
pub enum CtlMsg {
    SendCmd {
        dest: ParticipantId,
        payload: Payload,
    },
    UpdateStrategy {
        dest: ParticipantId,
        options: StrategyOptions,
    },
    GetClusterState,
    SendClusterState {
        nodes: Vec<LocalNodeSummary>,
    },
    Kill {
        dest: ParticipantId,
    },
    Start {
        dest: ParticipantId,
    },
    Connect {
        dest: ParticipantId,
    },
    Disconnect {
        dest: ParticipantId,
    },
    Shutdown,
}

impl CtlMsg {
    pub fn destinations(&self) -> Destinations {
        use CtlMsg::*;
        use Destinations::*;
        match self {
            SendCmd { dest, .. } => One(dest.clone()),
            UpdateStrategy { dest, .. } => One(dest.clone()),
            GetClusterState => All,
            SendClusterState { .. } => None,
            Kill { dest } => One(dest.clone()),
            Start { dest } => One(dest.clone()),
            Connect { dest } => One(dest.clone()),
            Disconnect { dest } => One(dest.clone()),
            Shutdown => All,
        }
    }
}

pub enum Destinations {
    All,
    None,
    One(ParticipantId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_entries() {
        let entry = LogEntry {
            index: 7,
            term: 3,
            payload: vec![0x00, 0x42, 0xff, 0x07],
        };
        let msg = RaftMsg::AppendEntries {
            term: 3,
            leader_id: "node-0".into(),
            prev_log_index: 6,
            prev_log_term: 3,
            entries: vec![entry.clone()],
            leader_commit: 6,
            replicated_to_all_index: 5,
            payload_version: PAYLOAD_VERSION,
            leader_raft_version: RAFT_VERSION,
            leader_address: Some("10.0.0.1:2550".into()),
        };

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: RaftMsg = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);

        let RaftMsg::AppendEntries { entries, .. } = decoded else {
            panic!("decoded to a different message kind");
        };
        assert_eq!(entries[0].index, entry.index);
        assert_eq!(entries[0].term, entry.term);
        assert_eq!(entries[0].payload, entry.payload);
    }

    #[test]
    fn snapshot_reply_round_trips() {
        let msg = RaftMsg::InstallSnapshotReply {
            term: 9,
            follower_id: "node-1".into(),
            chunk_index: 4,
            success: true,
        };
        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded: RaftMsg = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
