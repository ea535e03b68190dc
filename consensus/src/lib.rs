//! Consensus role-transition engine for a replicated controller.
//!
//! The decision layer is a set of pluggable [`ConsensusStrategy`]
//! implementations: standard majority-quorum Raft ([`RaftStrategy`]) and two
//! policies for clusters of exactly two participants ([`TwoNodeStrategy`],
//! [`TwoNodeRaftStrategy`]), where majority voting cannot make progress
//! after a single failure. [`node::Node`] is the channel-driven runtime that
//! owns the log, term, vote record and timers, and applies whatever action
//! the strategy returns.

pub mod action;
pub mod majority;
pub mod msg;
pub mod node;
pub mod participant;
pub mod recency;
pub mod strategy;
pub mod two_node;
pub mod two_node_raft;

pub use action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
pub use majority::{votes_required, RaftStrategy};
pub use node::{Node, NodeCtl};
pub use participant::{Candidate, Follower, Leader, Participant, ParticipantId, Term};
pub use recency::is_candidate_latest;
pub use strategy::{option_keys, ConsensusStrategy, OptionValue, StrategyOptions};
pub use two_node::{TwoNodeConfig, TwoNodeStrategy};
pub use two_node_raft::TwoNodeRaftStrategy;
