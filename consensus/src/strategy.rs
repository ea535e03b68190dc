use ahash::HashMap;

use crate::action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
use crate::participant::{Candidate, Follower, Leader, Participant, ParticipantId};

/// Option names recognized by [`ConsensusStrategy::update_strategy`].
/// Unrecognized names are ignored so configuration sources can carry options
/// for newer strategies.
pub mod option_keys {
    pub const CONFIGURED_PRIMARY: &str = "configuredPrimary";
    pub const FAILBACK_TO_PRIMARY: &str = "failbackToPrimary";
    pub const NETWORK_PARTITION_DETECTION_ENABLED: &str = "networkPartitionDetectionEnabled";
    pub const NETWORK_PARTITION_DETECTED: &str = "networkPartitionDetected";
    pub const ACTIVE_ACTIVE_DEPLOYMENT: &str = "activeActiveDeployment";
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Id(ParticipantId),
}

/// Named options handed to a strategy by its configuration source.
pub type StrategyOptions = HashMap<String, OptionValue>;

/// Role-transition policy for one cluster participant.
///
/// Every callback is a pure decision over the supplied snapshots and the
/// strategy's current configuration; the caller owns timers, transport and
/// persistence, and applies whatever action comes back. A strategy instance
/// has a single owner and is driven one event at a time.
pub trait ConsensusStrategy {
    /// The leader has just replicated data (or a heartbeat) to its peers.
    fn on_data_sent(&self, leader: Leader<'_>) -> DataSentAction;

    /// A leader received replicated data from another leader.
    fn on_data_received(&self, receiver: Leader<'_>, sender: Leader<'_>) -> DataReceivedAction;

    /// A follower has fully caught up with the leader's log. Observed and
    /// reported by the leader; `participant` is the synced follower.
    fn on_participant_synced(&self, participant: &Participant) -> ParticipantSyncedAction;

    /// The follower's heartbeat timer expired without word from a leader.
    fn on_heartbeat_not_received(&self, follower: Follower<'_>) -> HeartbeatNotReceivedAction;

    /// The candidate's election timer expired without a decision.
    fn on_election_timeout(&self, candidate: Candidate<'_>) -> ElectionTimeoutAction;

    /// The candidate's vote tally changed; `vote_count` includes its own vote.
    fn on_vote_received(&self, candidate: Candidate<'_>, vote_count: u32) -> VoteReceivedAction;

    /// `voter` received a vote request from `candidate`. `voted_for` is the
    /// voter's recorded choice for the candidate's term, if any.
    fn on_vote_request_received(
        &self,
        voter: &Participant,
        candidate: Candidate<'_>,
        voted_for: Option<&str>,
    ) -> VoteRequestReceivedAction;

    /// Applies a new set of named options atomically with respect to
    /// subsequent decision calls. Strategies without configuration ignore it.
    fn update_strategy(&mut self, options: &StrategyOptions);
}
