use ahash::HashSet;

use crate::action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
use crate::participant::{Candidate, Follower, Leader, Participant, ParticipantId};
use crate::recency::is_candidate_latest;
use crate::strategy::{ConsensusStrategy, StrategyOptions};

/// Minimum vote count for a candidate to win an election among
/// `peer_count` peers plus itself.
pub fn votes_required(peer_count: usize) -> u32 {
    ((peer_count + 1) / 2 + 1) as u32
}

/// Standard majority-quorum policy: a missed heartbeat always starts an
/// election, votes are granted by log recency, and leadership requires a
/// majority of the member set.
pub struct RaftStrategy {
    members: HashSet<ParticipantId>,
    votes_required: u32,
}

impl RaftStrategy {
    /// `members` is the full member set, including the local participant.
    /// Membership changes require constructing a new strategy.
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        let members: HashSet<ParticipantId> = members.into_iter().collect();
        let votes_required = votes_required(members.len().saturating_sub(1));
        Self {
            members,
            votes_required,
        }
    }

    pub fn votes_required(&self) -> u32 {
        self.votes_required
    }

    /// A one-member cluster elects itself without a vote exchange.
    fn is_sole_member(&self, participant: &Participant) -> bool {
        self.members.len() == 1 && self.members.contains(&participant.id)
    }
}

impl ConsensusStrategy for RaftStrategy {
    fn on_data_sent(&self, _leader: Leader<'_>) -> DataSentAction {
        DataSentAction::None
    }

    fn on_data_received(&self, receiver: Leader<'_>, sender: Leader<'_>) -> DataReceivedAction {
        // Two leaders; the higher term wins per standard Raft.
        if sender.term >= receiver.term {
            DataReceivedAction::BecomeFollower
        } else {
            DataReceivedAction::None
        }
    }

    fn on_participant_synced(&self, _participant: &Participant) -> ParticipantSyncedAction {
        ParticipantSyncedAction::None
    }

    fn on_heartbeat_not_received(&self, follower: Follower<'_>) -> HeartbeatNotReceivedAction {
        if self.is_sole_member(&follower) {
            HeartbeatNotReceivedAction::BecomeLeader
        } else {
            HeartbeatNotReceivedAction::BecomeCandidate
        }
    }

    fn on_election_timeout(&self, candidate: Candidate<'_>) -> ElectionTimeoutAction {
        if self.is_sole_member(&candidate) {
            ElectionTimeoutAction::BecomeLeader
        } else {
            ElectionTimeoutAction::RequestVote
        }
    }

    fn on_vote_received(&self, _candidate: Candidate<'_>, vote_count: u32) -> VoteReceivedAction {
        if vote_count >= self.votes_required {
            VoteReceivedAction::BecomeLeader
        } else {
            VoteReceivedAction::None
        }
    }

    fn on_vote_request_received(
        &self,
        voter: &Participant,
        candidate: Candidate<'_>,
        voted_for: Option<&str>,
    ) -> VoteRequestReceivedAction {
        if is_candidate_latest(voter, &candidate, voted_for) {
            VoteRequestReceivedAction::GrantVote
        } else {
            VoteRequestReceivedAction::None
        }
    }

    fn update_strategy(&mut self, _options: &StrategyOptions) {}
}
