use crate::action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
use crate::participant::{Candidate, Follower, Leader, Participant};
use crate::recency::is_candidate_latest;
use crate::strategy::{ConsensusStrategy, StrategyOptions};
use crate::two_node::{TwoNodeConfig, TwoNodeStrategy};

/// Two-node policy that keeps the vote exchange alive.
///
/// Role transitions follow [`TwoNodeStrategy`], but vote requests are
/// answered by identity: the configured primary is granted a vote when its
/// log is at least as current, and with failback enabled it is granted one
/// even with a stale log, together with an order to drop local state. That
/// covers both nodes having run independently through a partition, where the
/// primary's persisted state must win by policy once the partition heals.
#[derive(Clone, Debug, Default)]
pub struct TwoNodeRaftStrategy {
    base: TwoNodeStrategy,
}

impl TwoNodeRaftStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TwoNodeConfig) -> Self {
        Self {
            base: TwoNodeStrategy::with_config(config),
        }
    }

    pub fn config(&self) -> &TwoNodeConfig {
        self.base.config()
    }

    pub fn is_configured_primary(&self, participant: &Participant) -> bool {
        self.base.is_configured_primary(participant)
    }
}

impl ConsensusStrategy for TwoNodeRaftStrategy {
    fn on_data_sent(&self, leader: Leader<'_>) -> DataSentAction {
        self.base.on_data_sent(leader)
    }

    fn on_data_received(&self, receiver: Leader<'_>, sender: Leader<'_>) -> DataReceivedAction {
        self.base.on_data_received(receiver, sender)
    }

    fn on_participant_synced(&self, participant: &Participant) -> ParticipantSyncedAction {
        self.base.on_participant_synced(participant)
    }

    fn on_heartbeat_not_received(&self, follower: Follower<'_>) -> HeartbeatNotReceivedAction {
        self.base.on_heartbeat_not_received(follower)
    }

    fn on_election_timeout(&self, candidate: Candidate<'_>) -> ElectionTimeoutAction {
        self.base.on_election_timeout(candidate)
    }

    fn on_vote_received(&self, _candidate: Candidate<'_>, vote_count: u32) -> VoteReceivedAction {
        // Two participants: one granted vote plus the candidate's own is
        // unanimity.
        if vote_count >= 2 {
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
        let config = self.base.config();
        match &config.configured_primary {
            // No designated primary: plain log-recency voting.
            None => {
                if is_candidate_latest(voter, &candidate, voted_for) {
                    VoteRequestReceivedAction::GrantVote
                } else {
                    VoteRequestReceivedAction::None
                }
            }
            Some(primary) => {
                if candidate.id != *primary {
                    return VoteRequestReceivedAction::None;
                }
                if is_candidate_latest(voter, &candidate, voted_for) {
                    VoteRequestReceivedAction::GrantVote
                } else if config.failback_to_primary {
                    VoteRequestReceivedAction::GrantVoteAndClearState
                } else {
                    VoteRequestReceivedAction::None
                }
            }
        }
    }

    fn update_strategy(&mut self, options: &StrategyOptions) {
        self.base.update_strategy(options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{option_keys, OptionValue};

    fn configured(primary: &str, failback: bool) -> TwoNodeRaftStrategy {
        TwoNodeRaftStrategy::with_config(TwoNodeConfig {
            configured_primary: Some(primary.into()),
            failback_to_primary: failback,
            ..TwoNodeConfig::default()
        })
    }

    #[test]
    fn current_primary_is_granted_a_vote() {
        let s = configured("node-a", false);
        let voter = Participant::new("node-b", 3, 5, 2);
        let primary = Participant::new("node-a", 3, 5, 2);
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&primary), None),
            VoteRequestReceivedAction::GrantVote
        );
    }

    #[test]
    fn stale_primary_wins_by_policy_when_failback_enabled() {
        let voter = Participant::new("node-b", 7, 12, 6);
        let stale_primary = Participant::new("node-a", 4, 3, 2);

        let s = configured("node-a", true);
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&stale_primary), None),
            VoteRequestReceivedAction::GrantVoteAndClearState
        );

        let s = configured("node-a", false);
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&stale_primary), None),
            VoteRequestReceivedAction::None
        );
    }

    #[test]
    fn secondary_candidate_is_denied() {
        let s = configured("node-a", true);
        let voter = Participant::new("node-a", 3, 5, 2);
        let secondary = Participant::new("node-b", 4, 9, 3);
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&secondary), None),
            VoteRequestReceivedAction::None
        );
    }

    #[test]
    fn without_primary_votes_follow_log_recency() {
        let s = TwoNodeRaftStrategy::new();
        let voter = Participant::new("node-a", 3, 5, 2);
        let fresh = Participant::new("node-b", 3, 6, 2);
        let stale = Participant::new("node-b", 2, 1, 1);
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&fresh), None),
            VoteRequestReceivedAction::GrantVote
        );
        assert_eq!(
            s.on_vote_request_received(&voter, Candidate(&stale), None),
            VoteRequestReceivedAction::None
        );
    }

    #[test]
    fn unanimity_elects_a_leader() {
        let s = configured("node-a", true);
        let primary = Participant::new("node-a", 2, 0, 0);
        assert_eq!(
            s.on_vote_received(Candidate(&primary), 1),
            VoteReceivedAction::None
        );
        assert_eq!(
            s.on_vote_received(Candidate(&primary), 2),
            VoteReceivedAction::BecomeLeader
        );
    }

    #[test]
    fn role_transitions_follow_base_policy() {
        let mut s = TwoNodeRaftStrategy::new();
        let mut opts = StrategyOptions::default();
        opts.insert(
            option_keys::CONFIGURED_PRIMARY.into(),
            OptionValue::Id("node-a".into()),
        );
        opts.insert(
            option_keys::NETWORK_PARTITION_DETECTION_ENABLED.into(),
            OptionValue::Bool(true),
        );
        opts.insert(
            option_keys::NETWORK_PARTITION_DETECTED.into(),
            OptionValue::Bool(true),
        );
        s.update_strategy(&opts);

        let secondary = Participant::new("node-b", 1, 0, 0);
        assert_eq!(
            s.on_heartbeat_not_received(Follower(&secondary)),
            HeartbeatNotReceivedAction::None
        );
        let primary = Participant::new("node-a", 1, 0, 0);
        assert_eq!(
            s.on_heartbeat_not_received(Follower(&primary)),
            HeartbeatNotReceivedAction::BecomeLeader
        );
    }
}
