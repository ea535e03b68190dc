use tracing::warn;

use crate::action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
use crate::participant::{Candidate, Follower, Leader, Participant, ParticipantId};
use crate::strategy::{option_keys, ConsensusStrategy, OptionValue, StrategyOptions};

/// Configuration for the two-node deployment policies.
///
/// Defaults are the safe ones: no primary designated, no failback, partition
/// detection off. `network_partition_detected` is fed by an external
/// detector; that detector should poll at less than half the heartbeat
/// period to keep the window where both nodes believe themselves leader
/// small.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TwoNodeConfig {
    pub configured_primary: Option<ParticipantId>,
    pub failback_to_primary: bool,
    pub network_partition_detection_enabled: bool,
    pub network_partition_detected: bool,
    pub active_active_deployment: bool,
}

impl TwoNodeConfig {
    /// Returns a copy of `self` with every recognized option applied.
    /// Unrecognized names are ignored; a recognized name carrying a value of
    /// the wrong type is ignored with a warning.
    pub fn with_options(&self, options: &StrategyOptions) -> TwoNodeConfig {
        let mut next = self.clone();
        for (name, value) in options {
            match (name.as_str(), value) {
                (option_keys::CONFIGURED_PRIMARY, OptionValue::Id(id)) => {
                    next.configured_primary = Some(id.clone());
                }
                (option_keys::FAILBACK_TO_PRIMARY, OptionValue::Bool(v)) => {
                    next.failback_to_primary = *v;
                }
                (option_keys::NETWORK_PARTITION_DETECTION_ENABLED, OptionValue::Bool(v)) => {
                    next.network_partition_detection_enabled = *v;
                }
                (option_keys::NETWORK_PARTITION_DETECTED, OptionValue::Bool(v)) => {
                    next.network_partition_detected = *v;
                }
                (option_keys::ACTIVE_ACTIVE_DEPLOYMENT, OptionValue::Bool(v)) => {
                    next.active_active_deployment = *v;
                }
                (
                    name @ (option_keys::CONFIGURED_PRIMARY
                    | option_keys::FAILBACK_TO_PRIMARY
                    | option_keys::NETWORK_PARTITION_DETECTION_ENABLED
                    | option_keys::NETWORK_PARTITION_DETECTED
                    | option_keys::ACTIVE_ACTIVE_DEPLOYMENT),
                    _,
                ) => {
                    warn!(option = name, "ignoring option with mismatched value type");
                }
                _ => {}
            }
        }
        next
    }
}

/// Active/standby policy for a cluster of exactly two participants.
///
/// A majority among two peers requires both, so a single failure would stall
/// elections forever. This policy drops vote counting entirely and drives
/// role transitions off a configured primary designation: the primary always
/// acts, and the secondary acts unless a detected network partition tells it
/// to stand down (active-passive) or the deployment is active-active.
#[derive(Clone, Debug, Default)]
pub struct TwoNodeStrategy {
    config: TwoNodeConfig,
}

impl TwoNodeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TwoNodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TwoNodeConfig {
        &self.config
    }

    pub fn is_configured_primary(&self, participant: &Participant) -> bool {
        self.config.configured_primary.as_deref() == Some(participant.id.as_str())
    }

    /// Shared transition rule: the primary always takes the active action;
    /// the secondary takes it too unless it must stand down during a
    /// detected partition. With no partition signal available, availability
    /// wins over strict passivity.
    fn resolve<A>(&self, participant: &Participant, active: A, passive: A) -> A {
        if self.is_configured_primary(participant) || self.config.active_active_deployment {
            return active;
        }
        if self.config.network_partition_detection_enabled && self.config.network_partition_detected
        {
            return passive;
        }
        active
    }
}

impl ConsensusStrategy for TwoNodeStrategy {
    fn on_data_sent(&self, leader: Leader<'_>) -> DataSentAction {
        self.resolve(&leader, DataSentAction::None, DataSentAction::BecomeFollower)
    }

    fn on_data_received(&self, receiver: Leader<'_>, sender: Leader<'_>) -> DataReceivedAction {
        // Two leaders. Policy, not log state, decides whose data survives:
        // with failback the returning primary's, otherwise the acting
        // leader's.
        if self.is_configured_primary(&sender) && self.config.failback_to_primary {
            return DataReceivedAction::ClearStateAndBecomeFollower;
        }
        if self.is_configured_primary(&receiver) && !self.config.failback_to_primary {
            return DataReceivedAction::ClearStateAndBecomeFollower;
        }
        DataReceivedAction::None
    }

    fn on_participant_synced(&self, participant: &Participant) -> ParticipantSyncedAction {
        // The recovered primary has the latest data again; step aside with a
        // zeroed term so it wins the next election cleanly. State is kept in
        // case the primary dies before taking over.
        if self.is_configured_primary(participant) && self.config.failback_to_primary {
            ParticipantSyncedAction::ResetElectionTermAndBecomeFollower
        } else {
            ParticipantSyncedAction::None
        }
    }

    fn on_heartbeat_not_received(&self, follower: Follower<'_>) -> HeartbeatNotReceivedAction {
        self.resolve(
            &follower,
            HeartbeatNotReceivedAction::BecomeLeader,
            HeartbeatNotReceivedAction::None,
        )
    }

    fn on_election_timeout(&self, candidate: Candidate<'_>) -> ElectionTimeoutAction {
        self.resolve(
            &candidate,
            ElectionTimeoutAction::BecomeLeader,
            ElectionTimeoutAction::None,
        )
    }

    fn on_vote_received(&self, _candidate: Candidate<'_>, _vote_count: u32) -> VoteReceivedAction {
        // Leadership is settled by the timeout callbacks, never by tallies.
        VoteReceivedAction::None
    }

    fn on_vote_request_received(
        &self,
        _voter: &Participant,
        _candidate: Candidate<'_>,
        _voted_for: Option<&str>,
    ) -> VoteRequestReceivedAction {
        VoteRequestReceivedAction::None
    }

    fn update_strategy(&mut self, options: &StrategyOptions) {
        self.config = self.config.with_options(options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(
        primary: Option<&str>,
        failback: bool,
        detection_enabled: bool,
        detected: bool,
        active_active: bool,
    ) -> StrategyOptions {
        let mut opts = StrategyOptions::default();
        if let Some(primary) = primary {
            opts.insert(
                option_keys::CONFIGURED_PRIMARY.into(),
                OptionValue::Id(primary.into()),
            );
        }
        opts.insert(
            option_keys::FAILBACK_TO_PRIMARY.into(),
            OptionValue::Bool(failback),
        );
        opts.insert(
            option_keys::NETWORK_PARTITION_DETECTION_ENABLED.into(),
            OptionValue::Bool(detection_enabled),
        );
        opts.insert(
            option_keys::NETWORK_PARTITION_DETECTED.into(),
            OptionValue::Bool(detected),
        );
        opts.insert(
            option_keys::ACTIVE_ACTIVE_DEPLOYMENT.into(),
            OptionValue::Bool(active_active),
        );
        opts
    }

    fn node(id: &str) -> Participant {
        Participant::new(id, 1, 0, 0)
    }

    #[test]
    fn secondary_takes_over_until_partition_detected() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), true, true, false, false));
        let secondary = node("node-b");

        assert_eq!(
            s.on_heartbeat_not_received(Follower(&secondary)),
            HeartbeatNotReceivedAction::BecomeLeader
        );

        s.update_strategy(&options(Some("node-a"), true, true, true, false));
        assert_eq!(
            s.on_heartbeat_not_received(Follower(&secondary)),
            HeartbeatNotReceivedAction::None
        );
    }

    #[test]
    fn primary_acts_even_during_partition() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), true, true, true, false));
        let primary = node("node-a");

        assert_eq!(
            s.on_heartbeat_not_received(Follower(&primary)),
            HeartbeatNotReceivedAction::BecomeLeader
        );
        assert_eq!(
            s.on_election_timeout(Candidate(&primary)),
            ElectionTimeoutAction::BecomeLeader
        );
        assert_eq!(s.on_data_sent(Leader(&primary)), DataSentAction::None);
    }

    #[test]
    fn active_active_secondary_acts_during_partition() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), false, true, true, true));
        let secondary = node("node-b");

        assert_eq!(
            s.on_heartbeat_not_received(Follower(&secondary)),
            HeartbeatNotReceivedAction::BecomeLeader
        );
        assert_eq!(
            s.on_election_timeout(Candidate(&secondary)),
            ElectionTimeoutAction::BecomeLeader
        );
        assert_eq!(s.on_data_sent(Leader(&secondary)), DataSentAction::None);
    }

    #[test]
    fn passive_secondary_leader_stands_down_during_partition() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), false, true, true, false));
        let secondary = node("node-b");

        assert_eq!(
            s.on_data_sent(Leader(&secondary)),
            DataSentAction::BecomeFollower
        );
        assert_eq!(
            s.on_election_timeout(Candidate(&secondary)),
            ElectionTimeoutAction::None
        );
    }

    #[test]
    fn synced_primary_triggers_failback() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), true, false, false, false));
        assert_eq!(
            s.on_participant_synced(&node("node-a")),
            ParticipantSyncedAction::ResetElectionTermAndBecomeFollower
        );
        assert_eq!(
            s.on_participant_synced(&node("node-b")),
            ParticipantSyncedAction::None
        );

        s.update_strategy(&options(Some("node-a"), false, false, false, false));
        assert_eq!(
            s.on_participant_synced(&node("node-a")),
            ParticipantSyncedAction::None
        );
    }

    #[test]
    fn dual_leaders_resolved_by_failback_setting() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), true, false, false, false));
        let primary = node("node-a");
        let secondary = node("node-b");

        // Failback on: the secondary yields to the returning primary's data.
        assert_eq!(
            s.on_data_received(Leader(&secondary), Leader(&primary)),
            DataReceivedAction::ClearStateAndBecomeFollower
        );
        assert_eq!(
            s.on_data_received(Leader(&primary), Leader(&secondary)),
            DataReceivedAction::None
        );

        // Failback off: the primary keeps the acting leader's data.
        s.update_strategy(&options(Some("node-a"), false, false, false, false));
        assert_eq!(
            s.on_data_received(Leader(&primary), Leader(&secondary)),
            DataReceivedAction::ClearStateAndBecomeFollower
        );
        assert_eq!(
            s.on_data_received(Leader(&secondary), Leader(&primary)),
            DataReceivedAction::None
        );
    }

    #[test]
    fn vote_callbacks_are_bypassed() {
        let mut s = TwoNodeStrategy::new();
        s.update_strategy(&options(Some("node-a"), true, false, false, false));
        let primary = node("node-a");
        let secondary = node("node-b");

        assert_eq!(
            s.on_vote_received(Candidate(&primary), 2),
            VoteReceivedAction::None
        );
        assert_eq!(
            s.on_vote_request_received(&secondary, Candidate(&primary), None),
            VoteRequestReceivedAction::None
        );
    }

    #[test]
    fn options_round_trip() {
        let mut s = TwoNodeStrategy::new();
        assert!(!s.is_configured_primary(&node("node-a")));

        let mut opts = StrategyOptions::default();
        opts.insert(
            option_keys::CONFIGURED_PRIMARY.into(),
            OptionValue::Id("node-a".into()),
        );
        opts.insert(
            option_keys::FAILBACK_TO_PRIMARY.into(),
            OptionValue::Bool(true),
        );
        s.update_strategy(&opts);

        assert!(s.is_configured_primary(&node("node-a")));
        assert!(!s.is_configured_primary(&node("node-b")));
        assert!(s.config().failback_to_primary);
    }

    #[test]
    fn unknown_and_mistyped_options_are_ignored() {
        let mut s = TwoNodeStrategy::new();
        let mut opts = StrategyOptions::default();
        opts.insert("someFutureOption".into(), OptionValue::Bool(true));
        opts.insert(
            option_keys::FAILBACK_TO_PRIMARY.into(),
            OptionValue::Id("node-a".into()),
        );
        s.update_strategy(&opts);
        assert_eq!(s.config(), &TwoNodeConfig::default());
    }
}
