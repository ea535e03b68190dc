//! Per-event decision outcomes. Each strategy callback returns exactly one
//! value from the closed set for that event; the runtime applies the
//! corresponding transition.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataSentAction {
    BecomeFollower,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataReceivedAction {
    BecomeFollower,
    /// Drop local replicated state before stepping down. Used when policy
    /// dictates that the other leader's state wins wholesale.
    ClearStateAndBecomeFollower,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParticipantSyncedAction {
    /// Zero the election term and step down so the synced participant can
    /// win the next election without term conflicts.
    ResetElectionTermAndBecomeFollower,
    BecomeCandidate,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeartbeatNotReceivedAction {
    BecomeLeader,
    BecomeCandidate,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElectionTimeoutAction {
    BecomeLeader,
    RequestVote,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteReceivedAction {
    BecomeLeader,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteRequestReceivedAction {
    GrantVote,
    /// Grant and drop local replicated state. Covers a configured primary
    /// reclaiming leadership with older persisted state after a partition
    /// heals.
    GrantVoteAndClearState,
    None,
}
