use std::ops::Deref;

pub type Term = u64;
pub type ParticipantId = String;

/// Read-only snapshot of one cluster member, taken by the runtime just
/// before a strategy call. Strategies never mutate it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub term: Term,
    /// Index of the last log entry, -1 when the log is empty.
    pub last_log_index: i64,
    pub last_log_term: Term,
}

impl Participant {
    pub fn new(
        id: impl Into<ParticipantId>,
        term: Term,
        last_log_index: i64,
        last_log_term: Term,
    ) -> Self {
        Self {
            id: id.into(),
            term,
            last_log_index,
            last_log_term,
        }
    }
}

/// A participant currently replicating from a leader.
#[derive(Clone, Copy, Debug)]
pub struct Follower<'a>(pub &'a Participant);

/// A participant campaigning for leadership.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a>(pub &'a Participant);

/// A participant currently replicating to followers.
#[derive(Clone, Copy, Debug)]
pub struct Leader<'a>(pub &'a Participant);

impl Deref for Follower<'_> {
    type Target = Participant;

    fn deref(&self) -> &Participant {
        self.0
    }
}

impl Deref for Candidate<'_> {
    type Target = Participant;

    fn deref(&self) -> &Participant {
        self.0
    }
}

impl Deref for Leader<'_> {
    type Target = Participant;

    fn deref(&self) -> &Participant {
        self.0
    }
}
