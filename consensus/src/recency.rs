use crate::participant::Participant;

/// Decides whether `candidate`'s log is current enough for `voter` to grant
/// it a vote.
///
/// A candidate on a stale term never wins. A voter that already voted for a
/// different candidate this term denies. Otherwise the logs are ordered by
/// `(last_log_term, last_log_index)`: a higher last term wins outright, and
/// with equal last terms the longer (or equal) log wins.
pub fn is_candidate_latest(
    voter: &Participant,
    candidate: &Participant,
    voted_for: Option<&str>,
) -> bool {
    if candidate.term < voter.term {
        return false;
    }
    match voted_for {
        Some(choice) if choice != candidate.id => false,
        _ => {
            candidate.last_log_term > voter.last_log_term
                || (candidate.last_log_term == voter.last_log_term
                    && candidate.last_log_index >= voter.last_log_index)
        }
    }
}
