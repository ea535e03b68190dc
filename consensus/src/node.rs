use std::cmp;
use std::time::Duration;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use rand::Rng;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};
use tracing::{debug, info};

use crate::action::{
    DataReceivedAction, DataSentAction, ElectionTimeoutAction, HeartbeatNotReceivedAction,
    ParticipantSyncedAction, VoteReceivedAction, VoteRequestReceivedAction,
};
use crate::msg::{
    LogEntry, NodeSummary, Payload, RaftMsg, ELECTION_TIMEOUT_MS_HIGH, ELECTION_TIMEOUT_MS_LOW,
    HEARTBEAT_DURATION, PAYLOAD_VERSION, RAFT_VERSION,
};
use crate::participant::{Candidate, Follower, Leader, Participant, ParticipantId, Term};
use crate::strategy::{ConsensusStrategy, StrategyOptions};

/// Control requests the owning harness can make of a running node.
pub enum NodeCtl {
    UpdateStrategy {
        options: StrategyOptions,
    },
    Summary {
        tx: oneshot::Sender<NodeSummary>,
    },
    /// Reinitialize volatile state, simulating a process restart without
    /// durable storage.
    Reset,
    Shutdown,
}

#[derive(Clone, Debug)]
enum Role {
    Follower,
    Candidate {
        votes: HashSet<ParticipantId>,
    },
    Leader {
        /// For each peer, index of the next log entry to send to it.
        next_index: HashMap<ParticipantId, u64>,
        /// For each peer, highest log index known to be replicated on it.
        match_index: HashMap<ParticipantId, u64>,
    },
}

/// The vote cast for the current election term, if any. Cleared only when
/// the term advances.
#[derive(Clone, Debug, Default)]
struct VoteRecord {
    term: Term,
    voted_for: Option<ParticipantId>,
}

/// Runtime for one cluster participant.
///
/// Owns the replicated log, current term, vote record and timers, and defers
/// every role-transition decision to the configured [`ConsensusStrategy`].
/// Messages travel over channels as `(peer, msg)` pairs; delivery is the
/// harness's (or a real transport's) problem.
pub struct Node {
    id: ParticipantId,
    peers: Vec<ParticipantId>,
    strategy: Box<dyn ConsensusStrategy + Send + Sync>,
    role: Role,
    term: Term,
    /// The 0th entry is always a placeholder.
    log: Vec<LogEntry>,
    /// Index of the highest log entry known to be committed.
    commit_index: u64,
    vote: VoteRecord,
    /// Next timeout (election timeout for non-leaders, heartbeat timeout for
    /// the leader).
    next_timeout: Instant,
    // Channels
    incoming_rx: mpsc::Receiver<(ParticipantId, RaftMsg)>,
    outgoing_tx: mpsc::Sender<(ParticipantId, RaftMsg)>,
    client_rx: mpsc::Receiver<Payload>,
    ctl_rx: mpsc::Receiver<NodeCtl>,
}

impl Node {
    pub fn new(
        id: ParticipantId,
        peers: Vec<ParticipantId>,
        strategy: Box<dyn ConsensusStrategy + Send + Sync>,
        incoming_rx: mpsc::Receiver<(ParticipantId, RaftMsg)>,
        outgoing_tx: mpsc::Sender<(ParticipantId, RaftMsg)>,
        client_rx: mpsc::Receiver<Payload>,
        ctl_rx: mpsc::Receiver<NodeCtl>,
    ) -> Self {
        Self {
            id,
            peers,
            strategy,
            role: Role::Follower,
            term: 0,
            log: vec![placeholder_entry()],
            commit_index: 0,
            vote: VoteRecord::default(),
            next_timeout: Instant::now() + random_timeout(),
            incoming_rx,
            outgoing_tx,
            client_rx,
            ctl_rx,
        }
    }

    pub async fn run(&mut self) {
        loop {
            let sleep = time::sleep_until(self.next_timeout);
            tokio::select! {
                Some((from, msg)) = self.incoming_rx.recv() => {
                    self.receive_message(from, msg).await;
                }
                Some(payload) = self.client_rx.recv() => {
                    self.apply_cmd(payload).await;
                }
                Some(ctl) = self.ctl_rx.recv() => {
                    if !self.handle_ctl(ctl).await {
                        return;
                    }
                }
                _ = sleep => {
                    self.handle_timeout().await;
                }
            }
        }
    }

    async fn handle_ctl(&mut self, ctl: NodeCtl) -> bool {
        match ctl {
            NodeCtl::UpdateStrategy { options } => {
                self.strategy.update_strategy(&options);
            }
            NodeCtl::Summary { tx } => {
                // The requester may have gone away; that's fine.
                let _ = tx.send(self.summary());
            }
            NodeCtl::Reset => self.reset(),
            NodeCtl::Shutdown => return false,
        }
        true
    }

    fn reset(&mut self) {
        info!(id = %self.id, "resetting node state");
        self.role = Role::Follower;
        self.term = 0;
        self.log = vec![placeholder_entry()];
        self.commit_index = 0;
        self.vote = VoteRecord::default();
        self.reset_timeout();
    }

    /// Apply a client command. Only the leader accepts commands.
    async fn apply_cmd(&mut self, payload: Payload) {
        if !matches!(self.role, Role::Leader { .. }) {
            debug!(id = %self.id, "dropping client command at non-leader");
            return;
        }
        let index = self.log.len() as u64;
        let entry = LogEntry {
            index,
            term: self.term,
            payload,
        };
        self.log.push(entry.clone());
        let prev = &self.log[index as usize - 1];
        let (prev_log_index, prev_log_term) = (prev.index, prev.term);
        // A cluster of one commits immediately.
        self.advance_commit(index);
        let msg = self.create_append_entries(prev_log_index, prev_log_term, vec![entry]);
        self.broadcast(msg).await;
    }

    async fn handle_timeout(&mut self) {
        let me = self.snapshot();
        match &self.role {
            Role::Follower => match self.strategy.on_heartbeat_not_received(Follower(&me)) {
                HeartbeatNotReceivedAction::BecomeLeader => {
                    self.term += 1;
                    self.become_leader().await;
                }
                HeartbeatNotReceivedAction::BecomeCandidate => self.start_election().await,
                HeartbeatNotReceivedAction::None => self.reset_timeout(),
            },
            Role::Candidate { .. } => match self.strategy.on_election_timeout(Candidate(&me)) {
                ElectionTimeoutAction::BecomeLeader => self.become_leader().await,
                ElectionTimeoutAction::RequestVote => self.start_election().await,
                ElectionTimeoutAction::None => self.reset_timeout(),
            },
            Role::Leader { .. } => match self.strategy.on_data_sent(Leader(&me)) {
                DataSentAction::BecomeFollower => {
                    info!(id = %self.id, term = self.term, "leader standing down");
                    self.become_follower();
                }
                DataSentAction::None => {
                    self.broadcast_heartbeat().await;
                    self.next_timeout = Instant::now() + HEARTBEAT_DURATION;
                }
            },
        }
    }

    async fn receive_message(&mut self, from: ParticipantId, msg: RaftMsg) {
        use RaftMsg::*;
        match msg {
            RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                self.receive_vote_request(term, candidate_id, last_log_index, last_log_term)
                    .await;
            }
            RequestVoteReply { term, vote_granted } => {
                self.receive_vote_reply(from, term, vote_granted).await;
            }
            AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                ..
            } => {
                self.receive_append_entries(
                    term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit,
                )
                .await;
            }
            AppendEntriesReply {
                term,
                follower_id,
                match_index,
                success,
            } => {
                self.receive_append_entries_reply(term, follower_id, match_index, success)
                    .await;
            }
            InstallSnapshotReply {
                term,
                follower_id,
                chunk_index,
                success,
            } => {
                // Snapshot transfer is owned by an external collaborator.
                debug!(
                    id = %self.id,
                    term, follower = %follower_id, chunk_index, success,
                    "ignoring snapshot ack"
                );
            }
        }
    }

    async fn receive_vote_request(
        &mut self,
        term: Term,
        candidate_id: ParticipantId,
        last_log_index: i64,
        last_log_term: Term,
    ) {
        let me = self.snapshot();
        let candidate = Participant::new(candidate_id.clone(), term, last_log_index, last_log_term);
        let voted_for = if self.vote.term == term {
            self.vote.voted_for.as_deref()
        } else {
            None
        };
        let action = self
            .strategy
            .on_vote_request_received(&me, Candidate(&candidate), voted_for);
        debug!(id = %self.id, candidate = %candidate_id, term, ?action, "vote request");
        match action {
            VoteRequestReceivedAction::None => {
                // A denied candidate still carries term information; without
                // adopting it, a member whose term inflated while partitioned
                // off could wedge the cluster on rejoin.
                if term > self.term {
                    self.term = term;
                    if !matches!(self.role, Role::Follower) {
                        self.become_follower();
                    }
                }
                let reply = RaftMsg::RequestVoteReply {
                    term: self.term,
                    vote_granted: false,
                };
                self.send(candidate_id, reply).await;
            }
            granted => {
                if matches!(granted, VoteRequestReceivedAction::GrantVoteAndClearState) {
                    self.clear_state();
                    // Adopt the candidate's term outright so its data is
                    // accepted once it leads, even if our term was ahead.
                    self.term = term;
                } else if term > self.term {
                    self.term = term;
                }
                self.vote = VoteRecord {
                    term,
                    voted_for: Some(candidate_id.clone()),
                };
                if matches!(self.role, Role::Follower) {
                    self.reset_timeout();
                } else {
                    self.become_follower();
                }
                let reply = RaftMsg::RequestVoteReply {
                    term,
                    vote_granted: true,
                };
                self.send(candidate_id, reply).await;
            }
        }
    }

    async fn receive_vote_reply(&mut self, from: ParticipantId, term: Term, vote_granted: bool) {
        if term > self.term {
            self.term = term;
            self.become_follower();
            return;
        }
        if !vote_granted || term != self.term {
            return;
        }
        let me = self.snapshot();
        let should_lead = if let Role::Candidate { votes } = &mut self.role {
            votes.insert(from);
            let count = votes.len() as u32;
            matches!(
                self.strategy.on_vote_received(Candidate(&me), count),
                VoteReceivedAction::BecomeLeader
            )
        } else {
            false
        };
        if should_lead {
            self.become_leader().await;
        }
    }

    async fn receive_append_entries(
        &mut self,
        term: Term,
        leader_id: ParticipantId,
        prev_log_index: u64,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) {
        if matches!(self.role, Role::Leader { .. }) {
            // Conflicting leadership goes through the strategy.
            let me = self.snapshot();
            let sender_last_index = prev_log_index + entries.len() as u64;
            let sender_last_term = entries.last().map(|e| e.term).unwrap_or(prev_log_term);
            let sender = Participant::new(
                leader_id.clone(),
                term,
                sender_last_index as i64,
                sender_last_term,
            );
            match self.strategy.on_data_received(Leader(&me), Leader(&sender)) {
                DataReceivedAction::None => {
                    if term < self.term {
                        let reply = RaftMsg::AppendEntriesReply {
                            term: self.term,
                            follower_id: self.id.clone(),
                            match_index: 0,
                            success: false,
                        };
                        self.send(leader_id, reply).await;
                    }
                    return;
                }
                DataReceivedAction::BecomeFollower => {
                    info!(id = %self.id, other = %leader_id, "yielding leadership");
                    self.term = cmp::max(self.term, term);
                    self.become_follower();
                }
                DataReceivedAction::ClearStateAndBecomeFollower => {
                    info!(id = %self.id, other = %leader_id, "yielding leadership and state");
                    self.clear_state();
                    self.term = term;
                    self.become_follower();
                }
            }
        } else if matches!(self.role, Role::Candidate { .. }) && term >= self.term {
            self.term = term;
            self.become_follower();
        }
        if !matches!(self.role, Role::Follower) {
            return;
        }

        if term < self.term {
            let reply = RaftMsg::AppendEntriesReply {
                term: self.term,
                follower_id: self.id.clone(),
                match_index: 0,
                success: false,
            };
            self.send(leader_id, reply).await;
            return;
        }
        self.term = term;
        self.reset_timeout();

        // Are we ready for this list of entries?
        let prev = prev_log_index as usize;
        if prev >= self.log.len() || self.log[prev].term != prev_log_term {
            let reply = RaftMsg::AppendEntriesReply {
                term,
                follower_id: self.id.clone(),
                match_index: 0,
                success: false,
            };
            self.send(leader_id, reply).await;
            return;
        }

        let appended = entries.len() as u64;
        // Overwrite any indexes that are already filled, then push new
        // entries.
        for entry in entries {
            let idx = entry.index as usize;
            if idx == self.log.len() {
                self.log.push(entry);
            } else if idx < self.log.len() {
                self.log[idx] = entry;
            }
        }
        let last_index = self.last_log().0;
        if leader_commit > self.commit_index {
            self.commit_index = cmp::min(leader_commit, last_index);
        }
        // Heartbeats are acknowledged too; the leader relies on replies to
        // observe that a follower has caught up.
        let reply = RaftMsg::AppendEntriesReply {
            term,
            follower_id: self.id.clone(),
            match_index: prev_log_index + appended,
            success: true,
        };
        self.send(leader_id, reply).await;
    }

    async fn receive_append_entries_reply(
        &mut self,
        term: Term,
        follower_id: ParticipantId,
        match_index: u64,
        success: bool,
    ) {
        if term > self.term {
            self.term = term;
            self.become_follower();
            return;
        }
        if term != self.term {
            return;
        }
        let (last_index, last_term) = self.last_log();
        let mut synced: Option<Participant> = None;
        let mut resend_from: Option<u64> = None;
        if let Role::Leader {
            next_index,
            match_index: matches,
        } = &mut self.role
        {
            if success {
                let prev_match = matches.get(&follower_id).copied().unwrap_or(0);
                let high = cmp::max(match_index, prev_match);
                matches.insert(follower_id.clone(), high);
                next_index.insert(follower_id.clone(), high + 1);
                if high == last_index && prev_match < last_index {
                    synced = Some(Participant::new(
                        follower_id.clone(),
                        term,
                        last_index as i64,
                        last_term,
                    ));
                }
            } else {
                // The follower wasn't ready for the entries we sent; back up
                // and try an earlier suffix.
                let next = next_index.get(&follower_id).copied().unwrap_or(1);
                if next > 1 {
                    next_index.insert(follower_id.clone(), next - 1);
                    resend_from = Some(next - 1);
                }
            }
        } else {
            return;
        }
        if success {
            self.advance_commit(match_index);
        }
        if let Some(from_index) = resend_from {
            self.resend_entries(follower_id, from_index).await;
        }
        if let Some(follower) = synced {
            self.notify_participant_synced(follower).await;
        }
    }

    /// Commit `candidate_index` once a majority of the member set holds it.
    fn advance_commit(&mut self, candidate_index: u64) {
        if candidate_index <= self.commit_index || candidate_index >= self.log.len() as u64 {
            return;
        }
        let cluster_size = self.peers.len() as u64 + 1;
        if let Role::Leader { match_index, .. } = &self.role {
            let replicated = match_index
                .values()
                .filter(|idx| **idx >= candidate_index)
                .count() as u64;
            // The leader implicitly counts itself.
            if (replicated + 1) * 2 > cluster_size {
                self.commit_index = candidate_index;
            }
        }
    }

    async fn resend_entries(&mut self, dest: ParticipantId, from_index: u64) {
        let prev = &self.log[from_index as usize - 1];
        let (prev_log_index, prev_log_term) = (prev.index, prev.term);
        let entries: Vec<LogEntry> = self.log[from_index as usize..].to_vec();
        let msg = self.create_append_entries(prev_log_index, prev_log_term, entries);
        self.send(dest, msg).await;
    }

    async fn notify_participant_synced(&mut self, follower: Participant) {
        match self.strategy.on_participant_synced(&follower) {
            ParticipantSyncedAction::ResetElectionTermAndBecomeFollower => {
                info!(id = %self.id, synced = %follower.id, "yielding to synced participant");
                self.term = 0;
                self.vote = VoteRecord::default();
                self.become_follower();
            }
            ParticipantSyncedAction::BecomeCandidate => self.start_election().await,
            ParticipantSyncedAction::None => {}
        }
    }

    async fn start_election(&mut self) {
        self.term += 1;
        self.vote = VoteRecord {
            term: self.term,
            voted_for: Some(self.id.clone()),
        };
        let mut votes = HashSet::new();
        votes.insert(self.id.clone());
        self.role = Role::Candidate { votes };
        self.reset_timeout();
        debug!(id = %self.id, term = self.term, "starting election");
        let (last_log_index, last_log_term) = self.last_log();
        let msg = RaftMsg::RequestVote {
            term: self.term,
            candidate_id: self.id.clone(),
            last_log_index: last_log_index as i64,
            last_log_term,
        };
        self.broadcast(msg).await;
    }

    async fn become_leader(&mut self) {
        info!(id = %self.id, term = self.term, "assuming leadership");
        // Entries past the commit index were never acknowledged by a quorum.
        self.log.truncate(self.commit_index as usize + 1);
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in &self.peers {
            next_index.insert(peer.clone(), self.log.len() as u64);
            match_index.insert(peer.clone(), 0);
        }
        self.role = Role::Leader {
            next_index,
            match_index,
        };
        self.next_timeout = Instant::now() + HEARTBEAT_DURATION;
        self.broadcast_heartbeat().await;
    }

    fn become_follower(&mut self) {
        self.role = Role::Follower;
        self.reset_timeout();
    }

    /// Drop replicated state, keeping only the placeholder entry. Policy
    /// told us another participant's state wins wholesale.
    fn clear_state(&mut self) {
        debug!(id = %self.id, "clearing replicated state");
        self.log = vec![placeholder_entry()];
        self.commit_index = 0;
        self.vote = VoteRecord::default();
    }

    async fn broadcast_heartbeat(&self) {
        let commit = self.commit_index as usize;
        let msg =
            self.create_append_entries(self.commit_index, self.log[commit].term, Vec::new());
        self.broadcast(msg).await;
    }

    fn create_append_entries(
        &self,
        prev_log_index: u64,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
    ) -> RaftMsg {
        RaftMsg::AppendEntries {
            term: self.term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
            replicated_to_all_index: self.replicated_to_all_index(),
            payload_version: PAYLOAD_VERSION,
            leader_raft_version: RAFT_VERSION,
            leader_address: None,
        }
    }

    fn replicated_to_all_index(&self) -> i64 {
        match &self.role {
            Role::Leader { match_index, .. } => match_index
                .values()
                .copied()
                .min()
                .map(|m| cmp::min(m, self.commit_index) as i64)
                .unwrap_or(self.commit_index as i64),
            _ => -1,
        }
    }

    async fn broadcast(&self, msg: RaftMsg) {
        for peer in &self.peers {
            self.outgoing_tx
                .send((peer.clone(), msg.clone()))
                .await
                .expect("failed to send message");
        }
    }

    async fn send(&self, dest: ParticipantId, msg: RaftMsg) {
        self.outgoing_tx
            .send((dest, msg))
            .await
            .expect("failed to send message");
    }

    fn snapshot(&self) -> Participant {
        let (last_log_index, last_log_term) = self.last_log();
        Participant::new(
            self.id.clone(),
            self.term,
            last_log_index as i64,
            last_log_term,
        )
    }

    fn last_log(&self) -> (u64, Term) {
        let last = self.log.last().expect("log always has a placeholder");
        (last.index, last.term)
    }

    fn reset_timeout(&mut self) {
        self.next_timeout = Instant::now() + random_timeout();
    }

    fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id.clone(),
            term: self.term,
            is_leader: matches!(self.role, Role::Leader { .. }),
            commit_index: self.commit_index,
            log: self.log.clone(),
        }
    }
}

fn placeholder_entry() -> LogEntry {
    LogEntry {
        index: 0,
        term: 0,
        payload: Vec::new(),
    }
}

fn random_timeout() -> Duration {
    let mut rng = rand::thread_rng();
    let ms: u64 = rng.gen_range(ELECTION_TIMEOUT_MS_LOW..ELECTION_TIMEOUT_MS_HIGH);
    Duration::from_millis(ms)
}
