//! In-process cluster simulation for exercising consensus strategies.
//!
//! One tokio task per [`LocalNode`], all routed through a [`Cluster`] that
//! plays the network. Nodes can be killed, restarted, connected and
//! disconnected, and their strategies reconfigured at runtime.

use std::collections::VecDeque;

use ahash::{HashMap, HashMapExt};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Duration, Instant},
};
use tracing::{debug, error, info};

pub mod local_cluster_tester;
pub mod local_node;

use crate::local_node::{LocalNode, LocalNodeMsg};
use duoraft_consensus::msg::{CtlMsg, Destinations, RaftMsg};
use duoraft_consensus::{
    ConsensusStrategy, ParticipantId, RaftStrategy, TwoNodeRaftStrategy, TwoNodeStrategy,
};

/// Which policy every node in the cluster runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrategyKind {
    Majority,
    TwoNode,
    TwoNodeRaft,
}

pub fn node_ids(node_count: u32) -> Vec<ParticipantId> {
    (0..node_count).map(|i| format!("node-{i}")).collect()
}

fn make_strategy(
    kind: StrategyKind,
    members: &[ParticipantId],
) -> Box<dyn ConsensusStrategy + Send + Sync> {
    match kind {
        StrategyKind::Majority => Box::new(RaftStrategy::new(members.iter().cloned())),
        StrategyKind::TwoNode => Box::new(TwoNodeStrategy::new()),
        StrategyKind::TwoNodeRaft => Box::new(TwoNodeRaftStrategy::new()),
    }
}

pub struct Cluster {
    /// Channels for sending to individual nodes
    node_txs: HashMap<ParticipantId, mpsc::Sender<LocalNodeMsg>>,
    /// Member ids in creation order, for stable summaries
    ids: Vec<ParticipantId>,
    /// Channel for messages from the cluster runner
    ctl_requests: mpsc::Receiver<CtlMsg>,
    /// Channel for sending messages to the cluster runner
    ctl_replies: mpsc::Sender<CtlMsg>,
    /// Channel for messages from nodes: (from, dest, msg)
    outgoing_rx: mpsc::Receiver<(ParticipantId, ParticipantId, RaftMsg)>,
    /// Pending messages to send.
    raft_msg_queue: VecDeque<(ParticipantId, ParticipantId, RaftMsg)>,
    ctl_msg_queue: VecDeque<CtlMsg>,
}

impl Cluster {
    pub fn new(
        node_count: u32,
        kind: StrategyKind,
        ctl_requests: mpsc::Receiver<CtlMsg>,
        ctl_replies: mpsc::Sender<CtlMsg>,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(1024);
        let ids = node_ids(node_count);
        let mut node_txs = HashMap::new();
        for id in &ids {
            let (incoming_tx, incoming_rx) = mpsc::channel(1024);
            let peers: Vec<ParticipantId> = ids.iter().filter(|p| *p != id).cloned().collect();
            let strategy = make_strategy(kind, &ids);
            let node_id = id.clone();
            let tx = outgoing_tx.clone();
            tokio::spawn(async move {
                let mut node = LocalNode::new(node_id, peers, strategy, incoming_rx, tx);
                node.run().await;
            });
            node_txs.insert(id.clone(), incoming_tx);
        }
        Self {
            node_txs,
            ids,
            ctl_requests,
            ctl_replies,
            outgoing_rx,
            raft_msg_queue: VecDeque::new(),
            ctl_msg_queue: VecDeque::new(),
        }
    }

    pub async fn run(&mut self) {
        let mut next_timeout = Instant::now() + Duration::from_millis(10);
        loop {
            self.send_from_queues().await;

            let sleep = time::sleep_until(next_timeout);
            tokio::select! {
                Some(msg) = self.ctl_requests.recv() => {
                    debug!(?msg, "cluster received control message");
                    if matches!(msg, CtlMsg::Shutdown) {
                        info!("shutting down local cluster");
                        return self.shutdown().await;
                    }
                    self.ctl_msg_queue.push_back(msg);
                }
                Some((from, dest, msg)) = self.outgoing_rx.recv() => {
                    self.raft_msg_queue.push_back((from, dest, msg));
                }
                _ = sleep => {}
            }
            next_timeout = Instant::now() + Duration::from_millis(10);
        }
    }

    /// Process messages sent from the cluster runner
    async fn process_ctl_msg(&mut self, msg: CtlMsg) {
        use CtlMsg::*;
        match msg {
            SendCmd { dest, payload } => {
                self.send_to_local_node(&dest, LocalNodeMsg::Cmd { payload })
                    .await;
            }
            UpdateStrategy { dest, options } => {
                self.send_to_local_node(&dest, LocalNodeMsg::UpdateStrategy { options })
                    .await;
            }
            GetClusterState => {
                let mut nodes = Vec::new();
                for id in self.ids.clone() {
                    let (tx, rx) = oneshot::channel();
                    self.send_to_local_node(&id, LocalNodeMsg::SummaryRequest { tx })
                        .await;
                    nodes.push(rx.await.expect("failed to receive node summary"));
                }
                self.ctl_replies
                    .send(SendClusterState { nodes })
                    .await
                    .expect("failed to send cluster state");
            }
            SendClusterState { .. } => {
                error!("cluster shouldn't receive SendClusterState");
            }
            Kill { dest } => {
                self.send_to_local_node(&dest, LocalNodeMsg::Kill).await;
            }
            Start { dest } => {
                self.send_to_local_node(&dest, LocalNodeMsg::Start).await;
            }
            Connect { dest } => {
                self.send_to_local_node(&dest, LocalNodeMsg::Connect).await;
            }
            Disconnect { dest } => {
                self.send_to_local_node(&dest, LocalNodeMsg::Disconnect).await;
            }
            Shutdown => {
                for tx in self.node_txs.values() {
                    let _ = tx.send(LocalNodeMsg::Shutdown).await;
                }
                panic!("Shutdown should already have been handled!");
            }
        }
    }

    async fn send_to_local_node(&mut self, dest: &ParticipantId, msg: LocalNodeMsg) {
        self.node_txs
            .get_mut(dest)
            .expect("unknown destination node")
            .send(msg)
            .await
            .expect("failed to send to local node");
    }

    /// If channels are not full, send messages to nodes.
    async fn send_from_queues(&mut self) {
        while let Some((_, dest, _)) = self.raft_msg_queue.front() {
            if !self.can_send_to_node(dest) {
                break;
            }
            let (from, dest, msg) = self.raft_msg_queue.pop_front().unwrap();
            self.send_to_local_node(&dest, LocalNodeMsg::Msg { from, msg })
                .await;
        }
        while let Some(msg) = self.ctl_msg_queue.front() {
            if !self.can_send_ctl_msg(msg) {
                break;
            }
            let msg = self.ctl_msg_queue.pop_front().unwrap();
            self.process_ctl_msg(msg).await;
        }
    }

    fn can_send_ctl_msg(&self, msg: &CtlMsg) -> bool {
        match msg.destinations() {
            Destinations::All => self.can_send_to_all_nodes(),
            Destinations::One(dest) => self.can_send_to_node(&dest),
            Destinations::None => panic!("Shouldn't have queued a message with no destination!"),
        }
    }

    fn can_send_to_all_nodes(&self) -> bool {
        self.node_txs.keys().all(|id| self.can_send_to_node(id))
    }

    fn can_send_to_node(&self, id: &ParticipantId) -> bool {
        !self
            .node_txs
            .get(id)
            .expect("unknown destination node")
            .is_closed()
    }

    async fn shutdown(&mut self) {
        for tx in self.node_txs.values() {
            let _ = tx.send(LocalNodeMsg::Shutdown).await;
        }
    }
}
