use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use duoraft_consensus::msg::{LocalNodeSummary, Payload, RaftMsg};
use duoraft_consensus::strategy::StrategyOptions;
use duoraft_consensus::{ConsensusStrategy, Node, NodeCtl, ParticipantId};

pub enum LocalNodeMsg {
    Cmd {
        payload: Payload,
    },
    Msg {
        from: ParticipantId,
        msg: RaftMsg,
    },
    UpdateStrategy {
        options: StrategyOptions,
    },
    SummaryRequest {
        tx: oneshot::Sender<LocalNodeSummary>,
    },
    Kill,
    Start,
    Connect,
    Disconnect,
    Shutdown,
}

/// Simulates a node on a network but run locally. Wraps a consensus
/// [`Node`] task and drops traffic while the node is dead or disconnected.
pub struct LocalNode {
    pub id: ParticipantId,
    pub is_disconnected: bool,
    pub is_dead: bool,
    /// Channels for communicating with the simulated network
    incoming_rx: mpsc::Receiver<LocalNodeMsg>,
    outgoing_tx: mpsc::Sender<(ParticipantId, ParticipantId, RaftMsg)>,
    /// Channels for communicating with the consensus runtime
    node_incoming_tx: mpsc::Sender<(ParticipantId, RaftMsg)>,
    node_outgoing_rx: mpsc::Receiver<(ParticipantId, RaftMsg)>,
    node_client_tx: mpsc::Sender<Payload>,
    node_ctl_tx: mpsc::Sender<NodeCtl>,
}

impl LocalNode {
    pub fn new(
        id: ParticipantId,
        peers: Vec<ParticipantId>,
        strategy: Box<dyn ConsensusStrategy + Send + Sync>,
        incoming_rx: mpsc::Receiver<LocalNodeMsg>,
        outgoing_tx: mpsc::Sender<(ParticipantId, ParticipantId, RaftMsg)>,
    ) -> Self {
        let (node_incoming_tx, node_incoming_rx) = mpsc::channel(1024);
        let (node_outgoing_tx, node_outgoing_rx) = mpsc::channel(1024);
        let (node_client_tx, node_client_rx) = mpsc::channel(1024);
        let (node_ctl_tx, node_ctl_rx) = mpsc::channel(1024);

        let node_id = id.clone();
        tokio::spawn(async move {
            let mut node = Node::new(
                node_id,
                peers,
                strategy,
                node_incoming_rx,
                node_outgoing_tx,
                node_client_rx,
                node_ctl_rx,
            );
            node.run().await;
        });

        Self {
            id,
            is_disconnected: false,
            is_dead: false,
            incoming_rx,
            outgoing_tx,
            node_incoming_tx,
            node_outgoing_rx,
            node_client_tx,
            node_ctl_tx,
        }
    }

    pub async fn run(&mut self) {
        loop {
            use LocalNodeMsg::*;
            tokio::select! {
                Some(m) = self.incoming_rx.recv() => {
                    match m {
                        Msg { from, msg } => {
                            self.receive_message(from, msg).await;
                        }
                        Cmd { payload } => {
                            self.apply_cmd(payload).await;
                        }
                        UpdateStrategy { options } => {
                            // Configuration applies even while "down"; it
                            // belongs to the operator, not the network.
                            self.node_ctl_tx
                                .send(NodeCtl::UpdateStrategy { options })
                                .await
                                .expect("failed to forward strategy options");
                        }
                        SummaryRequest { tx } => {
                            let (node_tx, node_rx) = oneshot::channel();
                            self.node_ctl_tx
                                .send(NodeCtl::Summary { tx: node_tx })
                                .await
                                .expect("failed to request summary");
                            let node = node_rx.await.expect("failed to receive summary");
                            tx.send(LocalNodeSummary {
                                id: self.id.clone(),
                                is_dead: self.is_dead,
                                is_disconnected: self.is_disconnected,
                                node,
                            })
                            .expect("failed to reply with summary");
                        }
                        Kill => self.kill(),
                        Start => self.start().await,
                        Disconnect => self.disconnect(),
                        Connect => self.connect(),
                        Shutdown => {
                            let _ = self.node_ctl_tx.send(NodeCtl::Shutdown).await;
                            break;
                        }
                    }
                }
                Some((dest, msg)) = self.node_outgoing_rx.recv() => {
                    if self.is_dead || self.is_disconnected {
                        continue;
                    }
                    debug!(from = %self.id, to = %dest, "forwarding message");
                    self.outgoing_tx
                        .send((self.id.clone(), dest, msg))
                        .await
                        .expect("failed to forward message to cluster");
                }
            }
        }
    }

    async fn apply_cmd(&mut self, payload: Payload) {
        if self.is_dead {
            return;
        }
        self.node_client_tx
            .send(payload)
            .await
            .expect("failed to forward client command");
    }

    async fn receive_message(&mut self, from: ParticipantId, msg: RaftMsg) {
        if self.is_dead || self.is_disconnected {
            return;
        }
        self.node_incoming_tx
            .send((from, msg))
            .await
            .expect("failed to forward message to node");
    }

    fn kill(&mut self) {
        self.is_dead = true;
    }

    async fn start(&mut self) {
        if self.is_dead {
            self.is_dead = false;
            // Simulate starting fresh.
            self.node_ctl_tx
                .send(NodeCtl::Reset)
                .await
                .expect("failed to reset node");
        }
    }

    fn connect(&mut self) {
        self.is_disconnected = false;
    }

    fn disconnect(&mut self) {
        self.is_disconnected = true;
    }
}
