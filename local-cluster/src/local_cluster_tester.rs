use std::time::Duration;

use color_eyre::eyre::{bail, eyre};
use tokio::{sync::mpsc, time::sleep};
use tracing_subscriber::EnvFilter;

use duoraft_consensus::msg::{CtlMsg, LocalNodeSummary, Payload};
use duoraft_consensus::strategy::StrategyOptions;
use duoraft_consensus::{ParticipantId, Term};

use crate::{node_ids, Cluster, StrategyKind};

pub type Nodes = Vec<LocalNodeSummary>;

pub struct LocalClusterRunner {
    node_count: u32,
    ids: Vec<ParticipantId>,
    tx: mpsc::Sender<CtlMsg>,
    rx: mpsc::Receiver<CtlMsg>,
}

impl LocalClusterRunner {
    pub fn new(node_count: u32, kind: StrategyKind) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
        let (requests_tx, requests_rx) = mpsc::channel(1024);
        let (replies_tx, replies_rx) = mpsc::channel(1024);
        let mut c = Cluster::new(node_count, kind, requests_rx, replies_tx);
        tokio::spawn(async move {
            c.run().await;
        });
        Self {
            node_count,
            ids: node_ids(node_count),
            tx: requests_tx,
            rx: replies_rx,
        }
    }

    pub fn id(&self, index: usize) -> ParticipantId {
        self.ids[index % self.ids.len()].clone()
    }

    pub fn index_of(&self, id: &str) -> usize {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .expect("unknown node id")
    }

    pub async fn get_cluster_state(&mut self) -> Nodes {
        self.tx.send(CtlMsg::GetClusterState).await.unwrap();

        if let Some(CtlMsg::SendClusterState { nodes }) = self.rx.recv().await {
            Ok(nodes)
        } else {
            Err(eyre!("No state received!"))
        }
        .unwrap()
    }

    pub async fn sleep(&mut self, ms: u64) {
        sleep(Duration::from_millis(ms)).await;
    }

    pub async fn connect(&mut self, id: ParticipantId) {
        self.tx
            .send(CtlMsg::Connect { dest: id })
            .await
            .expect("Failed to send Connect");
    }

    pub async fn disconnect(&mut self, id: ParticipantId) {
        self.tx
            .send(CtlMsg::Disconnect { dest: id })
            .await
            .expect("Failed to send Disconnect");
    }

    pub async fn kill(&mut self, id: ParticipantId) {
        self.tx
            .send(CtlMsg::Kill { dest: id })
            .await
            .expect("Failed to send Kill");
    }

    pub async fn start(&mut self, id: ParticipantId) {
        self.tx
            .send(CtlMsg::Start { dest: id })
            .await
            .expect("Failed to send Start");
    }

    pub async fn update_strategy(&mut self, id: ParticipantId, options: StrategyOptions) {
        self.tx
            .send(CtlMsg::UpdateStrategy { dest: id, options })
            .await
            .expect("Failed to send UpdateStrategy");
    }

    // Only one leader at the highest term
    pub async fn check_one_leader(&mut self) -> Result<LocalNodeSummary, color_eyre::eyre::Error> {
        let iterations = 40;
        for _ in 0..iterations {
            self.sleep(100).await;
            let nodes = &self.get_cluster_state().await;
            let highest_leaders = leaders(nodes);
            match highest_leaders.len() {
                1 => return Ok(highest_leaders[0].clone()),
                l if l > 1 => bail!("More than one leader on the same term!"),
                _ => {}
            }
        }
        bail!("No leader elected in time!")
    }

    /// Polls until a single stable leader emerges, tolerating transient
    /// dual-leader windows that the two-node policies resolve on data
    /// exchange.
    pub async fn wait_for_leader(
        &mut self,
    ) -> Result<LocalNodeSummary, color_eyre::eyre::Error> {
        let iterations = 40;
        for _ in 0..iterations {
            self.sleep(100).await;
            let nodes = &self.get_cluster_state().await;
            let highest_leaders = leaders(nodes);
            if highest_leaders.len() == 1 {
                return Ok(highest_leaders[0].clone());
            }
        }
        bail!("No single leader emerged in time!")
    }

    /// Polls until `id` is the single leader at the highest term.
    pub async fn wait_for_leader_id(
        &mut self,
        id: ParticipantId,
    ) -> Result<LocalNodeSummary, color_eyre::eyre::Error> {
        let iterations = 100;
        for _ in 0..iterations {
            self.sleep(100).await;
            let nodes = &self.get_cluster_state().await;
            let highest_leaders = leaders(nodes);
            if highest_leaders.len() == 1 && highest_leaders[0].id == id {
                return Ok(highest_leaders[0].clone());
            }
        }
        bail!("{id} did not become the leader in time!")
    }

    pub async fn send_cmd(&mut self, dest: ParticipantId, payload: Payload) {
        self.tx
            .send(CtlMsg::SendCmd { dest, payload })
            .await
            .expect("Failed to send SendCmd");
    }

    pub async fn try_to_commit(&mut self, cmd: u32) -> Result<bool, color_eyre::eyre::Error> {
        let payload = cmd.to_le_bytes().to_vec();
        let Ok(leader) = self.check_one_leader().await else {
            bail!("No single leader!");
        };
        let leader_id = leader.id.clone();
        let term = leader.node.term;
        let next_commit_index = leader.node.commit_index + 1;
        self.send_cmd(leader_id.clone(), payload.clone()).await;
        for _ in 0..40 {
            self.sleep(100).await;
            let Ok(leader) = self.check_one_leader().await else {
                bail!("No single leader!");
            };
            if leader_id != leader.id {
                return Ok(false);
            }
            if leader.node.commit_index == next_commit_index {
                let entry = &leader.node.log[next_commit_index as usize];
                if entry.term != term || entry.payload != payload {
                    return Ok(false);
                }
                return Ok(self.is_highest_committed(next_commit_index).await);
            }
        }
        Ok(false)
    }

    pub async fn n_committed(&mut self, commit_index: u64) -> u32 {
        let mut count = 0;
        for node in &self.get_cluster_state().await {
            if node.node.commit_index >= commit_index {
                count += 1
            }
        }
        count
    }

    pub async fn is_highest_committed(&mut self, n: u64) -> bool {
        let mut count = 0;
        for node in &self.get_cluster_state().await {
            if node.node.commit_index == n {
                count += 1
            }
        }
        count > self.node_count / 2
    }

    pub async fn has_no_leader(&mut self) -> bool {
        leaders(&self.get_cluster_state().await).is_empty()
    }

    pub async fn current_term(&mut self) -> Term {
        let nodes = &self.get_cluster_state().await;
        nodes.iter().map(|n| n.node.term).max().unwrap_or(0)
    }

    pub async fn live_term_agreement(&mut self) -> bool {
        let nodes = &self.get_cluster_state().await;
        let mut term = None;
        for node in nodes {
            if node.is_dead || node.is_disconnected {
                continue;
            }
            match term {
                None => term = Some(node.node.term),
                Some(t) if t != node.node.term => return false,
                Some(_) => {}
            }
        }
        true
    }
}

impl Drop for LocalClusterRunner {
    fn drop(&mut self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tx.send(CtlMsg::Shutdown)
                .await
                .expect("Failed to send Shutdown");
        });
    }
}

fn leaders(nodes: &Nodes) -> Vec<LocalNodeSummary> {
    let mut highest_term = 0;
    let mut highest_leaders = Vec::new();
    for node in nodes {
        if node.is_dead || node.is_disconnected {
            continue;
        }
        if node.node.term > highest_term {
            highest_term = node.node.term;
            highest_leaders.clear();
        }
        if node.node.term == highest_term && node.node.is_leader {
            highest_leaders.push(node.clone());
        }
    }
    highest_leaders
}
