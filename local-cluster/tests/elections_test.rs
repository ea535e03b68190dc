use rand::prelude::SliceRandom;

use duoraft_consensus::msg::ELECTION_TIMEOUT_MS_HIGH;
use duoraft_local_cluster::local_cluster_tester::LocalClusterRunner;
use duoraft_local_cluster::StrategyKind;

/// Majority-quorum protocol tests ported from Go tests used for an MIT
/// Raft lab https://pdos.csail.mit.edu/6.824/labs/lab-raft.html

#[tokio::test]
async fn initial_election() {
    let mut cr = LocalClusterRunner::new(10, StrategyKind::Majority);
    assert!(cr.has_no_leader().await);

    cr.check_one_leader().await.unwrap();
    let term1 = cr.current_term().await;
    cr.sleep(500).await;
    assert!(cr.live_term_agreement().await);
    cr.sleep(1500).await;
    assert_eq!(term1, cr.current_term().await);
    cr.check_one_leader().await.unwrap();
}

/// election after network failure
#[tokio::test]
async fn re_election() {
    let node_count: usize = 3;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    let leader1 = cr.check_one_leader().await.unwrap();

    cr.disconnect(leader1.id.clone()).await;
    let leader2 = cr.check_one_leader().await.unwrap();

    cr.connect(leader1.id.clone()).await;
    assert_eq!(leader2.id, cr.check_one_leader().await.unwrap().id);

    let after_leader2 = cr.id(cr.index_of(&leader2.id) + 1);
    cr.disconnect(leader2.id.clone()).await;
    cr.disconnect(after_leader2.clone()).await;
    cr.sleep(4 * ELECTION_TIMEOUT_MS_HIGH).await;
    assert!(cr.has_no_leader().await);

    cr.connect(after_leader2).await;
    let leader3 = cr.check_one_leader().await.unwrap();

    cr.connect(leader2.id).await;
    cr.sleep(2000).await;
    assert_eq!(leader3.id, cr.check_one_leader().await.unwrap().id);
}

#[tokio::test]
async fn multiple_elections() {
    let node_count: usize = 7;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    cr.check_one_leader().await.unwrap();
    for _ in 0..10 {
        // disconnect three nodes
        let mut choices: Vec<usize> = (0..node_count).collect();
        choices.shuffle(&mut rand::thread_rng());
        let n1 = cr.id(choices[0]);
        let n2 = cr.id(choices[1]);
        let n3 = cr.id(choices[2]);
        cr.disconnect(n1.clone()).await;
        cr.disconnect(n2.clone()).await;
        cr.disconnect(n3.clone()).await;

        // either the current leader should still be alive,
        // or the remaining four should elect a new one.
        cr.check_one_leader().await.unwrap();

        cr.connect(n1).await;
        cr.connect(n2).await;
        cr.connect(n3).await;
    }
    cr.check_one_leader().await.unwrap();
}

#[tokio::test]
async fn basic_agreement() {
    let node_count: usize = 3;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    cr.check_one_leader().await.unwrap();
    for i in 1..4u64 {
        assert_eq!(cr.n_committed(i).await, 0);
        assert!(cr.try_to_commit(i as u32).await.unwrap());
    }
}

/// Test just failure of followers.
#[tokio::test]
async fn follower_failures() {
    let node_count: usize = 3;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    cr.try_to_commit(101).await.unwrap();

    let leader1 = cr.check_one_leader().await.unwrap();
    cr.disconnect(cr.id(cr.index_of(&leader1.id) + 1)).await;

    // the leader and remaining follower should be
    // able to agree despite the disconnected follower.
    cr.try_to_commit(102).await.unwrap();
    cr.sleep(ELECTION_TIMEOUT_MS_HIGH).await;
    cr.try_to_commit(103).await.unwrap();

    // disconnect the remaining follower
    let leader2 = cr.check_one_leader().await.unwrap();
    cr.disconnect(cr.id(cr.index_of(&leader2.id) + 1)).await;
    cr.disconnect(cr.id(cr.index_of(&leader2.id) + 2)).await;

    // submit a command.
    cr.send_cmd(leader2.id, 104u32.to_le_bytes().to_vec()).await;
    cr.sleep(2 * ELECTION_TIMEOUT_MS_HIGH).await;

    // check that command 104 did not commit.
    assert!(cr.n_committed(3).await > 0);
    assert_eq!(cr.n_committed(4).await, 0);
}

/// Test just failure of leaders.
#[tokio::test]
async fn leader_failures() {
    let node_count: usize = 3;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    cr.try_to_commit(101).await.unwrap();

    let leader1 = cr.check_one_leader().await.unwrap();
    cr.disconnect(leader1.id).await;

    // the remaining followers should elect
    // a new leader.
    cr.try_to_commit(102).await.unwrap();
    cr.sleep(ELECTION_TIMEOUT_MS_HIGH).await;
    cr.try_to_commit(103).await.unwrap();

    // disconnect the new leader
    let leader2 = cr.check_one_leader().await.unwrap();
    cr.disconnect(leader2.id).await;

    // submit a command to each server.
    for i in 0..node_count {
        cr.send_cmd(cr.id(i), 104u32.to_le_bytes().to_vec()).await;
    }
    cr.sleep(2 * ELECTION_TIMEOUT_MS_HIGH).await;

    // check that command 104 did not commit.
    assert!(cr.n_committed(3).await > node_count as u32 / 2);
    assert_eq!(cr.n_committed(4).await, 0);
}

/// agreement after follower reconnects
#[tokio::test]
async fn fail_agree() {
    let node_count: usize = 3;
    let mut cr = LocalClusterRunner::new(node_count as u32, StrategyKind::Majority);

    cr.try_to_commit(101).await.unwrap();

    // Disconnect a follower
    let leader1 = cr.check_one_leader().await.unwrap();
    let follower = cr.id(cr.index_of(&leader1.id) + 1);
    cr.disconnect(follower.clone()).await;

    // the leader and remaining follower should be
    // able to agree despite the disconnected follower.
    cr.try_to_commit(102).await.unwrap();
    cr.try_to_commit(103).await.unwrap();
    cr.sleep(ELECTION_TIMEOUT_MS_HIGH).await;
    cr.try_to_commit(104).await.unwrap();
    cr.try_to_commit(105).await.unwrap();

    // re-connect
    cr.connect(follower).await;

    // the full set of servers should preserve
    // previous agreements, and be able to agree
    // on new commands.
    cr.try_to_commit(106).await.unwrap();
    cr.sleep(ELECTION_TIMEOUT_MS_HIGH).await;
    cr.try_to_commit(107).await.unwrap();

    assert!(cr.n_committed(7).await > node_count as u32 / 2);
}
