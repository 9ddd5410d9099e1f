use mqk_testkit::{TestCluster, TestClusterConfig};

#[tokio::test]
async fn a_participant_killed_before_voting_counts_as_a_no() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge");

    // Kill node_id 1 (index 0) before health's checker loop has a chance
    // to mark it DOWN, so it is still in the coordinator's participant set
    // when PREPARE goes out.
    cluster.kill(0).await;

    let reply = cluster
        .client_statement(1, "INSERT INTO users(name,email) VALUES('X','x@e')")
        .await
        .unwrap();

    assert!(!reply.ok, "a missing vote must abort the transaction");
    assert!(reply.error.as_deref().unwrap_or_default().contains("ABORTED"));

    for idx in [1usize, 2usize] {
        assert_eq!(
            cluster.nodes[idx].node.txn.in_flight_transaction_count().await,
            0,
            "surviving node {idx} must hold no pending transaction after the abort"
        );
        assert_eq!(cluster.rows_of(idx, "users").await.len(), 0);
    }
}
