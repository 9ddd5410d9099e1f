use mqk_testkit::{TestCluster, TestClusterConfig};

#[tokio::test]
async fn uniqueness_conflict_aborts_the_whole_transaction() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge");

    for idx in 0..3 {
        cluster.nodes[idx]
            .fake_backend
            .with_unique_column("users", "email")
            .await;
    }

    let reply = cluster
        .client_statement(0, "INSERT INTO users(name,email) VALUES('Alice','alice@example.com')")
        .await
        .unwrap();
    assert!(reply.ok, "first insert should succeed: {:?}", reply.error);

    let reply = cluster
        .client_statement(1, "INSERT INTO users(name,email) VALUES('Y','alice@example.com')")
        .await
        .unwrap();
    assert!(!reply.ok, "duplicate email must be rejected");
    assert!(reply.error.as_deref().unwrap_or_default().contains("ABORTED"));

    for idx in 0..3 {
        let rows = cluster.rows_of(idx, "users").await;
        assert_eq!(rows.len(), 1, "node {idx} must not see the aborted row");
    }

    let txn_id = reply.txn_id.expect("aborted reply still carries its txn_id");
    let coordinator_entries = cluster.txn_log_entries(2, &txn_id);
    assert!(
        coordinator_entries
            .iter()
            .any(|e| e.status == mqk_schemas::TxnPhase::Aborted),
        "coordinator's own transactions_log must record the abort"
    );
}
