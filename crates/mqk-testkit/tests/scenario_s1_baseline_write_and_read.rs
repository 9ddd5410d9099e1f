use mqk_testkit::{TestCluster, TestClusterConfig};

#[tokio::test]
async fn baseline_write_then_read_from_every_node() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    let coordinator = cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge on a coordinator");
    assert_eq!(coordinator.0, 3, "highest node_id wins the bully election");

    let reply = cluster
        .client_statement(0, "INSERT INTO users(name,email) VALUES('X','x@e')")
        .await
        .unwrap();
    assert!(reply.ok, "write should succeed: {:?}", reply.error);

    for idx in 0..3 {
        let reply = cluster
            .client_statement(idx, "SELECT email FROM users WHERE name='X'")
            .await
            .unwrap();
        assert!(reply.ok, "read from node {idx} should succeed: {:?}", reply.error);
        let rows = reply.rows.expect("select reply carries rows");
        assert_eq!(rows.len(), 1, "node {idx} should see the committed row");
        assert_eq!(rows[0].get("email").and_then(|v| v.as_str()), Some("x@e"));
    }
}
