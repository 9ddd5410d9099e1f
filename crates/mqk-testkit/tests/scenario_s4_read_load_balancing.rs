use mqk_testkit::{TestCluster, TestClusterConfig};

#[tokio::test]
async fn round_robin_spreads_nine_selects_evenly_across_three_nodes() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge");

    let reply = cluster
        .client_statement(0, "INSERT INTO users(name,email) VALUES('X','x@e')")
        .await
        .unwrap();
    assert!(reply.ok);

    let before: Vec<usize> = cluster.nodes.iter().map(|n| n.counting_backend.begin_count()).collect();

    for _ in 0..9 {
        let reply = cluster
            .client_statement(0, "SELECT email FROM users WHERE name='X'")
            .await
            .unwrap();
        assert!(reply.ok, "select should succeed: {:?}", reply.error);
    }

    let after: Vec<usize> = cluster.nodes.iter().map(|n| n.counting_backend.begin_count()).collect();
    let deltas: Vec<usize> = before.iter().zip(after.iter()).map(|(b, a)| a - b).collect();

    assert_eq!(deltas.iter().sum::<usize>(), 9, "all nine reads were served exactly once");
    for (idx, delta) in deltas.iter().enumerate() {
        assert_eq!(*delta, 3, "node {idx} should serve exactly 3 of 9 round-robin reads");
    }
}
