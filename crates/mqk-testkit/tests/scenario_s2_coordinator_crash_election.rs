use mqk_testkit::{TestCluster, TestClusterConfig};

#[tokio::test]
async fn surviving_nodes_elect_the_next_highest_node_id() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    let before = cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge before the crash");
    assert_eq!(before.0, 3);
    let term_before = cluster.nodes[0].node.election.snapshot().term;

    cluster.kill(2).await; // node_id 3 is at index 2

    let after = cluster
        .wait_for_stable_coordinator_excluding(&[2], std::time::Duration::from_secs(3))
        .await
        .expect("surviving nodes must re-converge");
    assert_eq!(after.0, 2, "node 2 is the highest surviving node_id");

    let view_1 = cluster.nodes[0].node.election.snapshot();
    let view_2 = cluster.nodes[1].node.election.snapshot();
    assert_eq!(view_1.current_coordinator_id, Some(mqk_schemas::NodeId(2)));
    assert_eq!(view_2.current_coordinator_id, Some(mqk_schemas::NodeId(2)));
    assert_eq!(view_1.term, term_before + 1, "term advances by exactly one election");
    assert_eq!(view_2.term, term_before + 1);
}
