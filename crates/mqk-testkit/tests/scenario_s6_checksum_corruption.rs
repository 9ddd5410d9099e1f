use mqk_messenger::frame;
use mqk_schemas::{Message, MessageKind, NodeId};
use mqk_testkit::{TestCluster, TestClusterConfig};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Mirrors `mqk-messenger`'s own
/// `detects_tampered_payload_as_checksum_mismatch` unit test, but end to
/// end against a running node: flips the payload after the checksum was
/// computed, the way a corrupted-in-transit frame would arrive, and sends
/// it straight over the wire.
fn tampered_prepare(sender: NodeId, txn_id: &str) -> Message {
    let mut msg = Message::new(
        sender,
        MessageKind::Prepare,
        json!({"txn_id": txn_id, "statement": "INSERT INTO users(name,email) VALUES('X','x@e')", "kind": "WRITE"}),
    );
    msg.payload = json!({"txn_id": txn_id, "statement": "INSERT INTO users(name,email) VALUES('TAMPERED','t@e')", "kind": "WRITE"});
    msg
}

#[tokio::test]
async fn corrupted_prepare_frame_is_dropped_silently() {
    let cluster = TestCluster::start(3, TestClusterConfig::default()).await;
    cluster
        .wait_for_stable_coordinator(std::time::Duration::from_secs(2))
        .await
        .expect("cluster must converge");

    let txn_id = "TXN-S6-TEST";
    let msg = tampered_prepare(NodeId(99), txn_id);
    assert!(!msg.checksum_valid(), "test fixture must actually be tampered");

    let target_addr = cluster.messenger_bind_addr(0);
    let mut stream = TcpStream::connect(target_addr).await.unwrap();
    stream.write_all(&frame::encode(&msg)).await.unwrap();
    stream.flush().await.unwrap();
    drop(stream);

    // Give the node's read loop time to process (and discard) the frame.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(
        cluster.txn_log_entries(0, txn_id).is_empty(),
        "a checksum-invalid PREPARE must never reach on_prepare"
    );
}
