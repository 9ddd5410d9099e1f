//! Inter-node message envelope.
//!
//! `Message` is the body the Framed Messenger carries inside its
//! length-prefixed frame. `checksum` is a hex-encoded SHA-256 digest over
//! the canonical JSON serialization of `payload`, computed by the sender
//! and re-verified by the receiver before the message ever reaches
//! application logic (see `mqk-messenger`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeId;

/// Discriminator for every message type that crosses the wire between
/// nodes. Deliberately a single tagged enum rather than dynamic dispatch
/// over message kinds — one `match` on `kind` at each handler's entry
/// point instead of a trait object per message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Heartbeat,
    Election,
    Alive,
    Coordinator,
    ClientRequest,
    ClientReply,
    Prepare,
    Vote,
    Commit,
    Abort,
    Ack,
    ExecuteRead,
    ReadResult,
    TxnStatus,
    TxnStatusReply,
}

/// One frame's worth of payload, before and after transport. `payload` is
/// kept as an untyped `serde_json::Value` so the messenger never needs to
/// know about every concrete message body; callers extract the variant
/// they expect and fail loudly if it doesn't match `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: NodeId,
    pub kind: MessageKind,
    pub payload: Value,
    pub checksum: String,
}

impl Message {
    /// Builds a message with its checksum already computed over `payload`.
    pub fn new(sender_id: NodeId, kind: MessageKind, payload: Value) -> Self {
        let checksum = compute_checksum(&payload);
        Self {
            sender_id,
            kind,
            payload,
            checksum,
        }
    }

    /// Re-derives the checksum the sender should have produced and compares
    /// it against the transmitted one. A message delivered to application
    /// logic always satisfies this; callers drop the frame otherwise.
    pub fn checksum_valid(&self) -> bool {
        compute_checksum(&self.payload) == self.checksum
    }
}

/// SHA-256 (hex) over the canonical (compact, stable-UTF8) serialization of
/// `payload`. `serde_json::to_vec` emits object keys in insertion order,
/// which is sufficient here because every producer builds its payload
/// through the same typed struct -> `serde_json::to_value` path, so field
/// order is deterministic per message kind.
pub fn compute_checksum(payload: &Value) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(payload).expect("Value serialization cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}
