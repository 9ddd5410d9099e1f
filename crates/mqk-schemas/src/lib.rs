//! Shared wire and domain types for the middleware control plane.
//!
//! Every inter-node and client-facing payload is defined here so the
//! messenger, health, election, lock, and transaction-coordinator crates
//! all agree on one vocabulary instead of redefining overlapping structs.

pub mod client;
pub mod error;
pub mod lock;
pub mod message;
pub mod node;
pub mod txn;

pub use client::ClientReply;
pub use error::MiddlewareError;
pub use lock::{LockMode, LockRequest, LockWaitOutcome};
pub use message::{Message, MessageKind};
pub use node::{CoordinatorView, NodeDescriptor, NodeId, PeerState, PeerStatus};
pub use txn::{generate_txn_id, StatementKind, Transaction, TxnPhase, Vote};
