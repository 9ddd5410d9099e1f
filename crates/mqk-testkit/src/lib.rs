//! In-process multi-node test harness.
//!
//! Spins up a real cluster of [`mqk_node::Node`]s inside one test process,
//! each against its own [`mqk_db::FakeBackend`] and [`mqk_db::InMemoryTxnLog`],
//! wired together with real TCP sockets for the Framed Messenger, the client
//! socket, and the admin HTTP surface exactly as `mqk-node`'s binary wires
//! them. Scenario tests under `tests/` drive it the way an operator or a
//! client would: send statements over the client socket, kill and restart
//! nodes, and assert on `transactions_log` / lock state / the published
//! `CoordinatorView`.

pub mod cluster;
pub mod counting_backend;

pub use cluster::{TestCluster, TestClusterConfig, TestNode};
pub use counting_backend::CountingBackend;
