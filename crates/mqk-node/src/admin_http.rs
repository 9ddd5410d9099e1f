//! Admin HTTP surface. Additive operational visibility only —
//! `GET /v1/health`, `GET /v1/status`, and an SSE
//! `GET /v1/events` stream. Never carries SQL traffic; the client data
//! plane is `client_listener`'s raw socket.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::events::NodeEvent;
use crate::Node;

#[derive(Clone)]
pub struct AdminState {
    pub node: Arc<Node>,
    pub bus: broadcast::Sender<NodeEvent>,
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/events", get(events))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    node_id: u32,
    service: &'static str,
    version: &'static str,
}

async fn health(State(st): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            node_id: st.node.self_id.0,
            service: "mqk-node",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[derive(Debug, Serialize)]
struct PeerStatusView {
    node_id: u32,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    node_id: u32,
    config_hash: String,
    current_coordinator_id: Option<u32>,
    election_in_progress: bool,
    term: u64,
    peers: Vec<PeerStatusView>,
    in_flight_transactions: usize,
}

async fn status(State(st): State<AdminState>) -> impl IntoResponse {
    let node = &st.node;
    let view = node.election.snapshot();
    let peers = node
        .health
        .peer_snapshot()
        .await
        .into_iter()
        .map(|(id, status)| PeerStatusView {
            node_id: id.0,
            status: match status {
                mqk_schemas::PeerStatus::Up => "UP",
                mqk_schemas::PeerStatus::Down => "DOWN",
            },
        })
        .collect();
    let in_flight = node.txn.in_flight_transaction_count().await;

    (
        StatusCode::OK,
        Json(StatusResponse {
            node_id: node.self_id.0,
            config_hash: node.config_hash.clone(),
            current_coordinator_id: view.current_coordinator_id.map(|id| id.0),
            election_in_progress: view.election_in_progress,
            term: view.term,
            peers,
            in_flight_transactions: in_flight,
        }),
    )
}

async fn events(State(st): State<AdminState>) -> Response {
    let rx = st.bus.subscribe();
    let stream = broadcast_to_sse(rx);
    Sse::new(stream).keep_alive(KeepAlive::new()).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<NodeEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(ev) => {
                let name = match &ev {
                    NodeEvent::PeerUp { .. } => "peer_up",
                    NodeEvent::PeerDown { .. } => "peer_down",
                    NodeEvent::CoordinatorLost { .. } => "coordinator_lost",
                    NodeEvent::ElectionTransition { .. } => "election_transition",
                };
                let data = serde_json::to_string(&ev).ok()?;
                Some(Ok(Event::default().event(name).data(data)))
            }
            Err(_) => None,
        }
    })
}
