//! baton-api: the gateway's HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/ws` | Worker messaging channel (WebSocket) |
//! | POST | `/payload` | Deploy webhook (push events) |
//! | GET | `/api/v1/status` | Controller snapshot |
//! | POST | `/api/v1/try-again` | Clear the halt and spawn a worker |

pub mod channel;
pub mod handlers;
pub mod webhook;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::routing::{get, post};

use baton_core::ConnectionId;
use baton_rollout::Controller;

pub use webhook::DeployFilter;

/// Shared state for every route.
#[derive(Clone)]
pub struct GatewayState {
    pub controller: Arc<Controller>,
    pub deploy: DeployFilter,
    connections: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(controller: Arc<Controller>, deploy: DeployFilter) -> Self {
        Self {
            controller,
            deploy,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fresh id for an accepted channel.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::from_seq(self.connections.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Build the complete router (channel + webhook + operator API).
pub fn build_router(state: GatewayState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/try-again", post(handlers::try_again));

    Router::new()
        .route("/ws", get(channel::upgrade))
        .route("/payload", post(webhook::payload))
        .nest("/api/v1", api_routes)
        .with_state(state)
}
