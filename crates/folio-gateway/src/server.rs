use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::routes::{agent_handler, health_handler, ingest_handler, schema_handler, summary_handler};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use folio_agent::AskService;
use folio_memory::Ingestor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Limits applied by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Requests per minute per client on `/agent`.
    #[serde(default = "default_agent_rpm")]
    pub agent_requests_per_minute: u32,
    /// Requests per minute per client on `/ingest`, `/summary` and `/schema`.
    #[serde(default = "default_admin_rpm")]
    pub admin_requests_per_minute: u32,
    /// Longest accepted question, in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

fn default_agent_rpm() -> u32 {
    10
}
fn default_admin_rpm() -> u32 {
    5
}
fn default_max_message_length() -> usize {
    4000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            agent_requests_per_minute: default_agent_rpm(),
            admin_requests_per_minute: default_admin_rpm(),
            max_message_length: default_max_message_length(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Question answering.
    pub service: AskService,
    /// Document ingestion; `None` when no vector index is configured.
    pub ingestor: Option<Arc<Ingestor>>,
    /// Gateway limits.
    pub config: GatewayConfig,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router with per-route rate limits.
    pub fn build(
        service: AskService,
        ingestor: Option<Arc<Ingestor>>,
        config: GatewayConfig,
    ) -> Router {
        let agent_limiter = Arc::new(RateLimiter::per_minute(config.agent_requests_per_minute));
        let admin_limiter = Arc::new(RateLimiter::per_minute(config.admin_requests_per_minute));

        let state = Arc::new(AppState {
            service,
            ingestor,
            config,
        });

        let agent = Router::new()
            .route("/agent", post(agent_handler))
            .route_layer(axum_mw::from_fn_with_state(agent_limiter, rate_limit_middleware));

        let admin = Router::new()
            .route("/summary", get(summary_handler))
            .route("/ingest", post(ingest_handler))
            .route("/schema", get(schema_handler))
            .route_layer(axum_mw::from_fn_with_state(admin_limiter, rate_limit_middleware));

        Router::new()
            .route("/health", get(health_handler))
            .merge(agent)
            .merge(admin)
            .with_state(state)
    }
}
