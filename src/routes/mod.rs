mod health;
mod metrics;
mod relay_socket;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub use health::healthcheck;
pub use metrics::metrics_handler;
pub use relay_socket::relay_socket;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(relay_socket))
}
