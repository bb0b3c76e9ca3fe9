use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use http::{header::CONTENT_TYPE, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

use crate::config::settings::MetricsConfig;
use crate::server::server::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Registry handle shared with the scrape handler.
#[derive(Clone)]
pub struct MetricsState {
    pub registry: Arc<Registry>,
}

impl MetricsState {
    pub fn new(registry: Registry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    /// Scrape route at `metrics_config.path`; empty when metrics are disabled.
    pub fn router(&self, metrics_config: &MetricsConfig) -> Router<AppState> {
        if !metrics_config.is_enabled {
            return Router::new();
        }
        Router::new().route(&metrics_config.path, get(scrape))
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics_state.render() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body),
        Err(err) => {
            error!("failed to encode metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, [(CONTENT_TYPE, "text/plain")], String::new())
        }
    }
}
