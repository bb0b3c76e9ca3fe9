use std::sync::Arc;
use anyhow::{Context, Result};
use axum::Router;
use tracing::info;
use crate::config::settings::SettingsConfig;
use crate::observability::metrics::{get_metrics, Metrics};
use crate::observability::routes::MetricsState;
use crate::reset::workflow::PasswordResetWorkflow;
use crate::server::routes;

#[derive(Clone)]
pub struct AppState {
    pub metrics_state: MetricsState,
    pub workflow: Arc<PasswordResetWorkflow>,
}

impl AppState {
    pub fn new (
        metrics: &Metrics,
        workflow: Arc<PasswordResetWorkflow>,
    ) -> Self{
        Self {
            metrics_state: MetricsState::new(metrics.registry.clone()),
            workflow,
        }
    }
}

/// Password routes plus the metrics route when enabled.
pub async fn app(settings_config: &SettingsConfig, workflow: Arc<PasswordResetWorkflow>) -> Router {
    let metrics = get_metrics().await;
    let state = AppState::new(metrics, workflow);

    Router::new()
        .merge(state.metrics_state.router(&settings_config.metrics))
        .merge(routes::router())
        .with_state(state)
}

/// Start one Axum server and serve until ctrl-c.
pub async fn start(
    settings_config: &SettingsConfig,
    workflow: Arc<PasswordResetWorkflow>,
) -> Result<()> {
    let metrics = get_metrics().await;
    let app = app(settings_config, workflow).await;

    let address = settings_config.server.bind_address();
    info!("listening on {}", address);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("cannot bind {}", address))?;
    metrics.up.set(1);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    metrics.up.set(0);

    Ok(())
}
