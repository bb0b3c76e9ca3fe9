use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;
use std::sync::Arc;
use tokio::sync::OnceCell;


// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the static `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE.get_or_init(|| async {
        info!("Initializing Metrics ...");
        Metrics::new()}
    ).await
}


#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Token cache metrics
    pub token_refreshes: IntCounter,
    pub token_refresh_failures: IntCounter,
    pub token_refresh_duration: HistogramVec,
    pub token_expiry_unix: IntGauge,

    // Directory metrics
    pub directory_requests: IntCounterVec,
    pub directory_failures: IntCounterVec,
    pub directory_duration: HistogramVec,

    // Workflow metrics
    pub reset_requests: IntCounterVec,
    pub password_changes: IntCounterVec,

    // Config/runtime
    pub config_validation_errors: IntCounter,
    pub up: IntGauge,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("directoryfacade".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Token cache
            token_refreshes: IntCounter::new("token_refreshes_total", "Token endpoint round-trips").unwrap(),
            token_refresh_failures: IntCounter::new("token_refresh_failures_total", "Failed token refreshes").unwrap(),
            token_refresh_duration: HistogramVec::new(HistogramOpts::new("token_refresh_duration_seconds", "Token refresh duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),&["outcome"],).unwrap(),
            token_expiry_unix: IntGauge::new("token_expiry_unix_seconds", "Cached access token expiry timestamp").unwrap(),

            // Directory
            directory_requests: IntCounterVec::new(Opts::new("directory_requests_total", "Directory calls by operation"),&["operation"],).unwrap(),
            directory_failures: IntCounterVec::new(Opts::new("directory_failures_total", "Directory failures by operation and reason"),&["operation", "reason"],).unwrap(),
            directory_duration: HistogramVec::new(HistogramOpts::new("directory_request_duration_seconds", "Directory call duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),&["operation"],).unwrap(),

            // Workflow
            reset_requests: IntCounterVec::new(Opts::new("reset_requests_total", "Password reset requests by outcome"),&["outcome"],).unwrap(),
            password_changes: IntCounterVec::new(Opts::new("password_changes_total", "Password changes by flow and outcome"),&["flow", "outcome"],).unwrap(),

            // Config/runtime
            config_validation_errors: IntCounter::new("config_validation_errors_total","Validation errors during startup",).unwrap(),
            up: IntGauge::new("up", "1 if service is healthy").unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.token_refreshes.clone())).unwrap();
        reg.register(Box::new(metrics.token_refresh_failures.clone())).unwrap();
        reg.register(Box::new(metrics.token_refresh_duration.clone())).unwrap();
        reg.register(Box::new(metrics.token_expiry_unix.clone())).unwrap();
        reg.register(Box::new(metrics.directory_requests.clone())).unwrap();
        reg.register(Box::new(metrics.directory_failures.clone())).unwrap();
        reg.register(Box::new(metrics.directory_duration.clone())).unwrap();
        reg.register(Box::new(metrics.reset_requests.clone())).unwrap();
        reg.register(Box::new(metrics.password_changes.clone())).unwrap();
        reg.register(Box::new(metrics.config_validation_errors.clone())).unwrap();
        reg.register(Box::new(metrics.up.clone())).unwrap();

        metrics
    }
}
