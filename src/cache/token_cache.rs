use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::credential::Credential;
use crate::error::FacadeError;
use crate::observability::metrics::get_metrics;
use crate::sources::TokenSource;

pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

static OK_MSG: &'static str = "ok";
static ERROR_MSG: &'static str = "error";

type Refresh = Shared<BoxFuture<'static, Result<Arc<Credential>, FacadeError>>>;

#[derive(Default)]
struct CacheState {
    current: Option<Arc<Credential>>,
    /// Set while a refresh is running; every stale reader awaits this one.
    in_flight: Option<Refresh>,
    /// The source issued `current` with a lifetime inside the safety margin;
    /// it is served until its real expiry instead of refetched on every call.
    margin_waived: bool,
}

impl CacheState {
    fn fresh(&self, margin: Duration) -> Option<Arc<Credential>> {
        let current = self.current.as_ref()?;
        let now = Utc::now();
        let usable = current.is_fresh(now, margin) || (self.margin_waived && current.is_fresh(now, Duration::zero()));
        usable.then(|| current.clone())
    }
}

/// Owns the single shared credential and coalesces refreshes.
///
/// Only the spawned refresh task writes `current`, and at most one such task
/// exists at a time, so a completed refresh can never be overwritten by an
/// older one.
pub struct TokenCache {
    source: Option<Arc<dyn TokenSource>>,
    state: Arc<Mutex<CacheState>>,
    safety_margin: Duration,
    refresh_timeout: StdDuration,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, safety_margin_seconds: u64) -> Self {
        Self {
            source: Some(source),
            state: Arc::new(Mutex::new(CacheState::default())),
            safety_margin: Duration::seconds(safety_margin_seconds as i64),
            refresh_timeout: StdDuration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
        }
    }

    /// Starts from an already issued credential.
    pub fn with_credential(source: Arc<dyn TokenSource>, safety_margin_seconds: u64, credential: Credential) -> Self {
        let cache = Self::new(source, safety_margin_seconds);
        // Not shared with anyone yet, the lock is uncontended.
        if let Ok(mut state) = cache.state.try_lock() {
            state.current = Some(Arc::new(credential));
        }
        cache
    }

    /// A cache without a token source. Every `ensure_valid` fails.
    pub fn unconfigured() -> Self {
        Self {
            source: None,
            state: Arc::new(Mutex::new(CacheState::default())),
            safety_margin: Duration::zero(),
            refresh_timeout: StdDuration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
        }
    }

    pub fn with_refresh_timeout(mut self, refresh_timeout: StdDuration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    /// Cached credential without any freshness check.
    pub async fn current(&self) -> Option<Arc<Credential>> {
        self.state.lock().await.current.clone()
    }

    /// Returns a credential that is fresh at the time of the call.
    ///
    /// Concurrent callers that find the credential stale share one refresh
    /// and all observe its outcome. A failed refresh leaves the old
    /// credential in place.
    pub async fn ensure_valid(&self) -> Result<Arc<Credential>, FacadeError> {
        let refresh = {
            let mut state = self.state.lock().await;

            if let Some(current) = state.fresh(self.safety_margin) {
                return Ok(current);
            }

            match state.in_flight.as_ref() {
                Some(refresh) => {
                    debug!("joining in-flight token refresh");
                    refresh.clone()
                }
                None => {
                    let source = self.source.clone().ok_or(FacadeError::Unconfigured)?;
                    let refresh = self.spawn_refresh(source, state.current.clone());
                    state.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Runs the refresh on its own task so an aborted caller cannot cancel
    /// a refresh other callers are waiting on.
    fn spawn_refresh(&self, source: Arc<dyn TokenSource>, current: Option<Arc<Credential>>) -> Refresh {
        let state = self.state.clone();
        let timeout = self.refresh_timeout;
        let margin = self.safety_margin;

        let task = tokio::spawn(async move {
            let metrics = get_metrics().await;
            let start = Instant::now();
            metrics.token_refreshes.inc();
            info!("refreshing access token");

            let fetched = match tokio::time::timeout(timeout, source.fetch(current.as_deref())).await {
                Ok(Ok(credential)) => Ok(credential),
                Ok(Err(err)) => Err(FacadeError::AuthRefreshFailed(format!("{:#}", err))),
                Err(_) => Err(FacadeError::AuthRefreshFailed(format!(
                    "token refresh timed out after {} ms",
                    timeout.as_millis()
                ))),
            };

            // Publish the result and clear the slot in one critical section.
            let mut state = state.lock().await;
            state.in_flight = None;

            match fetched {
                Ok(credential) => {
                    metrics.token_refresh_duration.with_label_values(&[OK_MSG]).observe(start.elapsed().as_secs_f64());
                    if let Some(cached) = state.current.as_ref() {
                        if cached.expires_at() > credential.expires_at() {
                            warn!("token endpoint returned an older credential, keeping the cached one");
                            return Ok(cached.clone());
                        }
                    }
                    metrics.token_expiry_unix.set(credential.expires_at().timestamp());
                    info!(expires_at = %credential.expires_at(), "access token refreshed");
                    state.margin_waived = !credential.is_fresh(Utc::now(), margin);
                    if state.margin_waived {
                        warn!(
                            expires_at = %credential.expires_at(),
                            safety_margin_seconds = margin.num_seconds(),
                            "token lifetime is within the safety margin, serving it until it expires"
                        );
                    }
                    let credential = Arc::new(credential);
                    state.current = Some(credential.clone());
                    Ok(credential)
                }
                Err(err) => {
                    metrics.token_refresh_duration.with_label_values(&[ERROR_MSG]).observe(start.elapsed().as_secs_f64());
                    metrics.token_refresh_failures.inc();
                    warn!(error = %err, "access token refresh failed, keeping previous credential");
                    Err(err)
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(FacadeError::AuthRefreshFailed(format!("token refresh task failed: {}", err))),
            }
        }
        .boxed()
        .shared()
    }
}
