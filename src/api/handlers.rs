use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::contracts::{CountStore, CounterError, Upstream, UpstreamError};
use crate::metrics::MetricsRegistry;
use crate::server::ServerState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Application state shared across handlers.
pub struct AppState<S: CountStore, U: Upstream = NoUpstream> {
    pub store: Arc<S>,
    /// `Some` in clustered mode.
    pub upstream: Option<Arc<U>>,
    /// Instance name followed by the listen address.
    pub identity: String,
    pub metrics: Arc<MetricsRegistry>,
    /// Root of every per-request cancellation scope.
    pub root: CancellationToken,
    pub lifecycle: watch::Receiver<ServerState>,
    pub started: Instant,
}

impl<S: CountStore, U: Upstream> AppState<S, U> {
    /// Creates state for a router that is not driven by a [`crate::server::Server`];
    /// the reported lifecycle stays `Running`.
    pub fn new(
        store: Arc<S>,
        upstream: Option<Arc<U>>,
        identity: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
        root: CancellationToken,
    ) -> Self {
        let (_, lifecycle) = watch::channel(ServerState::Running);
        Self {
            store,
            upstream,
            identity: identity.into(),
            metrics,
            root,
            lifecycle,
            started: Instant::now(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: watch::Receiver<ServerState>) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

/// Upstream placeholder for local-only deployments.
pub struct NoUpstream;

impl Upstream for NoUpstream {
    async fn fetch_count(&self, _cancel: &CancellationToken) -> Result<u64, UpstreamError> {
        Err(UpstreamError::Unreachable("cluster not configured".into()))
    }

    fn endpoint(&self) -> &str {
        "none"
    }
}

/// Cancellation scope of one inbound request.
///
/// Child of the server's root token, cancelled when the request future is
/// dropped, e.g. on client disconnect.
#[derive(Clone)]
pub struct RequestScope(pub CancellationToken);

/// Cancels a request's scope when dropped and logs requests abandoned
/// before a response was produced.
struct ScopeGuard {
    token: CancellationToken,
    answered: bool,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.answered {
            tracing::warn!("Client went away before the response was sent");
        }
        self.token.cancel();
    }
}

/// Middleware installing a [`RequestScope`] for the wrapped routes.
pub async fn request_scope<S: CountStore, U: Upstream>(
    State(state): State<Arc<AppState<S, U>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = state.root.child_token();
    let mut guard = ScopeGuard {
        token: token.clone(),
        answered: false,
    };
    request.extensions_mut().insert(RequestScope(token));
    let response = next.run(request).await;
    guard.answered = true;
    response
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    Upstream(UpstreamError),
    Counter(CounterError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            // Client hung up or the server is going away: no upstream detail.
            ApiError::Upstream(UpstreamError::Cancelled) => {
                tracing::info!("Request cancelled while contacting cluster");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
            ApiError::Upstream(e) => {
                let message = format!("failed to contact cluster: {}", e);
                tracing::error!(error = %e, "Failed to contact cluster");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, TEXT_PLAIN)],
                    message,
                )
                    .into_response()
            }
            ApiError::Counter(CounterError::Closed) => {
                tracing::warn!("Request arrived after the count store closed");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
            ApiError::Counter(e) => {
                tracing::error!(error = %e, "Failed to increment counter");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, TEXT_PLAIN)],
                    e.to_string(),
                )
                    .into_response()
            }
        }
    }
}

impl From<CounterError> for ApiError {
    fn from(e: CounterError) -> Self {
        ApiError::Counter(e)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        ApiError::Upstream(e)
    }
}

/// Counts one request and renders the response body.
///
/// In clustered mode the upstream is asked first, under `cancel`; the local
/// counter is only incremented once that succeeded.
pub async fn count_request<S: CountStore, U: Upstream>(
    state: &AppState<S, U>,
    cancel: &CancellationToken,
) -> Result<String, ApiError> {
    let cluster_count = match state.upstream {
        Some(ref upstream) => Some(upstream.fetch_count(cancel).await?),
        None => None,
    };

    let local_count = state.store.increment()?;

    Ok(match cluster_count {
        None => local_count.to_string(),
        Some(cluster_count) => format!(
            "You are talking to instance {}.\nThis is request {} to this instance and request {} to the cluster.\n",
            state.identity, local_count, cluster_count
        ),
    })
}

/// GET /
/// Counts the request and reports the new value(s) as plain text.
pub async fn count<S: CountStore, U: Upstream>(
    State(state): State<Arc<AppState<S, U>>>,
    Extension(RequestScope(cancel)): Extension<RequestScope>,
) -> Response {
    let start = Instant::now();
    state.metrics.requests.record_request();

    let response = match count_request(&state, &cancel).await {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response(),
        Err(e) => e.into_response(),
    };

    state
        .metrics
        .requests
        .record_response(response.status().as_u16(), start.elapsed());
    response
}

/// GET /health
pub async fn health_check<S: CountStore, U: Upstream>(
    State(state): State<Arc<AppState<S, U>>>,
) -> impl IntoResponse {
    let lifecycle = *state.lifecycle.borrow();
    let healthy = lifecycle == ServerState::Running;
    let body = Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "stopping" },
        "state": lifecycle.as_str(),
    }));
    if healthy {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Response for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance: String,
    pub clustered: bool,
    pub upstream: Option<String>,
    pub count: u64,
    pub persisted: u64,
    pub uptime_secs: f64,
    pub requests_total: u64,
    pub errors_total: u64,
}

/// GET /stats
pub async fn get_stats<S: CountStore, U: Upstream>(
    State(state): State<Arc<AppState<S, U>>>,
) -> Json<StatsResponse> {
    let requests = &state.metrics.requests;
    Json(StatsResponse {
        instance: state.identity.clone(),
        clustered: state.upstream.is_some(),
        upstream: state.upstream.as_ref().map(|u| u.endpoint().to_string()),
        count: state.store.current(),
        persisted: state
            .metrics
            .persistence
            .persisted_value
            .load(Ordering::Relaxed),
        uptime_secs: state.started.elapsed().as_secs_f64(),
        requests_total: requests.requests_total.load(Ordering::Relaxed),
        errors_total: requests.responses_error_total.load(Ordering::Relaxed)
            + requests.responses_unavailable_total.load(Ordering::Relaxed),
    })
}

/// GET /metrics
/// Prometheus text exposition.
pub async fn metrics<S: CountStore, U: Upstream>(
    State(state): State<Arc<AppState<S, U>>>,
) -> impl IntoResponse {
    let mut output = format!(
        "# HELP tally_uptime_secs Server uptime in seconds\n\
         # TYPE tally_uptime_secs gauge\n\
         tally_uptime_secs {:.3}\n\
         # HELP tally_count Current in-memory request count\n\
         # TYPE tally_count gauge\n\
         tally_count {}\n",
        state.started.elapsed().as_secs_f64(),
        state.store.current(),
    );
    output.push_str(&state.metrics.format_prometheus());

    ([(header::CONTENT_TYPE, TEXT_PLAIN)], output)
}
