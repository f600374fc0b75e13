mod handlers;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::contracts::{CountStore, Upstream};

pub use handlers::{
    count_request, ApiError, AppState, NoUpstream, RequestScope, StatsResponse,
};

/// Creates the API router.
///
/// `GET /` is the counting route and the only one that runs under a
/// per-request cancellation scope.
pub fn create_router<S: CountStore + 'static, U: Upstream + 'static>(
    state: Arc<AppState<S, U>>,
) -> Router {
    Router::new()
        .route("/", get(handlers::count::<S, U>))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            handlers::request_scope::<S, U>,
        ))
        .route("/health", get(handlers::health_check::<S, U>))
        .route("/stats", get(handlers::get_stats::<S, U>))
        .route("/metrics", get(handlers::metrics::<S, U>))
        .with_state(state)
}
