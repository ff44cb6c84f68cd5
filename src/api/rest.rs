// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Operator/observability surface (§6). No authentication: this core is meant
// to sit behind an operator-only network boundary, not exposed publicly.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::Orchestrator;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/ranks/top", get(ranks_top))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// GET /healthz
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    scores: usize,
    tracked_addresses: usize,
}

async fn healthz(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        scores: state.state_store.score_count(),
        tracked_addresses: state.state_store.tracked_address_count(),
    })
}

// =============================================================================
// GET /metrics — Prometheus exposition
// =============================================================================

async fn metrics(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let kill_switch = if state.risk_governor.is_kill_switch_active(chrono::Utc::now()) { 1 } else { 0 };
    let open_episodes = state.episode_tracker.all_open().len();
    let tracked_addresses = state.state_store.tracked_address_count();
    let scores = state.state_store.score_count();
    let recent_decisions = state.recent_decisions.read().len();
    let recent_errors = state.recent_errors.read().len();

    let body = format!(
        "# HELP sage_kill_switch_active Whether the risk governor's kill switch is currently tripped.\n\
         # TYPE sage_kill_switch_active gauge\n\
         sage_kill_switch_active {kill_switch}\n\
         # HELP sage_open_episodes Number of currently open episodes.\n\
         # TYPE sage_open_episodes gauge\n\
         sage_open_episodes {open_episodes}\n\
         # HELP sage_tracked_addresses Number of addresses tracked by the state store.\n\
         # TYPE sage_tracked_addresses gauge\n\
         sage_tracked_addresses {tracked_addresses}\n\
         # HELP sage_scores Number of live score events held by the state store.\n\
         # TYPE sage_scores gauge\n\
         sage_scores {scores}\n\
         # HELP sage_recent_decisions Size of the recent-decisions ring buffer.\n\
         # TYPE sage_recent_decisions gauge\n\
         sage_recent_decisions {recent_decisions}\n\
         # HELP sage_recent_errors Size of the recent-errors ring buffer.\n\
         # TYPE sage_recent_errors gauge\n\
         sage_recent_errors {recent_errors}\n"
    );

    ([("content-type", "text/plain; version=0.0.4")], body)
}

// =============================================================================
// GET /ranks/top?n=…
// =============================================================================

#[derive(Deserialize)]
struct RanksTopQuery {
    n: Option<usize>,
}

async fn ranks_top(
    State(state): State<Arc<Orchestrator>>,
    Query(query): Query<RanksTopQuery>,
) -> impl IntoResponse {
    let n = query.n.unwrap_or(20).min(100);
    Json(state.state_store.top_scores(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(Orchestrator::new(RuntimeConfig::default())))
    }

    #[tokio::test]
    async fn healthz_reports_empty_counts_on_fresh_orchestrator() {
        let response = app()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exposes_kill_switch_gauge() {
        let response = app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("sage_kill_switch_active 0"));
    }

    #[tokio::test]
    async fn ranks_top_defaults_to_20_and_caps_at_100() {
        let response = app()
            .oneshot(Request::builder().uri("/ranks/top?n=500").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
