//! On-demand profiling endpoint.
//!
//! Serves runtime introspection over HTTP on loopback. A bind or serve
//! failure is logged and the harness keeps running without it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::RunPlan;
use crate::error::{LoaditError, Result};

const ENDPOINTS: &[(&str, &str)] = &[
    ("/debug/pprof/cmdline", "command line of the running process"),
    ("/debug/pprof/runtime", "async runtime worker and task counts"),
    ("/debug/pprof/population", "configured agent population"),
    ("/health", "liveness"),
];

/// Facts served by the profiling endpoint.
#[derive(Debug, Clone)]
pub struct ProfilingState {
    /// Process start
    pub started: Instant,
    /// Configured population size
    pub count: usize,
    /// Name stem
    pub base: String,
    /// First name suffix
    pub lo: u64,
    /// Last name suffix
    pub hi: u64,
}

impl ProfilingState {
    /// State describing `plan`
    pub fn from_plan(plan: &RunPlan) -> Self {
        let (lo, hi) = plan.name_range();
        Self {
            started: Instant::now(),
            count: plan.count,
            base: plan.base_entity_name.clone(),
            lo,
            hi,
        }
    }
}

/// Runtime snapshot
#[derive(Debug, Serialize)]
pub struct RuntimeSnapshot {
    /// Worker threads
    pub workers: usize,
    /// Tasks currently alive
    pub alive_tasks: usize,
    /// Tasks waiting in the global queue
    pub global_queue_depth: usize,
}

/// Create the profiling router
pub fn router(state: Arc<ProfilingState>) -> Router {
    Router::new()
        .route("/debug/pprof/", get(index))
        .route("/debug/pprof/cmdline", get(cmdline))
        .route("/debug/pprof/runtime", get(runtime))
        .route("/debug/pprof/population", get(population))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve `router` until the process exits.
pub async fn serve(addr: SocketAddr, router: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LoaditError::Server(format!("Failed to bind profiling to {addr}: {e}")))?;

    tracing::info!("Profiling endpoint listening on http://{}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| LoaditError::Server(format!("Profiling server error: {e}")))
}

/// Serve in the background. Failures are logged once, never retried.
pub fn spawn(addr: SocketAddr, state: Arc<ProfilingState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(addr, router(state)).await {
            tracing::error!(addr = %addr, error = %e, "profiling endpoint unavailable");
        }
    })
}

async fn index() -> impl IntoResponse {
    let mut body = String::from("loadit profiling endpoints\n\n");
    for (path, description) in ENDPOINTS {
        body.push_str(&format!("{path:<28} {description}\n"));
    }
    body
}

async fn cmdline() -> impl IntoResponse {
    std::env::args().collect::<Vec<_>>().join("\0")
}

async fn runtime() -> impl IntoResponse {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeSnapshot {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
        global_queue_depth: metrics.global_queue_depth(),
    })
}

async fn population(State(state): State<Arc<ProfilingState>>) -> impl IntoResponse {
    Json(json!({
        "count": state.count,
        "first": format!("{}-{}", state.base, state.lo),
        "last": format!("{}-{}", state.base, state.hi),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> Arc<ProfilingState> {
        Arc::new(ProfilingState {
            started: Instant::now(),
            count: 3,
            base: "host".to_string(),
            lo: 11,
            hi: 13,
        })
    }

    async fn get_json(path: &str) -> serde_json::Value {
        let response = router(state())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_population_endpoint() {
        let body = get_json("/debug/pprof/population").await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["first"], "host-11");
        assert_eq!(body["last"], "host-13");
    }

    #[tokio::test]
    async fn test_runtime_endpoint() {
        let body = get_json("/debug/pprof/runtime").await;
        assert!(body["workers"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let response = router(state())
            .oneshot(Request::get("/debug/pprof/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("/debug/pprof/runtime"));
    }
}
