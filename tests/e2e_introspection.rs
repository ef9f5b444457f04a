//! End-to-end profiling endpoint tests.
//!
//! These verify the listener serves real HTTP connections, not just the
//! router in isolation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use loadit::introspection::{profiling, ProfilingState};
use serde_json::Value;
use tokio::time::timeout;

/// Find an available port for testing
async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn state() -> Arc<ProfilingState> {
    Arc::new(ProfilingState {
        started: Instant::now(),
        count: 1000,
        base: "test-host".to_string(),
        lo: 1,
        hi: 1000,
    })
}

async fn get_json(port: u16, path: &str) -> Value {
    let client = reqwest::Client::new();
    let response = timeout(
        Duration::from_secs(5),
        client
            .get(format!("http://127.0.0.1:{port}{path}"))
            .send(),
    )
    .await
    .expect("Request timed out")
    .expect("Request failed");

    assert!(response.status().is_success());
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_profiling_listener_serves_requests() {
    let port = find_available_port().await;
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let handle = profiling::spawn(addr, state());

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    let health = get_json(port, "/health").await;
    assert_eq!(health["status"], "ok");

    let population = get_json(port, "/debug/pprof/population").await;
    assert_eq!(population["count"], 1000);
    assert_eq!(population["first"], "test-host-1");
    assert_eq!(population["last"], "test-host-1000");

    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn test_busy_port_does_not_stop_the_caller() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let handle = profiling::spawn(addr, state());
    let outcome = timeout(Duration::from_secs(5), handle).await;

    // The task ends on its own after logging; nothing panics.
    assert!(matches!(outcome, Ok(Ok(()))));
}
