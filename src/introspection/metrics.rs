//! Prometheus metrics listener.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::Result;

/// Install the global recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime, and at most once per
/// process.
pub fn install(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!("Metrics listening on http://{}/metrics", addr);
    Ok(())
}

fn describe() {
    metrics::describe_counter!(
        "loadit_agents_constructed_total",
        "Agents constructed by the population supervisor"
    );
    metrics::describe_gauge!(
        "loadit_agents_connected",
        "Agents with an open backend session"
    );
    metrics::describe_counter!(
        "loadit_agent_connect_attempts_total",
        "Connection attempts per backend"
    );
    metrics::describe_counter!(
        "loadit_agent_connect_failures_total",
        "Failed connection attempts per backend"
    );
    metrics::describe_counter!("loadit_keepalives_sent_total", "Keepalive events sent");
    metrics::describe_gauge!(
        "loadit_startup_seconds",
        "Time spent constructing and launching the population"
    );
}
