//! Process-wide introspection listeners.
//!
//! - **Profiling**: HTTP on `localhost:{pprof-port}`. Optional: failures are
//!   logged and the run continues.
//! - **Metrics**: Prometheus exposition at the metrics binding. Required when
//!   a binding is configured; an empty binding disables it.
//!
//! Both are started once, before the population, and live until the
//! process exits.

pub mod metrics;
pub mod profiling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RunPlan;
use crate::error::{LoaditError, Result};

pub use profiling::{ProfilingState, RuntimeSnapshot};

static STARTED: AtomicBool = AtomicBool::new(false);

/// Handles of the running listeners.
#[derive(Debug)]
pub struct Introspection {
    profiling: JoinHandle<()>,
    metrics_enabled: bool,
}

impl Introspection {
    /// Start both listeners. Only the first call in a process succeeds.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(plan: &RunPlan) -> Result<Self> {
        if STARTED.swap(true, Ordering::SeqCst) {
            return Err(LoaditError::Server(
                "introspection endpoints already started".to_string(),
            ));
        }

        let profiling = profiling::spawn(
            plan.profiling_addr(),
            Arc::new(ProfilingState::from_plan(plan)),
        );

        let metrics_enabled = match plan.metrics_addr {
            Some(addr) => {
                metrics::install(addr)?;
                true
            },
            None => {
                tracing::info!("Metrics listener disabled");
                false
            },
        };

        Ok(Self {
            profiling,
            metrics_enabled,
        })
    }

    /// Whether the metrics listener is running
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }

    /// Whether the profiling listener has stopped (bind or serve failure)
    pub fn profiling_stopped(&self) -> bool {
        self.profiling.is_finished()
    }
}
