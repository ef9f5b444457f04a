//! Population supervisor.
//!
//! Builds every agent in index order, then hands each one to its own task.
//! Construction is sequential so the first bad configuration is reported
//! deterministically and before any network activity; execution is fully
//! concurrent.
//!
//! All tasks share one [`CancellationToken`]. Cancelling it is the only way
//! agents are stopped.
//!
//! # Failure policy
//!
//! A construction error aborts the launch. A run-loop error or panic from
//! any agent is fatal to the whole run: [`Population::run_until`] returns it as soon
//! as it is reported. A partially alive population would skew measurements.

mod naming;

pub use naming::{
    agent_config, agent_name, agent_names, BACKEND_HEARTBEAT_INTERVAL, BACKEND_HEARTBEAT_TIMEOUT,
};

use std::fmt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentFactory;
use crate::config::RunPlan;
use crate::error::{LoaditError, Result};

/// An agent run loop that ended with an error or a panic.
#[derive(Debug)]
pub struct AgentFailure {
    /// Agent name
    pub name: String,
    /// Error returned by the run loop
    pub error: LoaditError,
}

/// Startup summary, rendered as the two stdout lines of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// Time spent constructing and launching every agent
    pub elapsed: Duration,
    /// Name stem
    pub base: String,
    /// First name suffix
    pub lo: u64,
    /// Last name suffix
    pub hi: u64,
    /// Number of agents launched
    pub count: usize,
}

impl fmt::Display for LaunchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Measures construction and launch, not confirmed connections.
        writeln!(f, "all agents have been connected in {:?}", self.elapsed)?;
        writeln!(f, "{}-{} ... {}-{}", self.base, self.lo, self.base, self.hi)
    }
}

/// The running agents.
pub struct Population {
    names: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
    failures: mpsc::UnboundedReceiver<AgentFailure>,
    cancel: CancellationToken,
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("agents", &self.names.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Population {
    /// Construct and start every agent of `plan`.
    ///
    /// Must be called from within a Tokio runtime. On a construction error
    /// `cancel` is fired so the agents already started unwind, and the error
    /// names the agent that was rejected.
    pub fn launch(
        plan: &RunPlan,
        factory: &dyn AgentFactory,
        cancel: CancellationToken,
    ) -> Result<(Self, LaunchReport)> {
        let start = Instant::now();
        let (failures_tx, failures) = mpsc::unbounded_channel();

        let mut names: Vec<String> = Vec::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        names
            .try_reserve_exact(plan.count)
            .and_then(|()| tasks.try_reserve_exact(plan.count))
            .map_err(|e| {
                LoaditError::Config(format!("cannot hold {} agents: {e}", plan.count))
            })?;

        for index in 0..plan.count {
            let config = agent_config(plan, index);
            let name = config.agent_name.clone();

            let agent = match factory.new_agent(config) {
                Ok(agent) => agent,
                Err(e) => {
                    cancel.cancel();
                    return Err(LoaditError::AgentConstruction {
                        name,
                        reason: e.to_string(),
                    });
                },
            };
            metrics::counter!("loadit_agents_constructed_total").increment(1);

            let tx = failures_tx.clone();
            let token = cancel.clone();
            let task_name = name.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = AssertUnwindSafe(async move { agent.run(token).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(LoaditError::Panic(panic_message(&*payload))));
                match outcome {
                    Ok(()) => tracing::debug!(agent = %task_name, "agent stopped"),
                    Err(error) => {
                        tracing::error!(agent = %task_name, error = %error, "agent run loop failed");
                        let _ = tx.send(AgentFailure {
                            name: task_name,
                            error,
                        });
                    },
                }
            }));
            names.push(name);
        }

        let elapsed = start.elapsed();
        metrics::gauge!("loadit_startup_seconds").set(elapsed.as_secs_f64());

        let (lo, hi) = plan.name_range();
        let report = LaunchReport {
            elapsed,
            base: plan.base_entity_name.clone(),
            lo,
            hi,
            count: plan.count,
        };

        tracing::info!(agents = plan.count, elapsed = ?elapsed, "population launched");

        Ok((
            Self {
                names,
                tasks,
                failures,
                cancel,
            },
            report,
        ))
    }

    /// Wait for `shutdown` or the first agent failure, whichever comes
    /// first, then cancel every agent.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<F::Output>
    where
        F: Future,
    {
        let outcome = tokio::select! {
            out = shutdown => Ok(out),
            Some(failure) = self.failures.recv() => Err(LoaditError::AgentRun {
                name: failure.name,
                reason: failure.error.to_string(),
            }),
        };

        self.cancel.cancel();
        outcome
    }

    /// Cancel every agent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every agent task to finish. Returns how many ended without
    /// panicking.
    pub async fn join(self) -> usize {
        let mut finished = 0;
        for task in self.tasks {
            match task.await {
                Ok(()) => finished += 1,
                Err(e) => tracing::error!(error = %e, "agent task panicked"),
            }
        }
        finished
    }

    /// Names in construction order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of agents
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no agent was launched
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The shared cancellation token
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
