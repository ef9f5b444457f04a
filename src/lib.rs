//! # loadit - agent population load harness
//!
//! Simulates a large population of long-lived monitoring agents against one
//! or more backends speaking the WebSocket agent protocol, so operators can
//! watch how a backend copes with realistic fan-in.
//!
//! The harness itself is orchestration only:
//!
//! ```text
//! RunPlan::resolve ──> Introspection::start ──> Population::launch ──> run_until(signal)
//!  flags > env >        profiling (loopback)     N agents, built        cancel the shared
//!  defaults             metrics (prometheus)     in order, run          token, agents unwind
//!                                                concurrently
//! ```
//!
//! ## Identity
//!
//! Agent `i` (0-based) is named `{base}-{offset + i + 1}`, so one run covers
//! `{base}-{offset + 1} ... {base}-{offset + count}` without duplicates.
//!
//! ## Failure policy
//!
//! | Failure                         | Effect                         |
//! |---------------------------------|--------------------------------|
//! | bad flag / environment value    | exit non-zero before startup   |
//! | factory rejects a configuration | exit non-zero                  |
//! | any agent run loop errors       | exit non-zero                  |
//! | profiling port unavailable      | logged, run continues          |
//! | SIGINT / SIGTERM                | cancel all agents, exit 0      |
//!
//! ## Example
//!
//! ```rust,ignore
//! use loadit::{Population, ProcessEnv, RunFlags, RunPlan, WsAgentFactory};
//! use tokio_util::sync::CancellationToken;
//!
//! let plan = RunPlan::resolve(RunFlags::default(), &ProcessEnv)?;
//! let cancel = CancellationToken::new();
//! let (mut population, report) = Population::launch(&plan, &WsAgentFactory::new(), cancel)?;
//! print!("{report}");
//! population.run_until(loadit::signal::wait_for_shutdown()).await?;
//! ```
//!
//! ## Modules
//!
//! - [`config`]: flag/environment/default resolution into a [`RunPlan`]
//! - [`agent`]: agent contract and the built-in WebSocket agent
//! - [`population`]: naming, construction and supervision of the agents
//! - [`introspection`]: profiling and metrics listeners
//! - [`signal`]: operator termination signals
//! - [`error`]: error types and result alias

pub mod agent;
pub mod config;
pub mod error;
pub mod introspection;
pub mod population;
pub mod signal;

// Re-exports for convenience
pub use agent::{Agent, AgentConfig, AgentFactory, AgentRun, SystemInfo, WsAgent, WsAgentFactory};
pub use config::{Credentials, EnvSource, ProcessEnv, RunFlags, RunPlan};
pub use error::{LoaditError, Result};
pub use introspection::Introspection;
pub use population::{agent_config, agent_name, LaunchReport, Population};
pub use signal::{wait_for_shutdown, Shutdown};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
