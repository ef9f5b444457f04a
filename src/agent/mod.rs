//! Simulated agents.
//!
//! The harness only depends on two seams:
//!
//! - [`AgentFactory::new_agent`] validates an [`AgentConfig`] and prepares an
//!   agent without any network I/O.
//! - [`Agent::run`] drives the agent until the shared
//!   [`CancellationToken`] fires (`Ok(())`) or an unrecoverable error occurs.
//!
//! [`WsAgentFactory`] is the built-in implementation speaking the backend's
//! WebSocket agent protocol. Tests plug in their own factories.
//!
//! # Lifecycle
//!
//! ```text
//!   new_agent()            run(cancel)           cancel / fatal error
//! ─────────────> [Constructed] ──────> [Running] ───────────────────> [Terminated]
//! ```

pub mod config;
mod sysinfo;
mod ws;

pub use config::{AgentConfig, ListenConfig, StatsdConfig};
pub use sysinfo::SystemInfo;
pub use ws::{KeepaliveEvent, WsAgent, WsAgentFactory, WsMessage, KEEPALIVE_MESSAGE_TYPE};

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Future returned by [`Agent::run`].
pub type AgentRun = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A constructed, not yet started agent.
pub trait Agent: Send {
    /// Entity name of this agent.
    fn name(&self) -> &str;

    /// Run until `cancel` fires or an unrecoverable error occurs.
    ///
    /// Returns `Ok(())` after observing cancellation.
    fn run(self: Box<Self>, cancel: CancellationToken) -> AgentRun;
}

/// Builds agents from configurations.
pub trait AgentFactory: Send + Sync {
    /// Validate `config` and prepare an agent. Must not perform network I/O.
    fn new_agent(&self, config: AgentConfig) -> Result<Box<dyn Agent>>;
}
