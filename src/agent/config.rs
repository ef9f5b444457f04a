//! Agent configuration.

use std::path::PathBuf;

use http::Uri;

use crate::error::{LoaditError, Result};

/// Default agent namespace
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default agent user
pub const DEFAULT_USER: &str = "agent";
/// Default agent password
pub const DEFAULT_PASSWORD: &str = "P@ssw0rd!";
/// Default keepalive interval (seconds)
pub const DEFAULT_KEEPALIVE_INTERVAL: u32 = 20;
/// Default keepalive warning timeout (seconds)
pub const DEFAULT_KEEPALIVE_TIMEOUT: u32 = 120;
/// Default local API / socket host
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
/// Default local API / socket port
pub const DEFAULT_API_PORT: u16 = 3031;
/// Default backend URL
pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:8081";
/// Default statsd flush interval (seconds)
pub const DEFAULT_STATSD_FLUSH_INTERVAL: u32 = 10;
/// Default backend heartbeat interval (seconds)
pub const DEFAULT_BACKEND_HEARTBEAT_INTERVAL: u32 = 30;
/// Default backend heartbeat timeout (seconds)
pub const DEFAULT_BACKEND_HEARTBEAT_TIMEOUT: u32 = 300;

/// Host/port pair of a local listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

/// Embedded statsd server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsdConfig {
    /// Do not start the statsd server
    pub disable: bool,
    /// Flush interval in seconds; validated even when disabled
    pub flush_interval: u32,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            disable: false,
            flush_interval: DEFAULT_STATSD_FLUSH_INTERVAL,
        }
    }
}

/// Everything an agent needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Entity name seen by the backend
    pub agent_name: String,
    /// Namespace the entity lives in
    pub namespace: String,
    /// Auth user
    pub user: String,
    /// Auth password
    pub password: String,
    /// Backend WebSocket URLs, tried in order
    pub backend_urls: Vec<String>,
    /// Subscriptions, in order
    pub subscriptions: Vec<String>,
    /// Seconds between keepalives
    pub keepalive_interval: u32,
    /// Seconds after which a missing keepalive is a warning
    pub keepalive_warning_timeout: u32,
    /// Seconds between WebSocket pings
    pub backend_heartbeat_interval: u32,
    /// Seconds of silence before the connection is considered dead
    pub backend_heartbeat_timeout: u32,
    /// Local HTTP API listener
    pub api: ListenConfig,
    /// Local socket listener
    pub socket: ListenConfig,
    /// Disable the local HTTP API
    pub disable_api: bool,
    /// Disable the local socket listener
    pub disable_sockets: bool,
    /// Disable asset fetching
    pub disable_assets: bool,
    /// On-disk cache location
    pub cache_dir: PathBuf,
    /// Ask the backend to deregister the entity once it goes away
    pub deregister: bool,
    /// Handler run on deregistration (empty for none)
    pub deregistration_handler: String,
    /// Embedded statsd server
    pub statsd: StatsdConfig,
    /// Use fixed system information instead of probing the host
    pub mock_system_info: bool,
    /// Metrics binding handed to the agent
    pub prometheus_binding: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConfig {
    /// Configuration with library defaults.
    pub fn new() -> Self {
        Self {
            agent_name: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            backend_urls: vec![DEFAULT_BACKEND_URL.to_string()],
            subscriptions: Vec::new(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_warning_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            backend_heartbeat_interval: DEFAULT_BACKEND_HEARTBEAT_INTERVAL,
            backend_heartbeat_timeout: DEFAULT_BACKEND_HEARTBEAT_TIMEOUT,
            api: ListenConfig::default(),
            socket: ListenConfig::default(),
            disable_api: false,
            disable_sockets: false,
            disable_assets: false,
            cache_dir: PathBuf::from(null_device()),
            deregister: false,
            deregistration_handler: String::new(),
            statsd: StatsdConfig::default(),
            mock_system_info: false,
            prometheus_binding: String::new(),
        }
    }

    /// Reject configurations no agent could run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent_name.is_empty() {
            return Err(LoaditError::Config("agent name is empty".to_string()));
        }
        if self.agent_name.chars().any(char::is_whitespace) {
            return Err(LoaditError::Config(format!(
                "agent name {:?} contains whitespace",
                self.agent_name
            )));
        }
        if self.backend_urls.is_empty() {
            return Err(LoaditError::Config("no backend URLs".to_string()));
        }
        for url in &self.backend_urls {
            validate_backend_url(url)?;
        }
        if self.keepalive_interval == 0 || self.keepalive_warning_timeout == 0 {
            return Err(LoaditError::Config(
                "keepalive interval and timeout must be positive".to_string(),
            ));
        }
        if self.backend_heartbeat_interval == 0
            || self.backend_heartbeat_timeout <= self.backend_heartbeat_interval
        {
            return Err(LoaditError::Config(format!(
                "backend heartbeat timeout ({}) must exceed interval ({})",
                self.backend_heartbeat_timeout, self.backend_heartbeat_interval
            )));
        }
        if self.statsd.flush_interval == 0 {
            return Err(LoaditError::Config(
                "statsd flush interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_backend_url(url: &str) -> Result<()> {
    let uri: Uri = url
        .parse()
        .map_err(|e| LoaditError::Config(format!("invalid backend URL {url:?}: {e}")))?;

    match uri.scheme_str() {
        Some("ws" | "wss") => {},
        _ => {
            return Err(LoaditError::Config(format!(
                "backend URL {url:?} must use ws:// or wss://"
            )))
        },
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(LoaditError::Config(format!("backend URL {url:?} has no host")));
    }
    Ok(())
}

/// Platform null device, used as a cache directory that persists nothing.
pub fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}
