//! Run plan resolution.
//!
//! Every option is resolved with the same precedence:
//!
//! 1. explicit command-line flag
//! 2. `LOADIT_*` environment variable
//! 3. built-in default
//!
//! Integer options found in the environment are always parsed, even when a
//! flag overrides them, so a malformed environment is reported before the
//! first agent is built.

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use clap::Args;

use crate::agent::config::{
    DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_TIMEOUT, DEFAULT_NAMESPACE, DEFAULT_PASSWORD,
    DEFAULT_USER,
};
use crate::error::{LoaditError, Result};

/// Default population size
pub const DEFAULT_COUNT: usize = 1000;
/// Default backend list
pub const DEFAULT_BACKENDS: &str = "ws://localhost:8081";
/// Default subscription list
pub const DEFAULT_SUBSCRIPTIONS: &str = "default";
/// Default loopback port of the profiling endpoint
pub const DEFAULT_PPROF_PORT: u16 = 6060;
/// Default metrics binding (all interfaces)
pub const DEFAULT_PROM_BINDING: &str = ":8080";
/// Default entity name stem
pub const DEFAULT_ENTITY_NAME: &str = "test-host";
/// Default entity name offset
pub const DEFAULT_ENTITY_OFFSET: u64 = 0;
/// Default log level when `RUST_LOG` is unset
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Environment variable names, one per option.
pub mod env {
    /// Population size
    pub const COUNT: &str = "LOADIT_COUNT";
    /// Comma-separated backend URLs
    pub const BACKENDS: &str = "LOADIT_BACKENDS";
    /// Agent namespace
    pub const NAMESPACE: &str = "LOADIT_NAMESPACE";
    /// Comma-separated subscriptions
    pub const SUBSCRIPTIONS: &str = "LOADIT_SUBSCRIPTIONS";
    /// Keepalive interval (seconds)
    pub const KEEPALIVE_INTERVAL: &str = "LOADIT_KEEPALIVE_INTERVAL";
    /// Keepalive timeout (seconds)
    pub const KEEPALIVE_TIMEOUT: &str = "LOADIT_KEEPALIVE_TIMEOUT";
    /// Profiling port
    pub const PPROF_PORT: &str = "LOADIT_PPROF_PORT";
    /// Metrics binding
    pub const PROM: &str = "LOADIT_PROM";
    /// Auth user
    pub const USER: &str = "LOADIT_USER";
    /// Auth password
    pub const PASSWORD: &str = "LOADIT_PASSWORD";
    /// Entity name stem
    pub const ENTITY_NAME: &str = "LOADIT_ENTITY_NAME";
    /// Entity name offset
    pub const ENTITY_OFFSET: &str = "LOADIT_ENTITY_OFFSET";
    /// Log level
    pub const LOG_LEVEL: &str = "LOADIT_LOG_LEVEL";
}

/// Source of environment values.
///
/// The resolver never reads the process environment directly so that tests
/// can run in parallel with their own variables.
pub trait EnvSource {
    /// Look up a variable; `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| (*v).to_string())
    }
}

/// Command-line flags. Unset flags fall through to the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct RunFlags {
    /// Number of concurrent simulated agents
    #[arg(long)]
    pub count: Option<usize>,

    /// Comma separated list of backend URLs
    #[arg(long)]
    pub backends: Option<String>,

    /// Namespace to use for agents
    #[arg(long)]
    pub namespace: Option<String>,

    /// Comma separated list of subscriptions
    #[arg(long)]
    pub subscriptions: Option<String>,

    /// Keepalive interval in seconds
    #[arg(long = "keepalive-interval")]
    pub keepalive_interval: Option<u32>,

    /// Keepalive timeout in seconds
    #[arg(long = "keepalive-timeout")]
    pub keepalive_timeout: Option<u32>,

    /// Loopback port for the profiling endpoint
    #[arg(long = "pprof-port")]
    pub pprof_port: Option<u16>,

    /// Binding for the prometheus metrics listener (empty disables it)
    #[arg(long)]
    pub prom: Option<String>,

    /// User to authenticate with the backend
    #[arg(long)]
    pub user: Option<String>,

    /// Password to authenticate with the backend
    #[arg(long)]
    pub password: Option<String>,

    /// Base entity name, suffixed with the agent number
    #[arg(long = "base-entity-name")]
    pub base_entity_name: Option<String>,

    /// Offset added to each agent's index to form its entity name
    #[arg(long = "entity-offset")]
    pub entity_offset: Option<u64>,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Agent-side authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub user: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fully resolved, validated run configuration.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Number of agents to simulate (at least one)
    pub count: usize,
    /// Added to each agent's 1-based index to form its name suffix
    pub entity_offset: u64,
    /// Name stem
    pub base_entity_name: String,
    /// Backend URLs in the order given
    pub backends: Vec<String>,
    /// Subscriptions in the order given
    pub subscriptions: Vec<String>,
    /// Agent namespace
    pub namespace: String,
    /// Agent credentials
    pub credentials: Credentials,
    /// Keepalive interval in seconds
    pub keepalive_interval_s: u32,
    /// Keepalive timeout in seconds
    pub keepalive_timeout_s: u32,
    /// Loopback port of the profiling endpoint
    pub profiling_port: u16,
    /// Metrics binding as given (passed through to agents)
    pub metrics_binding: String,
    /// Parsed metrics listen address, `None` when disabled
    pub metrics_addr: Option<SocketAddr>,
    /// Default log level
    pub log_level: String,
}

impl RunPlan {
    /// Merge flags and environment over the built-in defaults.
    pub fn resolve(flags: RunFlags, env: &impl EnvSource) -> Result<Self> {
        let count = lookup_int(env, env::COUNT, flags.count, DEFAULT_COUNT)?;
        let keepalive_interval_s = lookup_int(
            env,
            env::KEEPALIVE_INTERVAL,
            flags.keepalive_interval,
            DEFAULT_KEEPALIVE_INTERVAL,
        )?;
        let keepalive_timeout_s = lookup_int(
            env,
            env::KEEPALIVE_TIMEOUT,
            flags.keepalive_timeout,
            DEFAULT_KEEPALIVE_TIMEOUT,
        )?;
        let profiling_port =
            lookup_int(env, env::PPROF_PORT, flags.pprof_port, DEFAULT_PPROF_PORT)?;
        let entity_offset = lookup_int(
            env,
            env::ENTITY_OFFSET,
            flags.entity_offset,
            DEFAULT_ENTITY_OFFSET,
        )?;

        let backends = split_list(&lookup_string(
            env,
            env::BACKENDS,
            flags.backends,
            DEFAULT_BACKENDS,
        ));
        let subscriptions = split_list(&lookup_string(
            env,
            env::SUBSCRIPTIONS,
            flags.subscriptions,
            DEFAULT_SUBSCRIPTIONS,
        ));
        let metrics_binding = lookup_string(env, env::PROM, flags.prom, DEFAULT_PROM_BINDING);
        let metrics_addr = parse_binding(&metrics_binding)?;

        let plan = Self {
            count,
            entity_offset,
            base_entity_name: lookup_string(
                env,
                env::ENTITY_NAME,
                flags.base_entity_name,
                DEFAULT_ENTITY_NAME,
            ),
            backends,
            subscriptions,
            namespace: lookup_string(env, env::NAMESPACE, flags.namespace, DEFAULT_NAMESPACE),
            credentials: Credentials {
                user: lookup_string(env, env::USER, flags.user, DEFAULT_USER),
                password: lookup_string(env, env::PASSWORD, flags.password, DEFAULT_PASSWORD),
            },
            keepalive_interval_s,
            keepalive_timeout_s,
            profiling_port,
            metrics_binding,
            metrics_addr,
            log_level: lookup_string(env, env::LOG_LEVEL, flags.log_level, DEFAULT_LOG_LEVEL),
        };

        plan.validate()?;
        Ok(plan)
    }

    /// Check the plan invariants.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(LoaditError::Config("count must be at least 1".to_string()));
        }
        if self.base_entity_name.trim().is_empty() {
            return Err(LoaditError::Config(
                "base entity name must not be empty".to_string(),
            ));
        }
        if self.backends.is_empty() {
            return Err(LoaditError::Config(
                "at least one backend URL is required".to_string(),
            ));
        }
        if self.subscriptions.is_empty() {
            return Err(LoaditError::Config(
                "at least one subscription is required".to_string(),
            ));
        }
        if self.keepalive_interval_s == 0 || self.keepalive_timeout_s == 0 {
            return Err(LoaditError::Config(
                "keepalive interval and timeout must be positive".to_string(),
            ));
        }
        // The last suffix must fit in u64.
        if self.entity_offset.checked_add(self.count as u64).is_none() {
            return Err(LoaditError::Config(format!(
                "entity offset {} overflows with count {}",
                self.entity_offset, self.count
            )));
        }
        Ok(())
    }

    /// First and last name suffix of the population.
    pub fn name_range(&self) -> (u64, u64) {
        (
            1 + self.entity_offset,
            self.count as u64 + self.entity_offset,
        )
    }

    /// Profiling listen address on loopback.
    pub fn profiling_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.profiling_port))
    }
}

fn lookup_string(
    env: &impl EnvSource,
    key: &str,
    flag: Option<String>,
    default: &str,
) -> String {
    flag.or_else(|| env.get(key))
        .unwrap_or_else(|| default.to_string())
}

fn lookup_int<T>(env: &impl EnvSource, key: &str, flag: Option<T>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let from_env = match env.get(key) {
        Some(raw) => Some(raw.trim().parse::<T>().map_err(|e| LoaditError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?),
        None => None,
    };

    Ok(flag.or(from_env).unwrap_or(default))
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a metrics binding.
///
/// Accepts `host:port`, `ip:port`, and the `:port` shorthand for all
/// interfaces. An empty binding disables the listener.
pub fn parse_binding(binding: &str) -> Result<Option<SocketAddr>> {
    let binding = binding.trim();
    if binding.is_empty() {
        return Ok(None);
    }

    let full = if binding.starts_with(':') {
        format!("0.0.0.0{binding}")
    } else {
        binding.to_string()
    };

    if let Ok(addr) = full.parse::<SocketAddr>() {
        return Ok(Some(addr));
    }

    full.to_socket_addrs()
        .map_err(|e| LoaditError::Config(format!("invalid metrics binding {binding:?}: {e}")))?
        .next()
        .map(Some)
        .ok_or_else(|| {
            LoaditError::Config(format!("metrics binding {binding:?} resolved to no address"))
        })
}
