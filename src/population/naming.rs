//! Agent identities and per-agent configuration.

use crate::agent::config::{DEFAULT_STATSD_FLUSH_INTERVAL, null_device};
use crate::agent::{AgentConfig, StatsdConfig};
use crate::config::RunPlan;

/// Backend heartbeat interval used by every simulated agent (seconds)
pub const BACKEND_HEARTBEAT_INTERVAL: u32 = 30;
/// Backend heartbeat timeout used by every simulated agent (seconds)
pub const BACKEND_HEARTBEAT_TIMEOUT: u32 = 300;

/// Name of the agent at 0-based `index`: `{base}-{offset + index + 1}`.
pub fn agent_name(base: &str, offset: u64, index: usize) -> String {
    format!("{base}-{}", offset + index as u64 + 1)
}

/// All names of the population, in construction order.
pub fn agent_names(plan: &RunPlan) -> impl Iterator<Item = String> + '_ {
    (0..plan.count).map(|i| agent_name(&plan.base_entity_name, plan.entity_offset, i))
}

/// Configuration of the agent at 0-based `index`.
///
/// Everything that would make N agents in one process fight over local
/// resources is switched off; only identity, credentials, backends,
/// subscriptions and keepalive timing come from the plan.
pub fn agent_config(plan: &RunPlan, index: usize) -> AgentConfig {
    let defaults = AgentConfig::new();

    AgentConfig {
        agent_name: agent_name(&plan.base_entity_name, plan.entity_offset, index),
        namespace: plan.namespace.clone(),
        user: plan.credentials.user.clone(),
        password: plan.credentials.password.clone(),
        backend_urls: plan.backends.clone(),
        subscriptions: plan.subscriptions.clone(),
        keepalive_interval: plan.keepalive_interval_s,
        keepalive_warning_timeout: plan.keepalive_timeout_s,
        backend_heartbeat_interval: BACKEND_HEARTBEAT_INTERVAL,
        backend_heartbeat_timeout: BACKEND_HEARTBEAT_TIMEOUT,
        api: defaults.api,
        socket: defaults.socket,
        disable_api: true,
        disable_sockets: true,
        disable_assets: true,
        cache_dir: null_device().into(),
        deregister: true,
        deregistration_handler: String::new(),
        statsd: StatsdConfig {
            disable: true,
            flush_interval: DEFAULT_STATSD_FLUSH_INTERVAL,
        },
        mock_system_info: true,
        prometheus_binding: plan.metrics_binding.clone(),
    }
}
