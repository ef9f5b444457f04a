//! Entity system information.

use serde::{Deserialize, Serialize};

/// Host facts reported in every keepalive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Host name
    pub hostname: String,
    /// Operating system family
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Logical CPUs
    pub cpus: usize,
    /// Process id of the agent
    pub pid: u32,
}

impl SystemInfo {
    /// Fixed facts derived from the agent name. Never touches the host.
    pub fn mock(agent_name: &str) -> Self {
        Self {
            hostname: agent_name.to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            cpus: 1,
            pid: 0,
        }
    }

    /// Read the facts of the current host.
    pub fn probe() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            hostname,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
            pid: std::process::id(),
        }
    }
}
