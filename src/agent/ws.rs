//! WebSocket agent.
//!
//! Each agent keeps one session open to a backend, sends a keepalive event
//! every `keepalive_interval` seconds and pings the backend every
//! `backend_heartbeat_interval` seconds. A session that stays silent for
//! `backend_heartbeat_timeout` seconds is dropped and the agent reconnects
//! to the next backend in its list.
//!
//! # Session
//!
//! ```text
//! Agent                                   Backend
//!   |---- upgrade (auth + identity headers) -->|
//!   |<--------------- 101 ---------------------|
//!   |---- keepalive (immediately) ------------>|
//!   |---- keepalive (every interval) --------->|
//!   |---- ping (every heartbeat) ------------->|
//!   |<--- pong --------------------------------|
//!   |---- close (on cancellation) ------------>|
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use futures::{Sink, SinkExt, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::{interval, interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::config::AgentConfig;
use super::sysinfo::SystemInfo;
use super::{Agent, AgentFactory, AgentRun};
use crate::error::{LoaditError, Result};

/// Message type of keepalive events
pub const KEEPALIVE_MESSAGE_TYPE: &str = "keepalive";

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const HEADER_AGENT_NAME: &str = "sensu-agentname";
const HEADER_NAMESPACE: &str = "sensu-namespace";
const HEADER_USER: &str = "sensu-user";
const HEADER_SUBSCRIPTIONS: &str = "sensu-subscriptions";
const HEADER_DEREGISTER: &str = "sensu-deregister";

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Envelope of every frame sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage<P = serde_json::Value> {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Message body
    pub payload: P,
}

/// Entity announced by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Always `agent`
    pub entity_class: String,
    /// Configured subscriptions followed by `entity:{name}`
    pub subscriptions: Vec<String>,
    /// Host facts
    pub system: SystemInfo,
    /// Remove the entity once keepalives stop
    pub deregister: bool,
    /// Handler run on deregistration
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deregistration_handler: Option<String>,
    /// User the agent authenticated as
    pub user: String,
}

/// The keepalive check definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveCheck {
    /// Always `keepalive`
    pub name: String,
    /// Seconds between keepalives
    pub interval: u32,
    /// Seconds before the backend raises a warning
    pub timeout: u32,
}

/// Payload of a keepalive message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveEvent {
    /// Sending entity
    pub entity: Entity,
    /// Keepalive check
    pub check: KeepaliveCheck,
    /// Unix seconds
    pub timestamp: i64,
}

/// Factory for [`WsAgent`]s.
///
/// Agents are spread over the backend list in construction order: the n-th
/// agent starts with backend `n % len`.
#[derive(Debug, Default)]
pub struct WsAgentFactory {
    constructed: AtomicUsize,
}

impl WsAgentFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentFactory for WsAgentFactory {
    fn new_agent(&self, config: AgentConfig) -> Result<Box<dyn Agent>> {
        config.validate()?;
        let index = self.constructed.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(WsAgent::new(config, index)?))
    }
}

/// Why a session ended without an error.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Disconnected(String),
}

/// Agent speaking the backend WebSocket protocol.
#[derive(Debug)]
pub struct WsAgent {
    config: AgentConfig,
    system: SystemInfo,
    headers: HeaderMap,
    first_backend: usize,
}

impl WsAgent {
    /// Prepare an agent; `first_backend` selects the initial backend.
    pub fn new(config: AgentConfig, first_backend: usize) -> Result<Self> {
        let system = if config.mock_system_info {
            SystemInfo::mock(&config.agent_name)
        } else {
            SystemInfo::probe()
        };
        let headers = handshake_headers(&config)?;

        Ok(Self {
            config,
            system,
            headers,
            first_backend,
        })
    }

    /// Agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Backend tried on the given connection attempt.
    pub fn backend_for_attempt(&self, attempt: usize) -> &str {
        let urls = &self.config.backend_urls;
        &urls[(self.first_backend + attempt) % urls.len()]
    }

    /// Keepalive event as of now.
    pub fn keepalive_event(&self) -> KeepaliveEvent {
        let mut subscriptions = self.config.subscriptions.clone();
        subscriptions.push(format!("entity:{}", self.config.agent_name));

        KeepaliveEvent {
            entity: Entity {
                name: self.config.agent_name.clone(),
                namespace: self.config.namespace.clone(),
                entity_class: "agent".to_string(),
                subscriptions,
                system: self.system.clone(),
                deregister: self.config.deregister,
                deregistration_handler: Some(self.config.deregistration_handler.clone())
                    .filter(|h| !h.is_empty()),
                user: self.config.user.clone(),
            },
            check: KeepaliveCheck {
                name: KEEPALIVE_MESSAGE_TYPE.to_string(),
                interval: self.config.keepalive_interval,
                timeout: self.config.keepalive_warning_timeout,
            },
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    async fn run_loop(self, cancel: CancellationToken) -> Result<()> {
        let name = self.config.agent_name.as_str();
        let mut backoff = BACKOFF_INITIAL;
        let mut attempt = 0usize;

        loop {
            let backend = self.backend_for_attempt(attempt).to_string();
            metrics::counter!("loadit_agent_connect_attempts_total", "backend" => backend.clone())
                .increment(1);

            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.connect(&backend) => res,
            };

            match connected {
                Ok(stream) => {
                    tracing::debug!(agent = %name, backend = %backend, "connected");
                    backoff = BACKOFF_INITIAL;

                    metrics::gauge!("loadit_agents_connected").increment(1.0);
                    let outcome = self.session(stream, &cancel).await;
                    metrics::gauge!("loadit_agents_connected").decrement(1.0);

                    match outcome {
                        Ok(SessionEnd::Cancelled) => return Ok(()),
                        Ok(SessionEnd::Disconnected(reason)) => {
                            tracing::info!(agent = %name, backend = %backend, %reason, "disconnected");
                        },
                        Err(e) if e.is_unrecoverable() => return Err(e),
                        Err(e) => {
                            tracing::warn!(agent = %name, backend = %backend, error = %e, "session failed");
                        },
                    }
                },
                Err(e) if e.is_unrecoverable() => return Err(e),
                Err(e) => {
                    metrics::counter!("loadit_agent_connect_failures_total", "backend" => backend.clone())
                        .increment(1);
                    tracing::debug!(agent = %name, backend = %backend, error = %e, "connect failed");
                },
            }

            attempt = attempt.wrapping_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(backoff) => {},
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    async fn connect(&self, backend: &str) -> Result<Stream> {
        let mut request = backend.into_client_request()?;
        request.headers_mut().extend(self.headers.clone());

        let limit = Duration::from_secs(u64::from(self.config.backend_heartbeat_timeout));
        let (stream, _response) = tokio::time::timeout(limit, connect_async(request))
            .await
            .map_err(|_| LoaditError::Connection(format!("connect to {backend} timed out")))??;

        Ok(stream)
    }

    async fn session(&self, stream: Stream, cancel: &CancellationToken) -> Result<SessionEnd> {
        let (mut sink, mut frames) = stream.split();

        let mut keepalive = interval(Duration::from_secs(u64::from(
            self.config.keepalive_interval,
        )));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let heartbeat_every =
            Duration::from_secs(u64::from(self.config.backend_heartbeat_interval));
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let dead_after = Duration::from_secs(u64::from(self.config.backend_heartbeat_timeout));
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Best effort; the backend may already be gone or stalled.
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
                    return Ok(SessionEnd::Cancelled);
                }
                _ = keepalive.tick() => {
                    let message = WsMessage {
                        msg_type: KEEPALIVE_MESSAGE_TYPE.to_string(),
                        payload: self.keepalive_event(),
                    };
                    let frame = Message::Text(serde_json::to_string(&message)?);
                    if !send_or_cancel(&mut sink, frame, cancel, dead_after).await? {
                        return Ok(SessionEnd::Cancelled);
                    }
                    metrics::counter!("loadit_keepalives_sent_total").increment(1);
                }
                _ = heartbeat.tick() => {
                    let ping = Message::Ping(Vec::new());
                    if !send_or_cancel(&mut sink, ping, cancel, dead_after).await? {
                        return Ok(SessionEnd::Cancelled);
                    }
                }
                _ = sleep_until(last_seen + dead_after) => {
                    return Ok(SessionEnd::Disconnected("heartbeat timeout".to_string()));
                }
                frame = frames.next() => match frame {
                    None => return Ok(SessionEnd::Disconnected("stream ended".to_string())),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Close(close))) => {
                        let reason = close.map_or_else(
                            || "closed by backend".to_string(),
                            |c| format!("closed by backend: {} {}", c.code, c.reason),
                        );
                        return Ok(SessionEnd::Disconnected(reason));
                    }
                    // Pongs for incoming pings are queued by tungstenite itself.
                    Some(Ok(_)) => last_seen = Instant::now(),
                },
            }
        }
    }
}

impl Agent for WsAgent {
    fn name(&self) -> &str {
        &self.config.agent_name
    }

    fn run(self: Box<Self>, cancel: CancellationToken) -> AgentRun {
        Box::pin(async move { self.run_loop(cancel).await })
    }
}

/// Send one frame unless cancellation comes first.
///
/// Returns `Ok(false)` when cancelled. A backend that does not take the
/// frame within `limit` is treated as a dead connection.
async fn send_or_cancel<S>(
    sink: &mut S,
    frame: Message,
    cancel: &CancellationToken,
    limit: Duration,
) -> Result<bool>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        sent = tokio::time::timeout(limit, sink.send(frame)) => {
            sent.map_err(|_| {
                LoaditError::Connection(format!("backend did not take a frame within {limit:?}"))
            })??;
            Ok(true)
        }
    }
}

fn handshake_headers(config: &AgentConfig) -> Result<HeaderMap> {
    let credentials = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", config.user, config.password));

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, http::header::AUTHORIZATION, &format!("Basic {credentials}"))?;
    insert_header(
        &mut headers,
        HeaderName::from_static(HEADER_AGENT_NAME),
        &config.agent_name,
    )?;
    insert_header(
        &mut headers,
        HeaderName::from_static(HEADER_NAMESPACE),
        &config.namespace,
    )?;
    insert_header(&mut headers, HeaderName::from_static(HEADER_USER), &config.user)?;
    insert_header(
        &mut headers,
        HeaderName::from_static(HEADER_SUBSCRIPTIONS),
        &config.subscriptions.join(","),
    )?;
    insert_header(
        &mut headers,
        HeaderName::from_static(HEADER_DEREGISTER),
        if config.deregister { "true" } else { "false" },
    )?;
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| LoaditError::Config(format!("invalid value for header {name}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}
