//! End-to-end WebSocket agent tests.
//!
//! A local backend stand-in accepts the agent's upgrade, checks the identity
//! headers and reads keepalives over a real connection.

use std::time::Duration;

use futures::StreamExt;
use http::HeaderMap;
use loadit::agent::{KeepaliveEvent, WsMessage};
use loadit::{Agent, AgentConfig, AgentFactory, LoaditError, WsAgentFactory};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// What the backend stand-in observed on one connection.
struct Observed {
    headers: HeaderMap,
    first_keepalive: WsMessage<KeepaliveEvent>,
}

fn agent_config(port: u16) -> AgentConfig {
    AgentConfig {
        agent_name: "host-1".to_string(),
        namespace: "perf".to_string(),
        backend_urls: vec![format!("ws://127.0.0.1:{port}/agentws")],
        subscriptions: vec!["linux".to_string()],
        keepalive_interval: 1,
        mock_system_info: true,
        deregister: true,
        ..AgentConfig::new()
    }
}

/// Accept one agent, report its headers and first keepalive, then read
/// until the agent closes. Resolves to whether a close frame arrived.
async fn backend(listener: TcpListener, observed: oneshot::Sender<Observed>) -> bool {
    let (stream, _) = listener.accept().await.unwrap();

    let mut headers = HeaderMap::new();
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        headers = req.headers().clone();
        Ok(resp)
    };
    let mut ws = accept_hdr_async(stream, capture).await.unwrap();

    let mut observed = Some(observed);
    let mut headers = Some(headers);
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let (Some(tx), Some(h)) = (observed.take(), headers.take()) {
                    let first_keepalive = serde_json::from_str(&text).unwrap();
                    let _ = tx.send(Observed {
                        headers: h,
                        first_keepalive,
                    });
                }
            },
            Ok(Message::Close(_)) => return true,
            Ok(_) => {},
            Err(_) => return false,
        }
    }
    false
}

#[tokio::test]
async fn test_agent_registers_and_closes_on_cancel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();
    let server = tokio::spawn(backend(listener, tx));

    let agent = WsAgentFactory::new().new_agent(agent_config(port)).unwrap();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(agent.run(cancel.clone()));

    let observed = timeout(Duration::from_secs(5), rx)
        .await
        .expect("no keepalive received")
        .unwrap();

    assert_eq!(observed.headers["sensu-agentname"], "host-1");
    assert_eq!(observed.headers["sensu-namespace"], "perf");
    assert_eq!(observed.headers["sensu-subscriptions"], "linux");
    assert!(observed.headers["authorization"]
        .to_str()
        .unwrap()
        .starts_with("Basic "));

    let keepalive = observed.first_keepalive;
    assert_eq!(keepalive.msg_type, "keepalive");
    assert_eq!(keepalive.payload.entity.name, "host-1");
    assert_eq!(keepalive.payload.entity.namespace, "perf");
    assert!(keepalive.payload.entity.deregister);
    assert_eq!(keepalive.payload.check.interval, 1);

    cancel.cancel();

    let result = timeout(Duration::from_secs(5), run)
        .await
        .expect("agent ignored cancellation")
        .unwrap();
    assert!(result.is_ok());

    let saw_close = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(saw_close);
}

#[tokio::test]
async fn test_rejected_credentials_end_the_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
            Err(http::Response::builder()
                .status(http::StatusCode::UNAUTHORIZED)
                .body(None)
                .unwrap())
        };
        let _ = accept_hdr_async(stream, reject).await;
    });

    let agent = WsAgentFactory::new().new_agent(agent_config(port)).unwrap();
    let result = timeout(Duration::from_secs(5), agent.run(CancellationToken::new()))
        .await
        .expect("agent kept retrying after 401");

    assert!(matches!(result, Err(LoaditError::Unauthorized(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn test_agent_reconnects_after_backend_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // First connection is closed right after the upgrade, second is kept.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    });

    let agent = WsAgentFactory::new().new_agent(agent_config(port)).unwrap();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(agent.run(cancel.clone()));

    let reconnected = timeout(Duration::from_secs(10), server)
        .await
        .expect("agent did not reconnect")
        .unwrap();
    assert!(reconnected);

    cancel.cancel();
    let result = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(result.is_ok());
}
