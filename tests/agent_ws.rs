//! End-to-end tests over a real listener and WebSocket clients

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleet_gateway::config::file::FleetConfigFile;
use fleet_gateway::devices::{JsonFileStore, RegistryStore};
use fleet_gateway::{Config, Daemon, Directive, DirectiveDispatcher, SessionManager};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    registry_path: std::path::PathBuf,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<fleet_gateway::Result<()>>,
    _dir: TempDir,
}

async fn start() -> Running {
    let dir = TempDir::new().unwrap();
    let registry_path = dir.path().join("devices.json");
    let path = registry_path.display().to_string();

    let config = Config::from_sources(FleetConfigFile::default(), |key| match key {
        "FLEET_BIND" => Some("127.0.0.1".to_string()),
        "FLEET_PORT" => Some("0".to_string()),
        "FLEET_REGISTRY_PATH" => Some(path.clone()),
        _ => None,
    })
    .unwrap();

    let daemon = Daemon::new(config).await.unwrap();
    let addr = daemon.local_addr().unwrap();
    let sessions = daemon.sessions();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(daemon.run_until(async {
        let _ = stopped.await;
    }));

    Running {
        addr,
        sessions,
        registry_path,
        stop,
        handle,
        _dir: dir,
    }
}

async fn client(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send_json(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text or close frame, skipping liveness traffic
async fn next_frame(ws: &mut Client) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            Message::Ping(_) | Message::Pong(_) => {}
            other => return other,
        }
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

async fn wait_active(sessions: &Arc<SessionManager>, identity: &'static str, active: bool) {
    eventually(|| {
        let sessions = sessions.clone();
        async move {
            sessions
                .device(identity)
                .await
                .is_some_and(|record| record.active == active)
        }
    })
    .await;
}

fn register(username: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "register",
        "username": username,
        "uuid": "machine-1",
        "starttime": 1_700_000_000_i64,
    })
}

#[tokio::test]
async fn agent_registers_and_receives_directive() {
    let server = start().await;
    let mut agent = client(server.addr).await;

    send_json(&mut agent, register("agentA")).await;
    wait_active(&server.sessions, "agentA", true).await;

    let record = server.sessions.device("agentA").await.unwrap();
    assert_eq!(record.external_id, "machine-1");
    assert!(
        record
            .remote_address
            .as_deref()
            .is_some_and(|addr| addr.starts_with("127.0.0.1:"))
    );

    let dispatcher = DirectiveDispatcher::new(server.sessions.clone());
    let outcome = dispatcher
        .dispatch("agentA", &Directive::new("rotate-logs"))
        .await;
    assert!(outcome.delivered);

    match next_frame(&mut agent).await {
        Message::Text(text) => assert_eq!(text.as_str(), "directive:rotate-logs"),
        other => panic!("expected directive, got {other:?}"),
    }

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_agent_with_same_identity_is_refused() {
    let server = start().await;
    let mut first = client(server.addr).await;
    send_json(&mut first, register("agentA")).await;
    wait_active(&server.sessions, "agentA", true).await;

    let mut second = client(server.addr).await;
    send_json(&mut second, register("agentA")).await;

    match next_frame(&mut second).await {
        Message::Text(text) => {
            let reply: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(reply["error"], "username_taken");
        }
        other => panic!("expected error reply, got {other:?}"),
    }
    match next_frame(&mut second).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected close, got {other:?}"),
    }

    // The first agent is still bound
    assert_eq!(server.sessions.bound_identities().await.len(), 1);

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_identity_is_refused() {
    let server = start().await;
    let mut agent = client(server.addr).await;
    send_json(&mut agent, register("ab")).await;

    match next_frame(&mut agent).await {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"error":"invalid_username"}"#),
        other => panic!("expected error reply, got {other:?}"),
    }
    assert_eq!(server.sessions.count().await, 0);

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn agent_close_marks_device_offline_on_disk() {
    let server = start().await;
    let mut agent = client(server.addr).await;
    send_json(&mut agent, register("agentA")).await;
    wait_active(&server.sessions, "agentA", true).await;

    agent
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })))
        .await
        .unwrap();
    wait_active(&server.sessions, "agentA", false).await;

    let record = server.sessions.device("agentA").await.unwrap();
    assert_eq!(
        record.last_disconnect_reason.as_deref(),
        Some("remote_close:1000")
    );

    let store = JsonFileStore::new(&server.registry_path);
    let path = server.registry_path.clone();
    eventually(|| {
        let store = store.clone();
        async move {
            store
                .load()
                .await
                .is_ok_and(|devices| devices.get("agentA").is_some_and(|r| !r.active))
        }
    })
    .await;
    assert!(path.exists());

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_agents_and_writes_final_snapshot() {
    let server = start().await;
    let mut agent = client(server.addr).await;
    send_json(&mut agent, register("agentA")).await;
    wait_active(&server.sessions, "agentA", true).await;

    let _ = server.stop.send(());

    match next_frame(&mut agent).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close, got {other:?}"),
    }
    server.handle.await.unwrap().unwrap();

    let devices = JsonFileStore::new(&server.registry_path).load().await.unwrap();
    let record = &devices["agentA"];
    assert!(!record.active);
    assert_eq!(record.last_disconnect_reason.as_deref(), Some("shutdown"));
}

#[tokio::test]
async fn health_is_served_over_http() {
    let server = start().await;

    let response = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap();
    assert!(response.status().is_success());
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}
