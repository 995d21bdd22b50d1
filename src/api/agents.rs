//! Agent WebSocket endpoint
//!
//! Each socket gets a [`ChannelTransport`]. One task both reads agent
//! frames into the session manager and pumps whatever the manager queues
//! back onto the wire, so a server-side close also ends the read loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::Extensions,
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};

use super::ApiState;
use crate::sessions::{ChannelTransport, DisconnectReason, Outbound, SessionEvent, SessionManager};

/// Build the agent WebSocket router
#[must_use]
pub fn router<S: Clone + Send + Sync + 'static>(state: Arc<ApiState>) -> Router<S> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade for agent connections
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| handle_agent_socket(socket, sessions, remote))
}

/// Drive one agent connection until either side closes it
async fn handle_agent_socket(
    socket: WebSocket,
    sessions: Arc<SessionManager>,
    remote: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new();
    let conn = sessions.connect(transport, remote).await;

    let reason = loop {
        tokio::select! {
            incoming = receiver.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => SessionEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Pong(_))) => SessionEvent::Pong,
                    // Pings are answered by the socket itself
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(%conn, "ignoring binary frame");
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break DisconnectReason::RemoteClose(frame.map(|f| f.code));
                    }
                    Some(Err(e)) => break DisconnectReason::Error(e.to_string()),
                    None => break DisconnectReason::RemoteClose(None),
                };
                // Refusals and malformed frames are logged by the manager
                let _ = sessions.handle(conn, event).await;
            }
            frame = outbound.recv() => {
                let sent = match frame {
                    Some(Outbound::Text(text)) => sender.send(Message::Text(text.into())).await,
                    Some(Outbound::Probe) => sender.send(Message::Ping(Bytes::new())).await,
                    Some(Outbound::Close { code, reason }) => {
                        let close = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = sender.send(Message::Close(Some(close))).await;
                        break DisconnectReason::ServerClose;
                    }
                    Some(Outbound::Terminate) | None => break DisconnectReason::ServerClose,
                };
                if let Err(e) = sent {
                    break DisconnectReason::Error(e.to_string());
                }
            }
        }
    };

    let _ = sessions.handle(conn, SessionEvent::Closed(reason)).await;
}
