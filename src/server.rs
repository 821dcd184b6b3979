//! WebSocket surface for dashboard clients.
//!
//! Clients connect to `/ws` (or `/`), immediately receive the current
//! connection status and vitals, then get every broadcast. They may send
//! `list-ports`, `connect` and `disconnect` commands.

use std::net::SocketAddr;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::bridge::BridgeHandle;
use crate::errors::Result;
use crate::hub::Hub;
use crate::messages::{InboundCommand, OutboundMessage};

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub bridge: BridgeHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("WebSocket server running on ws://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.hub.status();
    Json(serde_json::json!({
        "status": "ok",
        "serialConnected": status.connected,
        "port": status.port,
        "clients": state.hub.listeners(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut updates = state.hub.subscribe();
    info!("client connected ({} listening)", state.hub.listeners());

    for message in state.hub.greeting() {
        if send_json(&mut sink, &message).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => {
                    if send_json(&mut sink, &message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("client lagged, skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_command(text.as_str(), &state).await {
                        if send_json(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("websocket receive error: {}", e);
                    break;
                }
            },
        }
    }

    info!("client disconnected");
}

/// Act on one client message; returns the reply meant for that client only.
async fn handle_command(text: &str, state: &AppState) -> Option<OutboundMessage> {
    let result = match InboundCommand::parse(text) {
        Ok(InboundCommand::ListPorts) => state
            .bridge
            .list_ports()
            .await
            .map(|ports| Some(OutboundMessage::PortsList { ports })),
        Ok(InboundCommand::Connect { port }) => state.bridge.connect(port).await.map(|_| None),
        Ok(InboundCommand::Disconnect) => state.bridge.disconnect().await.map(|_| None),
        Err(e) => Err(e),
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!("error handling client message: {}", e);
            Some(OutboundMessage::Error {
                message: e.to_string(),
            })
        }
    }
}

async fn send_json<S>(sink: &mut S, message: &OutboundMessage) -> Result<()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = message.to_json()?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|_| crate::BridgeError::ChannelClosed("websocket closed".into()))
}
