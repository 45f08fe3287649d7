use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tetrisparty::actor::now;
use tetrisparty::{
    ClientMessage, ConnectionHandle, ConnectionId, ConnectionIds, Outgoing, RoomError, RoomHandle, RoomRegistry,
    ServerConfig,
};

type SharedRegistry = Arc<Mutex<RoomRegistry>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    let registry: SharedRegistry = Arc::new(Mutex::new(RoomRegistry::new(config.room_config())));

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), public_url = %config.public_url(), "server listening");
    if config.is_local_only() {
        warn!("join links point at this machine only; set PUBLIC_URL so phones can reach the server");
    }

    let mut ids = ConnectionIds::default();
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "tcp connected");
        let registry = registry.clone();
        let id = ids.next_id();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, addr, id, registry).await {
                warn!(%addr, error = ?e, "connection error");
            }
        });
    }
}

async fn handle_conn(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    registry: SharedRegistry,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (conn, mut out_rx) = ConnectionHandle::channel(id);
    info!(conn = %conn.id(), %addr, "websocket connected");

    // Rooms only ever hold the handle; this task owns the socket's write half.
    let writer = tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            match item {
                Outgoing::Message(msg) => match msg.to_json() {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode message"),
                },
                Outgoing::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut bound: Option<RoomHandle> = None;
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "websocket read failed");
                break;
            }
        };
        let msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "ignoring malformed message");
                continue;
            }
        };

        match &bound {
            Some(room) => room.send(conn.id(), msg),
            None => bound = route_hello(&registry, &conn, msg).await,
        }
        if !conn.is_open() {
            break;
        }
    }

    if let Some(room) = bound {
        room.closed(conn.id());
    }
    conn.close();
    let _ = writer.await;
    info!(conn = %conn.id(), "websocket closed");
    Ok(())
}

/// First message on a fresh connection: open a room or find the one it names.
async fn route_hello(registry: &SharedRegistry, conn: &ConnectionHandle, msg: ClientMessage) -> Option<RoomHandle> {
    let code = match &msg {
        ClientMessage::CreateRoom => {
            return match registry.lock().await.create(conn.clone(), now()) {
                Ok(room) => Some(room),
                Err(e) => {
                    warn!(error = %e, "room creation failed");
                    conn.send(e.to_message());
                    None
                }
            };
        }
        ClientMessage::Join { room_code, .. }
        | ClientMessage::Rejoin { room_code, .. }
        | ClientMessage::Spectate { room_code } => room_code.clone(),
        _ => {
            debug!(conn = %conn.id(), "message before joining a room");
            return None;
        }
    };

    let Some(room) = registry.lock().await.lookup(&code) else {
        conn.send(RoomError::RoomNotFound(code).to_message());
        return None;
    };
    room.connect(conn.clone(), msg).await.then_some(room)
}
