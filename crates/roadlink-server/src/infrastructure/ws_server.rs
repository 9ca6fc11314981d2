//! WebSocket server: accept loop and per-connection tasks.
//!
//! Each accepted TCP connection gets one task that owns the read half of the
//! socket and one writer task that drains the connection's outbox into the
//! write half.  The outbox is a bounded `mpsc` channel; its sender is what the
//! [`BroadcastRouter`](crate::application::BroadcastRouter) stores, so every
//! frame for one recipient is written in the order it was queued.
//!
//! The session ends when the peer closes, the socket errors, or the writer
//! stops because the router detached the outbox.  In every case the
//! [`ConnectionSupervisor`] is dropped, which runs the leave path.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use roadlink_core::domain::{DeviceRegistry, VehicleClass};

use crate::application::{ConnectionSupervisor, EmergencyCoordinator, RoadState};
use crate::domain::ServerConfig;

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const WRITER_DRAIN: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Server context ────────────────────────────────────────────────────────────

/// State shared by every connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub coordinator: Arc<EmergencyCoordinator>,
    pub config: Arc<ServerConfig>,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config.build_registry(), config)
    }

    /// Builds the context around an existing registry.
    pub fn with_registry(registry: DeviceRegistry, config: ServerConfig) -> Self {
        let road = Arc::new(RoadState::new(registry));
        let coordinator = Arc::new(EmergencyCoordinator::new(
            road,
            config.build_ack_tracker(),
            config.monitor,
        ));
        Self {
            coordinator,
            config: Arc::new(config),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `ctx.config.bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(ctx: ServerContext, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("RoadLink server listening on ws://{bind_addr}");
    serve(listener, ctx, running).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
///
/// The loop wakes every 200 ms to check `running`.  Connections accepted
/// before shutdown keep running until their peers close.
pub async fn serve(listener: TcpListener, ctx: ServerContext, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_vehicle_session(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_vehicle_session(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
    match run_session(stream, peer_addr, ctx).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) -> anyhow::Result<()> {
    let mut hint = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        hint = class_hint(req.uri().query());
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, out_rx) = mpsc::channel::<Arc<String>>(ctx.config.outbox_capacity);

    let supervisor = ConnectionSupervisor::join(Arc::clone(&ctx.coordinator), hint, Arc::new(out_tx));
    let device_id = supervisor.device_id();
    info!(%device_id, %peer_addr, class = %supervisor.class(), "session established");

    let mut writer = tokio::spawn(write_frames(ws_tx, out_rx, peer_addr));
    let mut writer_done = false;

    loop {
        let frame = tokio::select! {
            _ = &mut writer => {
                debug!(%device_id, "outbox closed; ending session");
                writer_done = true;
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!(%device_id, "WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!(%device_id, "WebSocket error: {e}");
                break;
            }
            None => {
                debug!(%device_id, "stream ended");
                break;
            }
        };

        match msg {
            WsMessage::Text(text) => supervisor.handle_text(&text),
            WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => supervisor.handle_text(text),
                Err(_) => warn!(%device_id, "non-UTF-8 binary frame dropped"),
            },
            WsMessage::Ping(data) => debug!(%device_id, "WebSocket ping ({} bytes)", data.len()),
            WsMessage::Pong(_) => debug!(%device_id, "WebSocket pong"),
            WsMessage::Close(_) => {
                debug!(%device_id, "close frame received");
                break;
            }
            WsMessage::Frame(_) => debug!(%device_id, "raw frame ignored"),
        }
    }

    // Leave path: unregister, detach, force-clear if this device owned the
    // session.  Detaching drops the last outbox sender, which ends the writer.
    drop(supervisor);

    if !writer_done && timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!(%device_id, "writer did not drain in time; aborting");
        writer.abort();
    }
    Ok(())
}

/// Drains the outbox into the socket, then sends a close frame.
async fn write_frames(mut sink: WsSink, mut outbox: mpsc::Receiver<Arc<String>>, peer_addr: SocketAddr) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = sink.send(WsMessage::Text(frame.as_str().to_owned())).await {
            debug!("session {peer_addr}: send failed: {e}");
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("session {peer_addr}: close failed: {e}");
    }
}

// ── Handshake helpers ─────────────────────────────────────────────────────────

/// Reads the vehicle class requested by the `type` query parameter.
///
/// Unknown values are ignored so the placement policy picks a class.
pub fn class_hint(query: Option<&str>) -> Option<VehicleClass> {
    let value = query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "type")
        .map(|(_, value)| value)?;
    match value {
        "emergency" | "emergency_vehicle" => Some(VehicleClass::Emergency),
        "truck" => Some(VehicleClass::Truck),
        "motorcycle" => Some(VehicleClass::Motorcycle),
        "regular" | "regular_car" => Some(VehicleClass::Regular),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_hint_emergency() {
        assert_eq!(class_hint(Some("type=emergency")), Some(VehicleClass::Emergency));
        assert_eq!(class_hint(Some("type=emergency_vehicle")), Some(VehicleClass::Emergency));
    }

    #[test]
    fn test_class_hint_among_other_params() {
        assert_eq!(class_hint(Some("name=a1&type=truck&x=2")), Some(VehicleClass::Truck));
    }

    #[test]
    fn test_class_hint_absent_or_unknown() {
        assert_eq!(class_hint(None), None);
        assert_eq!(class_hint(Some("")), None);
        assert_eq!(class_hint(Some("type=hovercraft")), None);
        assert_eq!(class_hint(Some("kind=emergency")), None);
    }

    #[tokio::test]
    async fn test_serve_stops_when_flag_cleared() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ctx = ServerContext::new(ServerConfig::default());
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(serve(listener, ctx, Arc::clone(&running)));

        // Act
        running.store(false, Ordering::Relaxed);

        // Assert: the loop notices within one accept poll.
        assert!(timeout(Duration::from_secs(2), task).await.is_ok());
    }
}
