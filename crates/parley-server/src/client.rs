use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::events::{InboundMessage, OutboundEvent};
use parley_core::identity;
use parley_engine::{Connection, RelayEngine};
use parley_telemetry::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

use crate::server::ServerConfig;

/// Drive one WebSocket from open to close.
///
/// Assigns an identity, announces it, registers the connection, then runs a
/// writer task (outbound queue + periodic ping) and a reader task (inbound
/// frames straight into the relay) until either ends or the server shuts
/// down. The connection is always removed from the registry on the way out.
pub async fn handle_ws_connection(
    socket: WebSocket,
    engine: RelayEngine,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let name = identity::assign();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(config.max_send_queue);
    let connection = Arc::new(Connection::new(name.clone(), tx));
    let conn_id = connection.id().clone();

    // Queued before registering so it is always the first frame out.
    if let Err(e) = connection.send_event(&OutboundEvent::Identity { name: name.clone() }) {
        tracing::warn!(conn_id = %conn_id, error = %e, "failed to queue identity");
    }
    engine.registry().add(Arc::clone(&connection));
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    tracing::info!(conn_id = %conn_id, identity = %name, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = conn_id.clone();
    let heartbeat = config.heartbeat_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(WsMessage::Text(frame.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = conn_id.clone();
    let reader_engine = engine.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => match InboundMessage::from_frame(text.as_str(), &name) {
                    Ok(message) => {
                        let _ = reader_engine.relay(&reader_cid, message);
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %reader_cid, error = %e, "dropping malformed frame");
                    }
                },
                WsMessage::Binary(bytes) => {
                    tracing::warn!(conn_id = %reader_cid, len = bytes.len(), "dropping binary frame");
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {},
        _ = &mut reader => {},
        () = shutdown.cancelled() => {},
    }
    writer.abort();
    reader.abort();

    connection.begin_close();
    engine.registry().remove(&conn_id);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    tracing::info!(
        conn_id = %conn_id,
        connected_ms = connection.age().as_millis() as u64,
        dropped = connection.drop_count(),
        "client disconnected"
    );
}
