//! Per-connection session lifecycle: the read loop and the write loop.
//!
//! Two single-writer invariants at two layers: the dispatch worker is the
//! only component that enqueues into mailboxes, and the write loop here is
//! the only component that writes to the physical transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lattice_core::ids::ConnectionId;
use lattice_core::messages::ServerMessage;

use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL,
    WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

use super::connection::{ClientConnection, MailboxReceivers};
use super::handlers::{route_message, HandlerContext};
use super::messages::{parse_client_message, ClientMessage, ParseRejection};

/// Close code sent when admission is rejected (RFC 6455 "try again later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Close codes expected during normal client departure.
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_NO_STATUS: u16 = 1005;

/// Run a WebSocket session for one connected client.
///
/// 1. Sends a `version` hello with build information
/// 2. Admits the connection (or closes the transport on rejection)
/// 3. Spawns the write loop; runs the read loop on this task
/// 4. Signals disconnect to the hub on any exit path
pub async fn run_ws_session(ws: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let (conn, mailboxes) = ClientConnection::new(id, state.config.mailbox_capacity);
    let conn = Arc::new(conn);

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Version hello goes out before the write loop owns the sink.
    let hello = ServerMessage::Version {
        version: env!("CARGO_PKG_VERSION").into(),
        commit: option_env!("LATTICE_BUILD_COMMIT").unwrap_or("dev").into(),
    };
    if let Ok(json) = serde_json::to_string(&hello) {
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    if !state.hub.connect(conn.clone()) {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "server at capacity".into(),
            })))
            .await;
        return;
    }

    let connection_start = Instant::now();
    info!(
        conn_id = %conn.id,
        total_clients = state.hub.registry().len(),
        "client connected"
    );
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer = tokio::spawn(write_loop(
        ws_tx,
        mailboxes,
        conn.clone(),
        state.shutdown.token(),
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
        state.config.write_timeout(),
    ));

    read_loop(&mut ws_rx, &conn, &state.ctx).await;

    state.hub.disconnect(&conn.id);
    info!(
        conn_id = %conn.id,
        total_clients = state.hub.registry().len(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());

    writer.abort();
}

/// The only reader of the transport.
async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &Arc<ClientConnection>,
    ctx: &HandlerContext,
) {
    debug!(conn_id = %conn.id, "read loop started");

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => handle_frame(ctx, conn, text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(ctx, conn, text).await,
                Err(_) => {
                    debug!(conn_id = %conn.id, len = data.len(), "ignoring non-UTF8 binary frame");
                }
            },
            Ok(Message::Ping(_) | Message::Pong(_)) => conn.mark_alive(),
            Ok(Message::Close(frame)) => {
                classify_close(conn, frame.as_ref());
                break;
            }
            Err(err) => {
                warn!(conn_id = %conn.id, error = %err, "websocket read error");
                break;
            }
        }
    }
}

async fn handle_frame(ctx: &HandlerContext, conn: &Arc<ClientConnection>, text: &str) {
    match parse_client_message(text) {
        Ok(ClientMessage::Ping) => conn.mark_alive(),
        Ok(msg) => route_message(ctx, conn, msg).await,
        Err(ParseRejection::UnknownType(msg_type)) => {
            // Forward-compatible: newer clients may speak newer types.
            debug!(conn_id = %conn.id, msg_type = %msg_type, "unknown message type, ignoring");
        }
        Err(ParseRejection::InvalidJson(err)) => {
            warn!(
                conn_id = %conn.id,
                error = %err,
                frame_len = text.len(),
                "failed to parse client message"
            );
        }
    }
}

/// Expected closure codes log quietly; anything else logs with detail.
fn classify_close(conn: &Arc<ClientConnection>, frame: Option<&CloseFrame>) {
    match frame {
        None => debug!(conn_id = %conn.id, "client closed without status"),
        Some(frame) => match frame.code {
            CLOSE_NORMAL | CLOSE_GOING_AWAY | CLOSE_NO_STATUS => {
                debug!(conn_id = %conn.id, code = frame.code, "client closed");
            }
            code => {
                warn!(
                    conn_id = %conn.id,
                    code,
                    reason = %frame.reason,
                    "client closed unexpectedly"
                );
            }
        },
    }
}

/// The only writer of the transport.
///
/// Drains the three mailboxes (no ordering guarantee between classes),
/// emits periodic Ping frames, and exits promptly on either the server
/// cancellation token or the connection's close token.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut mailboxes: MailboxReceivers,
    conn: Arc<ClientConnection>,
    cancel: CancellationToken,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    write_timeout: Duration,
) {
    let close = conn.close_token();
    let mut ping = tokio::time::interval(heartbeat_interval);
    let _ = ping.tick().await; // Skip the immediate first tick.

    debug!(conn_id = %conn.id, "write loop started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(conn_id = %conn.id, "write loop stopping on server shutdown");
                break;
            }
            () = close.cancelled() => {
                debug!(conn_id = %conn.id, "write loop stopping on connection close");
                break;
            }
            graph = mailboxes.graph_rx.recv() => {
                match graph {
                    Some(graph) => {
                        if !send_json(&mut ws_tx, &*graph, write_timeout).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            batch = mailboxes.log_rx.recv() => {
                match batch {
                    Some(batch) => {
                        let frame = serde_json::json!({ "type": "logs", "data": &*batch });
                        if !send_json(&mut ws_tx, &frame, write_timeout).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = mailboxes.event_rx.recv() => {
                match event {
                    Some(event) => {
                        if !send_json(&mut ws_tx, &*event, write_timeout).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if !conn.check_alive() && conn.last_pong_elapsed() > heartbeat_timeout {
                    warn!(
                        conn_id = %conn.id,
                        timeout_secs = heartbeat_timeout.as_secs(),
                        "client unresponsive, closing"
                    );
                    break;
                }
                let ping_frame = Message::Ping(Vec::new().into());
                if !send_frame(&mut ws_tx, ping_frame, write_timeout).await {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}

/// Serialize and write one frame under the write deadline.
async fn send_json<T: serde::Serialize>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    payload: &T,
    deadline: Duration,
) -> bool {
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(err) => {
            // A payload that cannot serialize is a bug, not a dead peer.
            tracing::error!(error = %err, "failed to serialize outbound frame");
            return true;
        }
    };
    send_frame(ws_tx, Message::Text(json.into()), deadline).await
}

/// Write one frame under the deadline; `false` means the loop must exit.
async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, ws_tx.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) | Err(_) => false,
    }
}
