//! `WebSocket` RPC session: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warden_audit::AuditRecorder;
use warden_core::GatewayError;
use warden_rpc::{FacadeTable, MethodKey, RpcError};

use crate::metrics::{
    AUDIT_FAILURES_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::root::RpcRoot;

type RpcMessage = warden_rpc::Message;

/// Outbound frames buffered per connection.
const SEND_QUEUE: usize = 256;

/// Time the outbound forwarder gets to flush and send a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// An inbound `WebSocket` frame, classified.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A JSON text payload.
    Text(String),
    /// Control or undecodable frame; nothing to dispatch.
    Skip,
    /// The client is closing.
    Close,
}

/// Text and UTF-8 binary frames carry RPC messages.
pub(crate) fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(t) => Inbound::Text(t.to_string()),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(s) => Inbound::Text(s.to_owned()),
            Err(_) => {
                debug!(len = data.len(), "dropping non-UTF8 binary frame");
                Inbound::Skip
            }
        },
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
    }
}

/// Run an RPC session over `ws`.
///
/// Frames are read in order. Each one is resolved against `root` (which
/// counts it as a heartbeat) and audited. `Admin` calls run inline so login
/// completes before the next frame is read; every other call runs on its
/// own task. The session ends when the client closes, the heartbeat monitor
/// fires, or `shutdown` is cancelled; the root is then closed.
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_rpc_session<R: RpcRoot>(
    ws: WebSocket,
    conn_id: String,
    root: Arc<R>,
    audit: Arc<AuditRecorder>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(SEND_QUEUE);

    let connection_start = Instant::now();
    info!(conversation_id = audit.conversation_id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let dead = root.heartbeat().dead().fired();
    tokio::pin!(dead);
    let mut calls = JoinSet::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            () = &mut dead => {
                counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                warn!("no frame within the ping timeout, disconnecting");
                break;
            }
            Some(_) = calls.join_next(), if !calls.is_empty() => {}
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "read failed");
                        break;
                    }
                    None => break,
                };
                match classify(msg) {
                    Inbound::Text(text) => {
                        handle_frame(&text, &root, &audit, &send_tx, &mut calls).await;
                    }
                    Inbound::Skip => {}
                    Inbound::Close => {
                        info!("client sent close frame");
                        break;
                    }
                }
            }
        }
    }

    let was_dead = root.close();
    calls.abort_all();
    drop(send_tx);
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(heartbeat_expired = was_dead, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

async fn handle_frame<R: RpcRoot>(
    text: &str,
    root: &Arc<R>,
    audit: &Arc<AuditRecorder>,
    send_tx: &mpsc::Sender<String>,
    calls: &mut JoinSet<()>,
) {
    let request: RpcMessage = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            root.heartbeat().heartbeat();
            let err =
                RpcError::from(GatewayError::bad_request(format!("cannot parse request: {e}")));
            send(send_tx, &err.to_reply(0)).await;
            return;
        }
    };

    let found = root.find_method(&request.facade, request.version, &request.request);

    if let Err(e) = audit.log_request(&request) {
        counter!(AUDIT_FAILURES_TOTAL, "direction" => "request").increment(1);
        warn!(error = %e, request_id = request.request_id, "cannot audit request, refusing it");
        let err = RpcError::from(GatewayError::internal("cannot audit request"));
        send(send_tx, &err.to_reply(request.request_id)).await;
        return;
    }

    let handler = match found {
        Ok(handler) => handler,
        Err(err) => {
            reply(&request, Err(err), audit, send_tx).await;
            return;
        }
    };

    let key = MethodKey::new(&request.facade, request.version, &request.request);
    let params = request.params.clone();
    let id = request.id.clone();

    if request.facade == "Admin" {
        let result = FacadeTable::invoke(handler, &key, Arc::clone(root), id, params).await;
        if let Some(tag) = root.identity_tag() {
            audit.set_identity(tag);
        }
        reply(&request, result, audit, send_tx).await;
        return;
    }

    let root = Arc::clone(root);
    let audit = Arc::clone(audit);
    let send_tx = send_tx.clone();
    let _ = calls.spawn(async move {
        let result = FacadeTable::invoke(handler, &key, root, id, params).await;
        reply(&request, result, &audit, &send_tx).await;
    });
}

async fn reply(
    request: &RpcMessage,
    result: Result<Value, RpcError>,
    audit: &AuditRecorder,
    send_tx: &mpsc::Sender<String>,
) {
    let message = match result {
        Ok(body) => RpcMessage::reply(request.request_id, body),
        Err(err) => err.to_reply(request.request_id),
    };
    if let Err(e) = audit.log_reply(request, &message) {
        counter!(AUDIT_FAILURES_TOTAL, "direction" => "reply").increment(1);
        warn!(error = %e, request_id = request.request_id, "cannot audit reply");
    }
    send(send_tx, &message).await;
}

async fn send(send_tx: &mpsc::Sender<String>, message: &RpcMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            if send_tx.send(text).await.is_err() {
                debug!(request_id = message.request_id, "connection gone, reply dropped");
            }
        }
        Err(e) => warn!(error = %e, "cannot encode reply"),
    }
}
