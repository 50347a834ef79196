//! Bidirectional frame relay between a client and a backend socket.
//!
//! Two pump tasks copy frames, one per direction. Each reports on a shared
//! end channel when it stops. The supervisor waits for the first end (or for
//! the parent token), cancels both pumps so each closes its sink, drains the
//! second end and joins both tasks.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dial::BackendSocket;
use super::errors::RelayError;
use crate::metrics::PROXY_FRAMES_TOTAL;

/// Rewrites a text frame in flight. Returning `None` drops the frame.
pub type TextFilter = Box<dyn FnMut(String) -> Option<String> + Send>;

/// Which side of the relay a pump reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Client to backend.
    Client,
    /// Backend to client.
    Backend,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Self::Client => "client_to_backend",
            Self::Backend => "backend_to_client",
        }
    }
}

/// Per-direction filters. Only text frames pass through a filter.
#[derive(Default)]
pub struct Filters {
    /// Applied to frames read from the client.
    pub to_backend: Option<TextFilter>,
    /// Applied to frames read from the backend.
    pub to_client: Option<TextFilter>,
}

/// How a relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The side whose pump stopped first, if any did.
    pub first: Option<Side>,
    /// The first pump error seen.
    pub error: Option<RelayError>,
}

type PumpEnd = (Side, Result<(), RelayError>);

/// Relay frames between `client` and `backend` until either side stops or
/// `cancel` fires.
pub async fn relay(
    client: WebSocket,
    backend: BackendSocket,
    filters: Filters,
    cancel: &CancellationToken,
) -> RelayOutcome {
    let (client_tx, client_rx) = client.split();
    let (backend_tx, backend_rx) = backend.split();
    let (end_tx, mut end_rx) = mpsc::channel::<PumpEnd>(2);
    let pumps = cancel.child_token();

    let up = tokio::spawn(pump_to_backend(
        client_rx,
        backend_tx,
        filters.to_backend,
        pumps.clone(),
        end_tx.clone(),
    ));
    let down = tokio::spawn(pump_to_client(
        backend_rx,
        client_tx,
        filters.to_client,
        pumps.clone(),
        end_tx,
    ));

    let mut outcome = RelayOutcome {
        first: None,
        error: None,
    };
    let mut ended = 0;
    tokio::select! {
        end = end_rx.recv() => {
            if let Some((side, result)) = end {
                ended += 1;
                outcome.first = Some(side);
                outcome.error = result.err();
            }
        }
        () = cancel.cancelled() => {}
    }

    pumps.cancel();
    while ended < 2 {
        let Some((_, result)) = end_rx.recv().await else {
            break;
        };
        ended += 1;
        if outcome.error.is_none() {
            outcome.error = result.err();
        }
    }
    let _ = up.await;
    let _ = down.await;
    outcome
}

async fn pump_to_backend(
    mut from: SplitStream<WebSocket>,
    mut to: SplitSink<BackendSocket, BackendMessage>,
    mut filter: Option<TextFilter>,
    cancel: CancellationToken,
    end: mpsc::Sender<PumpEnd>,
) {
    let result = copy_to_backend(&mut from, &mut to, &mut filter, &cancel).await;
    let _ = to.close().await;
    debug!(ok = result.is_ok(), "client pump stopped");
    let _ = end.send((Side::Client, result)).await;
}

async fn copy_to_backend(
    from: &mut SplitStream<WebSocket>,
    to: &mut SplitSink<BackendSocket, BackendMessage>,
    filter: &mut Option<TextFilter>,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            frame = from.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame?;
        let closing = matches!(frame, Message::Close(_));
        if let Some(out) = to_backend(frame, filter) {
            counter!(PROXY_FRAMES_TOTAL, "direction" => Side::Client.label()).increment(1);
            to.send(out).await?;
        }
        if closing {
            return Ok(());
        }
    }
}

async fn pump_to_client(
    mut from: SplitStream<BackendSocket>,
    mut to: SplitSink<WebSocket, Message>,
    mut filter: Option<TextFilter>,
    cancel: CancellationToken,
    end: mpsc::Sender<PumpEnd>,
) {
    let result = copy_to_client(&mut from, &mut to, &mut filter, &cancel).await;
    let _ = to.close().await;
    debug!(ok = result.is_ok(), "backend pump stopped");
    let _ = end.send((Side::Backend, result)).await;
}

async fn copy_to_client(
    from: &mut SplitStream<BackendSocket>,
    to: &mut SplitSink<WebSocket, Message>,
    filter: &mut Option<TextFilter>,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            frame = from.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame?;
        let closing = matches!(frame, BackendMessage::Close(_));
        if let Some(out) = to_client(frame, filter) {
            counter!(PROXY_FRAMES_TOTAL, "direction" => Side::Backend.label()).increment(1);
            to.send(out).await?;
        }
        if closing {
            return Ok(());
        }
    }
}

fn filtered(filter: &mut Option<TextFilter>, text: String) -> Option<String> {
    match filter {
        Some(f) => f(text),
        None => Some(text),
    }
}

/// Convert a client frame for the backend. Ping and pong are answered
/// per hop and never forwarded.
pub(crate) fn to_backend(
    frame: Message,
    filter: &mut Option<TextFilter>,
) -> Option<BackendMessage> {
    match frame {
        Message::Text(text) => {
            filtered(filter, text.to_string()).map(|t| BackendMessage::Text(t.into()))
        }
        Message::Binary(data) => Some(BackendMessage::Binary(data)),
        Message::Close(frame) => Some(BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.to_string().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Convert a backend frame for the client.
pub(crate) fn to_client(frame: BackendMessage, filter: &mut Option<TextFilter>) -> Option<Message> {
    match frame {
        BackendMessage::Text(text) => {
            filtered(filter, text.to_string()).map(|t| Message::Text(t.into()))
        }
        BackendMessage::Binary(data) => Some(Message::Binary(data)),
        BackendMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.to_string().into(),
        }))),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => None,
    }
}
