//! WebSocket transport for remote peers.
//!
//! Each accepted connection becomes a [`WsPeer`]. The `Origin` header of the
//! upgrade request is the origin of everything that peer sends.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
};
use framelink_core::{ANY_ORIGIN, Channel, ChannelError, Inbound, InboundStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;

/// Origin used when the upgrade request carries none.
pub const OPAQUE_ORIGIN: &str = "null";

const INBOX_CAPACITY: usize = 1024;

/// Frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Payload(Value),
    Close,
}

/// [`Channel`] backed by one WebSocket connection.
#[derive(Clone)]
pub struct WsPeer {
    origin: String,
    outbound: mpsc::UnboundedSender<Outgoing>,
    inbound: Arc<Mutex<Option<broadcast::Sender<Inbound>>>>,
}

impl WsPeer {
    /// Create a peer and the receiver its socket writer drains.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOX_CAPACITY);
        let peer = Self {
            origin: origin.into(),
            outbound,
            inbound: Arc::new(Mutex::new(Some(inbound))),
        };
        (peer, rx)
    }

    /// Origin reported by the remote side.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Hand a payload read from the socket to subscribers.
    pub fn deliver(&self, payload: Value) {
        let guard = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(Inbound::new(self.origin.clone(), payload));
        }
    }

    /// End all subscriptions. Called once the socket is gone.
    pub fn disconnect(&self) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Channel for WsPeer {
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), ChannelError> {
        if target_origin != ANY_ORIGIN && target_origin != self.origin {
            tracing::debug!(target_origin, actual = %self.origin, "Target origin mismatch, dropping payload");
            return Ok(());
        }
        self.outbound
            .send(Outgoing::Payload(payload))
            .map_err(|_| ChannelError::Closed)
    }

    fn subscribe(&self) -> InboundStream {
        let receiver = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe);

        match receiver {
            Some(rx) => BroadcastStream::new(rx)
                .filter_map(|res| async move { res.ok() })
                .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close);
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Receives a peer for every accepted connection.
    pub peers: mpsc::UnboundedSender<WsPeer>,
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(OPAQUE_ORIGIN)
        .to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, origin, state))
}

async fn handle_socket(socket: WebSocket, origin: String, state: WsState) {
    let (peer, mut outbound) = WsPeer::new(origin);
    if state.peers.send(peer.clone()).is_err() {
        tracing::warn!("No consumer for new peer, dropping connection");
        return;
    }
    tracing::debug!(origin = %peer.origin(), "Peer connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let payload = match frame {
                Outgoing::Payload(payload) => payload,
                Outgoing::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            let json = match serde_json::to_string(&payload) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize payload: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(payload) => peer.deliver(payload),
            Err(e) => tracing::warn!(origin = %peer.origin(), "Invalid payload: {e}"),
        }
    }

    tracing::debug!(origin = %peer.origin(), "Peer disconnected");
    peer.disconnect();
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let (peers_tx, mut peers_rx) = tokio::sync::mpsc::unbounded_channel();
/// let app = Router::new().merge(create_ws_router(peers_tx));
/// ```
#[must_use]
pub fn create_ws_router(peers: mpsc::UnboundedSender<WsPeer>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState { peers })
}
