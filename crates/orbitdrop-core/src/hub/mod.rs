//! Signaling hub: the WebSocket endpoint in front of the [`Registry`].
//!
//! Clients connect to `/ws`, announce themselves with a `hello`, and from
//! then on the hub routes their relayable envelopes by device id and keeps
//! everyone's presence list current. A connection that never says `hello`
//! can send nothing else; malformed messages are dropped without ceremony.

pub mod registry;

pub use registry::{ConnHandle, HubOutbound, Registry, CLOSE_REPLACED};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::signal::Envelope;

/// Shared state of one hub process.
#[derive(Default)]
pub struct Hub {
    registry: Registry,
    next_conn_id: AtomicU64,
}

impl Hub {
    /// Create a hub with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The hub's session registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Build the hub's router.
#[must_use]
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serve the hub on an already-bound listener.
pub async fn serve(hub: Arc<Hub>, listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "signaling hub listening");
    axum::serve(listener, router(hub))
        .await
        .map_err(crate::error::Error::Io)?;
    Ok(())
}

/// Bind `addr` and serve the hub on it.
pub async fn serve_addr(hub: Arc<Hub>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(hub, listener).await
}

async fn ws_upgrade(State(hub): State<Arc<Hub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<Hub>, socket: WebSocket) {
    let conn_id = hub.next_conn_id();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<HubOutbound>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // forwarder: registry pushes land on the queue, one task drains it onto
    // the socket so registry mutations never block on a slow client
    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                HubOutbound::Message(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                HubOutbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let conn = ConnHandle::new(conn_id, outbound_tx);
    let mut sender_id: Option<String> = None;

    while let Some(Ok(message)) = ws_rx.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(text.as_str()) else {
            tracing::trace!(conn = conn_id, "malformed envelope dropped");
            continue;
        };

        match envelope {
            Envelope::Hello { device } => {
                if device.is_valid() {
                    sender_id = Some(device.id.clone());
                    hub.registry.hello(device, conn.clone()).await;
                }
            }
            Envelope::Rename { name } => {
                if let Some(id) = &sender_id {
                    hub.registry.rename(id, &name).await;
                }
            }
            // hub-emitted only; a client sending it is ignored
            Envelope::PresenceList { .. } => {}
            relayable => {
                if let Some(id) = &sender_id {
                    hub.registry.relay(id, relayable).await;
                }
            }
        }
    }

    hub.registry.disconnect(conn_id).await;
    writer.abort();
}
