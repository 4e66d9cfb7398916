//! Client WebSocket link to the signaling hub.
//!
//! The link runs as one background task: it dials the hub, announces the
//! device with a `hello`, pumps envelopes in both directions, and on any
//! drop reconnects with a linear backoff capped at five seconds. Sends are
//! fire-and-forget; anything queued while offline is flushed once the next
//! connection is up.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::device::DeviceInfo;
use crate::signal::{Envelope, SignalOutbox, SignalStatus};

/// Events surfaced by the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Link status change
    Status(SignalStatus),
    /// A decoded envelope from the hub
    Message(Envelope),
}

/// Handle to the background link task.
#[derive(Clone)]
pub struct SignalingLink {
    outgoing: mpsc::UnboundedSender<Envelope>,
}

impl SignalingLink {
    /// Connect to the hub at `url`, registering as `device`. Events are
    /// delivered on `events`; the task ends when every handle and the event
    /// receiver are gone.
    #[must_use]
    pub fn connect(
        url: String,
        device: DeviceInfo,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(url, device, outgoing_rx, events));
        Self {
            outgoing: outgoing_tx,
        }
    }

    /// Enqueue an envelope toward the hub. Fire-and-forget.
    pub fn send(&self, envelope: Envelope) {
        let _ = self.outgoing.send(envelope);
    }
}

impl SignalOutbox for SignalingLink {
    fn send(&self, envelope: Envelope) {
        Self::send(self, envelope);
    }
}

async fn run_link(
    url: String,
    device: DeviceInfo,
    mut outgoing: mpsc::UnboundedReceiver<Envelope>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut retry: u64 = 0;

    loop {
        if events.send(LinkEvent::Status(SignalStatus::Connecting)).is_err() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                retry = 0;
                let _ = events.send(LinkEvent::Status(SignalStatus::Online));
                tracing::debug!(%url, "hub link established");

                let (mut ws_tx, mut ws_rx) = socket.split();
                let hello = Envelope::Hello {
                    device: device.clone(),
                };
                let announced = match serde_json::to_string(&hello) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
                    Err(_) => false,
                };

                if announced {
                    loop {
                        tokio::select! {
                            envelope = outgoing.recv() => {
                                // all link handles dropped: shut the task down
                                let Some(envelope) = envelope else { return };
                                let Ok(json) = serde_json::to_string(&envelope) else { continue };
                                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            inbound = ws_rx.next() => {
                                match inbound {
                                    Some(Ok(Message::Text(text))) => {
                                        let Ok(envelope) = serde_json::from_str::<Envelope>(text.as_str()) else {
                                            tracing::trace!("malformed hub message dropped");
                                            continue;
                                        };
                                        if events.send(LinkEvent::Message(envelope)).is_err() {
                                            return;
                                        }
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        tracing::debug!(?frame, "hub closed the link");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(err)) => {
                                        tracing::debug!(error = %err, "hub link error");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => {
                tracing::debug!(%url, error = %err, "hub connection failed");
            }
        }

        if events.send(LinkEvent::Status(SignalStatus::Offline)).is_err() {
            return;
        }

        // linear backoff: 1s, 2s, 3s, ... capped at 5s
        let delay = Duration::from_millis((1000 + retry * 1000).min(5000));
        retry = retry.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}
