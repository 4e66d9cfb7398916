//! Direct-channel abstraction.
//!
//! The transfer engine only ever sees `send(bytes)` / inbound-data events; the
//! negotiator only ever sees descriptions, candidates, and state changes. Both
//! sit on the traits here, so the actual transport (a WebRTC data channel, a
//! raw socket, or the in-memory pair used in tests and single-process
//! deployments) is supplied by the embedding application.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Data traveling over a direct channel: control messages as text, chunk
/// frames as binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    /// JSON control message
    Text(String),
    /// Binary chunk frame
    Binary(Bytes),
}

/// Connection state reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel is open; sending is possible
    Connected,
    /// Channel dropped; may be re-established later
    Disconnected,
    /// Negotiation or transport failed
    Failed,
}

/// Role a channel takes during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Creates the channel and produces the offer
    Offer,
    /// Consumes a remote offer and produces the answer
    Answer,
}

/// Events a channel surfaces to its owner, tagged with the peer device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A locally discovered network candidate to relay to the peer
    Candidate(String),
    /// Connection state change
    State(ChannelState),
    /// Inbound data from the peer
    Data(ChannelData),
}

/// Stream of `(peer_id, event)` pairs from every channel a client owns.
pub type ChannelEvents = mpsc::UnboundedSender<(String, ChannelEvent)>;

/// Cheap handle for pushing data to one peer's channel.
pub trait ChannelSender: Send + Sync {
    /// Enqueue data toward the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel is not open.
    fn send(&self, data: ChannelData) -> Result<()>;
}

/// One negotiable channel toward one peer.
pub trait ChannelDriver: Send {
    /// The local session description (offer or answer) to relay to the peer.
    fn local_description(&self) -> &str;

    /// Apply the remote session description (the answer, on the offering
    /// side).
    fn apply_remote_description(&mut self, sdp: &str) -> Result<()>;

    /// Apply one remote network candidate.
    fn apply_remote_candidate(&mut self, candidate: &str) -> Result<()>;

    /// A sender usable independently of this driver handle.
    fn sender(&self) -> Arc<dyn ChannelSender>;

    /// Tear the channel down. Idempotent.
    fn close(&mut self);
}

/// Creates channels on demand, in either role.
pub trait ChannelFactory: Send + Sync {
    /// Open a channel toward `peer_id`.
    ///
    /// In the [`ChannelRole::Answer`] role, `remote_offer` carries the peer's
    /// offer description. Channel events are delivered on `events`, tagged
    /// with `peer_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel can be created, which the caller
    /// surfaces as pairing `paused` (and falls back to the relay path when
    /// enabled).
    fn open(
        &self,
        peer_id: &str,
        role: ChannelRole,
        remote_offer: Option<&str>,
        events: ChannelEvents,
    ) -> Result<Box<dyn ChannelDriver>>;
}

/// Routes engine output to whichever peer channels are currently open.
///
/// Lookup misses and send failures are swallowed: acks are the only delivery
/// truth, and a frame pushed at a closed channel is indistinguishable from a
/// frame the network dropped.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<dyn ChannelSender>>>>,
}

impl SinkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sender for a peer's connected channel.
    pub fn insert(&self, peer_id: &str, sender: Arc<dyn ChannelSender>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(peer_id.to_string(), sender);
        }
    }

    /// Drop the sender for a peer.
    pub fn remove(&self, peer_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(peer_id);
        }
    }
}

/// Best-effort fan-out used by the transfer engine.
pub trait PeerSink: Send + Sync {
    /// Push data toward a peer, dropping it if no channel is open.
    fn send(&self, peer_id: &str, data: ChannelData);
}

impl PeerSink for SinkRegistry {
    fn send(&self, peer_id: &str, data: ChannelData) {
        let sender = self
            .inner
            .lock()
            .ok()
            .and_then(|inner| inner.get(peer_id).cloned());
        if let Some(sender) = sender {
            if let Err(err) = sender.send(data) {
                tracing::trace!(peer = peer_id, error = %err, "dropped data for closed channel");
            }
        }
    }
}

/// Factory for deployments without a direct-channel transport.
///
/// Every open attempt fails, so pairings go `paused` immediately and all
/// traffic takes the relay fallback (when enabled). The headless CLI uses
/// this.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannelFactory;

impl ChannelFactory for NullChannelFactory {
    fn open(
        &self,
        peer_id: &str,
        _role: ChannelRole,
        _remote_offer: Option<&str>,
        _events: ChannelEvents,
    ) -> Result<Box<dyn ChannelDriver>> {
        Err(Error::NegotiationFailed {
            peer: peer_id.to_string(),
            reason: "no direct-channel transport configured".to_string(),
        })
    }
}

pub mod memory {
    //! In-memory channel transport.
    //!
    //! Connects two clients living in the same process through a shared
    //! [`MemoryNetwork`]. Offers are opaque tokens registered on the network;
    //! applying the matching answer wires both ends together. Used by the
    //! integration tests and available to single-process embeddings.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;

    use super::{
        ChannelData, ChannelDriver, ChannelEvent, ChannelEvents, ChannelFactory, ChannelRole,
        ChannelSender, ChannelState,
    };
    use crate::error::{Error, Result};

    /// One side of an established link.
    struct Endpoint {
        /// The owning client's channel-event stream
        events: ChannelEvents,
        /// Device id this side is known by on the other end
        device_id: String,
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Side {
        Offerer,
        Answerer,
    }

    struct LinkInner {
        offerer: Option<Endpoint>,
        answerer: Option<Endpoint>,
        connected: bool,
        closed: bool,
    }

    struct LinkCell {
        inner: Mutex<LinkInner>,
    }

    impl LinkCell {
        fn new(offerer: Endpoint) -> Self {
            Self {
                inner: Mutex::new(LinkInner {
                    offerer: Some(offerer),
                    answerer: None,
                    connected: false,
                    closed: false,
                }),
            }
        }

        /// Mark connected and notify both ends, each tagged with the other's
        /// device id.
        fn establish(&self) {
            let Ok(mut inner) = self.inner.lock() else { return };
            if inner.connected || inner.closed {
                return;
            }
            let (Some(offerer), Some(answerer)) = (&inner.offerer, &inner.answerer) else {
                return;
            };
            let _ = offerer.events.send((
                answerer.device_id.clone(),
                ChannelEvent::State(ChannelState::Connected),
            ));
            let _ = answerer.events.send((
                offerer.device_id.clone(),
                ChannelEvent::State(ChannelState::Connected),
            ));
            inner.connected = true;
        }

        fn deliver(&self, from: Side, data: ChannelData) -> Result<()> {
            let Ok(inner) = self.inner.lock() else {
                return Err(Error::Internal("link lock poisoned".to_string()));
            };
            if !inner.connected || inner.closed {
                return Err(Error::ChannelClosed("memory link".to_string()));
            }
            let (local, remote) = match from {
                Side::Offerer => (&inner.offerer, &inner.answerer),
                Side::Answerer => (&inner.answerer, &inner.offerer),
            };
            let (Some(local), Some(remote)) = (local, remote) else {
                return Err(Error::ChannelClosed("memory link".to_string()));
            };
            remote
                .events
                .send((local.device_id.clone(), ChannelEvent::Data(data)))
                .map_err(|_| Error::ChannelClosed(remote.device_id.clone()))
        }

        /// Close from one side; the other side observes a disconnect.
        fn close(&self, from: Side) {
            let Ok(mut inner) = self.inner.lock() else { return };
            if inner.closed {
                return;
            }
            inner.closed = true;
            if !inner.connected {
                return;
            }
            let (local, remote) = match from {
                Side::Offerer => (&inner.offerer, &inner.answerer),
                Side::Answerer => (&inner.answerer, &inner.offerer),
            };
            if let (Some(local), Some(remote)) = (local, remote) {
                let _ = remote.events.send((
                    local.device_id.clone(),
                    ChannelEvent::State(ChannelState::Disconnected),
                ));
            }
        }
    }

    /// Shared fabric connecting the memory channels of one process.
    #[derive(Default)]
    pub struct MemoryNetwork {
        pending: Mutex<HashMap<String, Arc<LinkCell>>>,
    }

    impl MemoryNetwork {
        /// Create an empty network.
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// A channel factory for the device `local_id` on this network.
        #[must_use]
        pub fn factory(self: &Arc<Self>, local_id: &str) -> MemoryChannelFactory {
            MemoryChannelFactory {
                network: Arc::clone(self),
                local_id: local_id.to_string(),
            }
        }
    }

    /// [`ChannelFactory`] implementation over a [`MemoryNetwork`].
    pub struct MemoryChannelFactory {
        network: Arc<MemoryNetwork>,
        local_id: String,
    }

    impl ChannelFactory for MemoryChannelFactory {
        fn open(
            &self,
            peer_id: &str,
            role: ChannelRole,
            remote_offer: Option<&str>,
            events: ChannelEvents,
        ) -> Result<Box<dyn ChannelDriver>> {
            let endpoint = Endpoint {
                events: events.clone(),
                device_id: self.local_id.clone(),
            };

            let (cell, side, local_description) = match role {
                ChannelRole::Offer => {
                    let token = format!("mem-offer-{}", Uuid::new_v4());
                    let cell = Arc::new(LinkCell::new(endpoint));
                    self.network
                        .pending
                        .lock()
                        .map_err(|_| Error::Internal("network lock poisoned".to_string()))?
                        .insert(token.clone(), Arc::clone(&cell));
                    (cell, Side::Offerer, token)
                }
                ChannelRole::Answer => {
                    let token = remote_offer.ok_or_else(|| Error::NegotiationFailed {
                        peer: peer_id.to_string(),
                        reason: "answer role requires a remote offer".to_string(),
                    })?;
                    let cell = self
                        .network
                        .pending
                        .lock()
                        .map_err(|_| Error::Internal("network lock poisoned".to_string()))?
                        .remove(token)
                        .ok_or_else(|| Error::NegotiationFailed {
                            peer: peer_id.to_string(),
                            reason: format!("unknown offer '{token}'"),
                        })?;
                    if let Ok(mut inner) = cell.inner.lock() {
                        inner.answerer = Some(endpoint);
                    }
                    (Arc::clone(&cell), Side::Answerer, format!("{token}#answer"))
                }
            };

            // One synthetic local candidate, so the one-candidate-per-message
            // relay path is exercised end to end.
            let _ = events.send((
                peer_id.to_string(),
                ChannelEvent::Candidate(format!("memory:{local_description}")),
            ));

            Ok(Box::new(MemoryChannel {
                side,
                cell,
                local_description,
            }))
        }
    }

    struct MemoryChannel {
        side: Side,
        cell: Arc<LinkCell>,
        local_description: String,
    }

    impl ChannelDriver for MemoryChannel {
        fn local_description(&self) -> &str {
            &self.local_description
        }

        fn apply_remote_description(&mut self, sdp: &str) -> Result<()> {
            // The offering side applies the answer; the token prefix must be
            // the offer it produced.
            if self.side == Side::Offerer && !sdp.starts_with(&self.local_description) {
                return Err(Error::Protocol(format!("answer '{sdp}' does not match offer")));
            }
            self.cell.establish();
            Ok(())
        }

        fn apply_remote_candidate(&mut self, _candidate: &str) -> Result<()> {
            // Memory links need no candidates; accept and ignore.
            Ok(())
        }

        fn sender(&self) -> Arc<dyn ChannelSender> {
            Arc::new(MemorySender {
                side: self.side,
                cell: Arc::clone(&self.cell),
            })
        }

        fn close(&mut self) {
            self.cell.close(self.side);
        }
    }

    struct MemorySender {
        side: Side,
        cell: Arc<LinkCell>,
    }

    impl ChannelSender for MemorySender {
        fn send(&self, data: ChannelData) -> Result<()> {
            self.cell.deliver(self.side, data)
        }
    }

}
