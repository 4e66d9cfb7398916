//! Peer-session negotiation.
//!
//! One [`Negotiator`] tracks a state machine per peer id:
//!
//! ```text
//! idle → requesting → connecting → connected
//!                 ↘ rejected          ↕
//!                            paused ──┘  (re-enterable on a fresh attempt)
//! ```
//!
//! `requesting`/`rejected` are driven by the share handshake (the owner calls
//! [`Negotiator::set_status`]); `connecting`/`connected`/`paused` follow the
//! underlying channel. Descriptions and candidates travel through the
//! signaling outbox; the negotiator itself never blocks on the peer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::{
    ChannelData, ChannelDriver, ChannelEvent, ChannelEvents, ChannelFactory, ChannelRole,
    ChannelSender, ChannelState,
};
use crate::error::Result;
use crate::signal::{CandidatePayload, DescriptionPayload, Envelope, SignalOutbox};

/// Pairing state of one peer, as shown to the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingStatus {
    /// No pairing activity
    #[default]
    Idle,
    /// Share request sent, waiting for the peer's decision
    Requesting,
    /// Channel negotiation in progress
    Connecting,
    /// Direct channel is open
    Connected,
    /// Peer declined the share request
    Rejected,
    /// Channel dropped; transfer state is preserved for resume
    Paused,
}

/// What the owner should do with a channel event the negotiator consumed.
#[derive(Debug)]
pub enum ChannelOutcome {
    /// Nothing further; the negotiator handled it
    Handled,
    /// The peer's pairing status changed
    Status(PairingStatus),
    /// Inbound data for the transfer engine
    Inbound(ChannelData),
}

/// Per-peer session negotiation over a [`ChannelFactory`].
pub struct Negotiator {
    factory: Arc<dyn ChannelFactory>,
    outbox: Arc<dyn SignalOutbox>,
    events: ChannelEvents,
    channels: HashMap<String, Box<dyn ChannelDriver>>,
    statuses: HashMap<String, PairingStatus>,
    active_peer: Option<String>,
}

impl Negotiator {
    /// Create a negotiator. Channel events from every driver it opens are
    /// delivered on `events` and must be fed back via
    /// [`Negotiator::handle_channel_event`].
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        outbox: Arc<dyn SignalOutbox>,
        events: ChannelEvents,
    ) -> Self {
        Self {
            factory,
            outbox,
            events,
            channels: HashMap::new(),
            statuses: HashMap::new(),
            active_peer: None,
        }
    }

    /// Current pairing status of a peer.
    #[must_use]
    pub fn status(&self, peer_id: &str) -> PairingStatus {
        self.statuses.get(peer_id).copied().unwrap_or_default()
    }

    /// The peer whose channel most recently connected, if any.
    #[must_use]
    pub fn active_peer(&self) -> Option<&str> {
        self.active_peer.as_deref()
    }

    /// Set a peer's pairing status. Returns whether it changed.
    pub fn set_status(&mut self, peer_id: &str, status: PairingStatus) -> bool {
        let prior = self.statuses.insert(peer_id.to_string(), status);
        prior != Some(status)
    }

    /// Start a negotiation in the offering role.
    ///
    /// Any prior channel for the same peer is torn down first; there is at
    /// most one active negotiation per peer id.
    pub fn initiate(&mut self, peer_id: &str) -> Result<()> {
        self.teardown(peer_id);

        let driver = self
            .factory
            .open(peer_id, ChannelRole::Offer, None, self.events.clone())?;
        self.outbox.send(Envelope::Offer(DescriptionPayload {
            to: peer_id.to_string(),
            from: None,
            sdp: driver.local_description().to_string(),
        }));
        self.channels.insert(peer_id.to_string(), driver);
        self.set_status(peer_id, PairingStatus::Connecting);
        tracing::debug!(peer = peer_id, "negotiation initiated");
        Ok(())
    }

    /// Answer a remote offer.
    pub fn respond(&mut self, peer_id: &str, remote_offer: &str) -> Result<()> {
        self.teardown(peer_id);

        let driver = self.factory.open(
            peer_id,
            ChannelRole::Answer,
            Some(remote_offer),
            self.events.clone(),
        )?;
        self.outbox.send(Envelope::Answer(DescriptionPayload {
            to: peer_id.to_string(),
            from: None,
            sdp: driver.local_description().to_string(),
        }));
        self.channels.insert(peer_id.to_string(), driver);
        self.set_status(peer_id, PairingStatus::Connecting);
        tracing::debug!(peer = peer_id, "answering remote offer");
        Ok(())
    }

    /// Apply the peer's answer to our offer. No state transition by itself.
    pub fn apply_answer(&mut self, peer_id: &str, sdp: &str) {
        let Some(driver) = self.channels.get_mut(peer_id) else {
            tracing::debug!(peer = peer_id, "answer for unknown negotiation, dropped");
            return;
        };
        if let Err(err) = driver.apply_remote_description(sdp) {
            tracing::debug!(peer = peer_id, error = %err, "failed to apply remote answer");
        }
    }

    /// Apply one remote candidate. No state transition by itself.
    pub fn apply_candidate(&mut self, peer_id: &str, candidate: &str) {
        let Some(driver) = self.channels.get_mut(peer_id) else {
            tracing::debug!(peer = peer_id, "candidate for unknown negotiation, dropped");
            return;
        };
        if let Err(err) = driver.apply_remote_candidate(candidate) {
            tracing::debug!(peer = peer_id, error = %err, "failed to apply remote candidate");
        }
    }

    /// Consume one channel event.
    pub fn handle_channel_event(&mut self, peer_id: &str, event: ChannelEvent) -> ChannelOutcome {
        match event {
            ChannelEvent::Candidate(candidate) => {
                // Relay immediately, one candidate per message.
                self.outbox.send(Envelope::IceCandidate(CandidatePayload {
                    to: peer_id.to_string(),
                    from: None,
                    candidate,
                }));
                ChannelOutcome::Handled
            }
            ChannelEvent::State(ChannelState::Connected) => {
                self.set_status(peer_id, PairingStatus::Connected);
                self.active_peer = Some(peer_id.to_string());
                ChannelOutcome::Status(PairingStatus::Connected)
            }
            ChannelEvent::State(ChannelState::Disconnected | ChannelState::Failed) => {
                // A deliberate teardown already removed the channel; a late
                // disconnect event for it must not flip the status again.
                if self.channels.remove(peer_id).is_none() {
                    return ChannelOutcome::Handled;
                }
                self.set_status(peer_id, PairingStatus::Paused);
                if self.active_peer.as_deref() == Some(peer_id) {
                    self.active_peer = None;
                }
                ChannelOutcome::Status(PairingStatus::Paused)
            }
            ChannelEvent::Data(data) => ChannelOutcome::Inbound(data),
        }
    }

    /// Sender handle for a peer's channel, if one exists.
    #[must_use]
    pub fn sender_for(&self, peer_id: &str) -> Option<Arc<dyn ChannelSender>> {
        self.channels.get(peer_id).map(|driver| driver.sender())
    }

    /// Tear down the active peer session. Returns the peer whose channel was
    /// closed, if any. Other peers' state is untouched.
    pub fn disconnect_peer(&mut self) -> Option<String> {
        let peer_id = self.active_peer.take()?;
        self.teardown(&peer_id);
        self.set_status(&peer_id, PairingStatus::Idle);
        Some(peer_id)
    }

    /// Close and drop the channel for a peer, if any.
    fn teardown(&mut self, peer_id: &str) {
        if let Some(mut driver) = self.channels.remove(peer_id) {
            driver.close();
        }
    }
}
