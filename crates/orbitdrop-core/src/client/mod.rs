//! Client orchestrator.
//!
//! [`Client`] composes the signaling link, the session negotiator, the chunk
//! transfer engine, and the relay fallback into one event loop with a
//! command/event surface for the surrounding application. Everything the
//! loop owns is mutated from that single task; cross-component traffic is
//! message passing only.
//!
//! A queued send waits in a pending queue keyed by peer id and drains exactly
//! when that peer's negotiation reaches `connected`. If the negotiation
//! collapses instead (`paused`), the pending sends take the relay fallback
//! when it is enabled, or surface as failed transfers when it is not; that
//! is the only path that marks a transfer definitively failed.

pub mod link;

pub use link::{LinkEvent, SignalingLink};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::{ChannelData, ChannelEvent, ChannelFactory, SinkRegistry};
use crate::config::Config;
use crate::device::{Device, DeviceInfo, DeviceType};
use crate::relay::{RelayInbox, RelaySender};
use crate::session::{ChannelOutcome, Negotiator, PairingStatus};
use crate::signal::{Envelope, Routed, SharePayload, SignalOutbox, SignalStatus, TextPayload};
use crate::transfer::{
    TransferContent, TransferDirection, TransferEngine, TransferEvent, TransferItem, TransferKind,
    TransferStatus,
};

/// An incoming share request, pending the local user's decision.
///
/// At most one per sender: a duplicate request from the same sender replaces
/// the stored payload instead of queueing a second entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareRequest {
    /// Requesting device id
    pub from: String,
    /// Requesting device display name
    pub name: String,
    /// Requesting device form factor
    pub device_type: DeviceType,
    /// What the sender wants to share
    pub kind: TransferKind,
    /// File name, for file/image shares
    pub file_name: Option<String>,
    /// File size in bytes, for file/image shares
    pub file_size: Option<u64>,
    /// MIME type, for file/image shares
    pub mime_type: Option<String>,
}

impl ShareRequest {
    fn from_payload(payload: &SharePayload) -> Option<Self> {
        Some(Self {
            from: payload.from.clone()?,
            name: payload.name.clone(),
            device_type: payload.device_type,
            kind: payload.kind,
            file_name: payload.file_name.clone(),
            file_size: payload.file_size,
            mime_type: payload.mime_type.clone(),
        })
    }
}

/// Events the client surfaces to the surrounding application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Create/patch event against the transfer list
    Transfer(TransferEvent),
    /// Presence list, local device already filtered out
    Presence(Vec<Device>),
    /// Pairing status of one peer changed
    Pairing {
        /// Peer device id
        peer_id: String,
        /// New status
        status: PairingStatus,
    },
    /// A device asks to share with us
    ShareRequested(ShareRequest),
    /// Plain text relayed through the hub
    TextReceived {
        /// Sending device id
        from: String,
        /// Message body
        text: String,
    },
    /// Signaling link status changed
    Signal(SignalStatus),
}

enum PendingSend {
    Text(String),
    File { path: PathBuf, kind: TransferKind },
}

enum Command {
    QueueText {
        device_id: String,
        text: String,
    },
    QueueFile {
        device_id: String,
        path: PathBuf,
        kind: TransferKind,
    },
    AcceptShare(ShareRequest),
    RejectShare(ShareRequest),
    DisconnectPeer,
    Rename(String),
    SendTextMessage {
        device_id: String,
        text: String,
    },
    RelayText {
        device_id: String,
        text: String,
    },
    RelayFile {
        device_id: String,
        path: PathBuf,
        kind: TransferKind,
    },
}

/// Handle to a running client.
///
/// All methods enqueue a command for the client's event loop and return
/// immediately.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Start a client for `config`, negotiating direct channels through
    /// `factory`. Must be called within a Tokio runtime.
    ///
    /// Returns the handle and the stream of [`ClientEvent`]s. The event loop
    /// ends when the handle is dropped.
    #[must_use]
    pub fn start(
        config: &Config,
        factory: Arc<dyn ChannelFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let device = config.device_info();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();

        let link = SignalingLink::connect(config.network.hub_url.clone(), device.clone(), link_tx);
        let outbox: Arc<dyn SignalOutbox> = Arc::new(link.clone());

        let sinks = SinkRegistry::new();
        let (engine, tick_rx) = TransferEngine::new(
            config.transfer.settings(),
            device.name.clone(),
            Arc::new(sinks.clone()),
            transfer_tx.clone(),
        );

        let negotiator = Negotiator::new(factory, Arc::clone(&outbox), channel_tx);
        let relay_sender = RelaySender::new(
            Arc::clone(&outbox),
            transfer_tx.clone(),
            device.name.clone(),
            config.transfer.chunk_size,
        );
        let relay_inbox = RelayInbox::new(transfer_tx);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let actor = ClientActor {
            device,
            link,
            events: events_tx,
            negotiator,
            engine,
            sinks,
            relay_sender,
            relay_inbox,
            pending: HashMap::new(),
            share_requests: HashMap::new(),
            relay_fallback: config.transfer.relay_fallback,
        };
        tokio::spawn(actor.run(commands_rx, link_rx, channel_rx, tick_rx, transfer_rx));

        (
            Self {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    /// Queue a text send to a device; asks the device to pair first.
    pub fn queue_text(&self, device: &Device, text: impl Into<String>) {
        let _ = self.commands.send(Command::QueueText {
            device_id: device.id.clone(),
            text: text.into(),
        });
    }

    /// Queue a file send to a device; asks the device to pair first.
    pub fn queue_file(&self, device: &Device, path: impl Into<PathBuf>, kind: TransferKind) {
        let _ = self.commands.send(Command::QueueFile {
            device_id: device.id.clone(),
            path: path.into(),
            kind,
        });
    }

    /// Accept a pending share request; the requester will start negotiating.
    pub fn accept_share_request(&self, request: &ShareRequest) {
        let _ = self.commands.send(Command::AcceptShare(request.clone()));
    }

    /// Reject a pending share request.
    pub fn reject_share_request(&self, request: &ShareRequest) {
        let _ = self.commands.send(Command::RejectShare(request.clone()));
    }

    /// Tear down the active peer session. Other peers' transfer state is
    /// untouched.
    pub fn disconnect_peer(&self) {
        let _ = self.commands.send(Command::DisconnectPeer);
    }

    /// Change the local display name. Empty names (after trimming) are
    /// ignored, mirroring the hub.
    pub fn rename(&self, name: impl Into<String>) {
        let _ = self.commands.send(Command::Rename(name.into()));
    }

    /// Send a short text through the hub without establishing a session.
    pub fn send_text_message(&self, device: &Device, text: impl Into<String>) {
        let _ = self.commands.send(Command::SendTextMessage {
            device_id: device.id.clone(),
            text: text.into(),
        });
    }

    /// Send a text payload over the relay path directly, skipping
    /// negotiation. Used by headless deployments without a direct-channel
    /// transport.
    pub fn send_text_via_relay(&self, device_id: impl Into<String>, text: impl Into<String>) {
        let _ = self.commands.send(Command::RelayText {
            device_id: device_id.into(),
            text: text.into(),
        });
    }

    /// Send a file payload over the relay path directly, skipping
    /// negotiation.
    pub fn send_file_via_relay(
        &self,
        device_id: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: TransferKind,
    ) {
        let _ = self.commands.send(Command::RelayFile {
            device_id: device_id.into(),
            path: path.into(),
            kind,
        });
    }
}

struct ClientActor {
    device: DeviceInfo,
    link: SignalingLink,
    events: mpsc::UnboundedSender<ClientEvent>,
    negotiator: Negotiator,
    engine: TransferEngine,
    sinks: SinkRegistry,
    relay_sender: RelaySender,
    relay_inbox: RelayInbox,
    pending: HashMap<String, Vec<PendingSend>>,
    share_requests: HashMap<String, ShareRequest>,
    relay_fallback: bool,
}

impl ClientActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut channel_rx: mpsc::UnboundedReceiver<(String, ChannelEvent)>,
        mut tick_rx: mpsc::UnboundedReceiver<String>,
        mut transfer_rx: mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = link_rx.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => break,
                },
                event = channel_rx.recv() => match event {
                    Some((peer_id, event)) => self.handle_channel_event(&peer_id, event).await,
                    None => break,
                },
                file_id = tick_rx.recv() => match file_id {
                    Some(file_id) => self.engine.tick(&file_id).await,
                    None => break,
                },
                event = transfer_rx.recv() => match event {
                    Some(event) => self.emit(ClientEvent::Transfer(event)),
                    None => break,
                },
            }
        }
        tracing::debug!("client event loop ended");
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_pairing(&mut self, peer_id: &str, status: PairingStatus) {
        if self.negotiator.set_status(peer_id, status) {
            self.emit(ClientEvent::Pairing {
                peer_id: peer_id.to_string(),
                status,
            });
        }
    }

    fn share_request_to(&self, to: &str, kind: TransferKind, path: Option<&PendingFileInfo>) {
        self.link.send(Envelope::ShareRequest(SharePayload {
            to: to.to_string(),
            from: None,
            name: self.device.name.clone(),
            device_type: self.device.device_type,
            kind,
            file_name: path.map(|info| info.name.clone()),
            file_size: path.map(|info| info.size),
            mime_type: path.map(|info| info.mime.clone()),
        }));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::QueueText { device_id, text } => {
                self.pending
                    .entry(device_id.clone())
                    .or_default()
                    .push(PendingSend::Text(text));
                self.share_request_to(&device_id, TransferKind::Text, None);
                self.set_pairing(&device_id, PairingStatus::Requesting);
            }
            Command::QueueFile {
                device_id,
                path,
                kind,
            } => match file_info(&path).await {
                Ok(info) => {
                    self.share_request_to(&device_id, kind, Some(&info));
                    self.pending
                        .entry(device_id.clone())
                        .or_default()
                        .push(PendingSend::File { path, kind });
                    self.set_pairing(&device_id, PairingStatus::Requesting);
                }
                Err(err) => {
                    self.emit(ClientEvent::Transfer(TransferEvent::Added(failed_item(
                        &self.device.name,
                        kind,
                        Some(path.as_path()),
                        None,
                        &format!("cannot read file: {err}"),
                    ))));
                }
            },
            Command::AcceptShare(request) => {
                self.share_requests.remove(&request.from);
                self.link.send(Envelope::ShareAccept(Routed {
                    to: request.from.clone(),
                    from: None,
                }));
                self.set_pairing(&request.from, PairingStatus::Connecting);
            }
            Command::RejectShare(request) => {
                self.share_requests.remove(&request.from);
                self.link.send(Envelope::ShareReject(Routed {
                    to: request.from.clone(),
                    from: None,
                }));
                self.set_pairing(&request.from, PairingStatus::Rejected);
            }
            Command::DisconnectPeer => {
                if let Some(peer_id) = self.negotiator.disconnect_peer() {
                    self.sinks.remove(&peer_id);
                    self.engine.teardown_peer(&peer_id);
                    self.emit(ClientEvent::Pairing {
                        peer_id,
                        status: PairingStatus::Idle,
                    });
                }
            }
            Command::Rename(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return;
                }
                self.device.name.clone_from(&name);
                self.link.send(Envelope::Rename { name });
            }
            Command::SendTextMessage { device_id, text } => {
                self.link.send(Envelope::TextMessage(TextPayload {
                    to: device_id,
                    from: None,
                    text,
                }));
            }
            Command::RelayText { device_id, text } => {
                if let Err(err) = self.relay_sender.send_text(&device_id, &text).await {
                    tracing::warn!(to = %device_id, error = %err, "relay text send failed");
                }
            }
            Command::RelayFile {
                device_id,
                path,
                kind,
            } => {
                if let Err(err) = self.relay_sender.send_file(&device_id, &path, kind).await {
                    tracing::warn!(to = %device_id, error = %err, "relay file send failed");
                    self.emit(ClientEvent::Transfer(TransferEvent::Added(failed_item(
                        &self.device.name,
                        kind,
                        Some(path.as_path()),
                        None,
                        &format!("cannot read file: {err}"),
                    ))));
                }
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Status(status) => self.emit(ClientEvent::Signal(status)),
            LinkEvent::Message(envelope) => self.handle_envelope(envelope).await,
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::PresenceList { devices } => {
                let devices = devices
                    .into_iter()
                    .filter(|device| device.id != self.device.id)
                    .collect();
                self.emit(ClientEvent::Presence(devices));
            }
            Envelope::ShareRequest(payload) => {
                let Some(request) = ShareRequest::from_payload(&payload) else {
                    return;
                };
                // coalesce: replace the stored payload, emit only the first
                let seen = self.share_requests.contains_key(&request.from);
                self.share_requests
                    .insert(request.from.clone(), request.clone());
                if !seen {
                    self.emit(ClientEvent::ShareRequested(request));
                }
            }
            Envelope::ShareAccept(routed) => {
                let Some(peer_id) = routed.from else { return };
                self.set_pairing(&peer_id, PairingStatus::Connecting);
                if let Err(err) = self.negotiator.initiate(&peer_id) {
                    tracing::debug!(peer = %peer_id, error = %err, "negotiation could not start");
                    self.peer_unreachable(&peer_id).await;
                }
            }
            Envelope::ShareReject(routed) => {
                let Some(peer_id) = routed.from else { return };
                // receiver declined: queued sends for the peer are dropped
                self.pending.remove(&peer_id);
                self.set_pairing(&peer_id, PairingStatus::Rejected);
            }
            Envelope::Offer(payload) => {
                let Some(peer_id) = payload.from else { return };
                self.set_pairing(&peer_id, PairingStatus::Connecting);
                if let Err(err) = self.negotiator.respond(&peer_id, &payload.sdp) {
                    tracing::debug!(peer = %peer_id, error = %err, "could not answer offer");
                    self.peer_unreachable(&peer_id).await;
                }
            }
            Envelope::Answer(payload) => {
                let Some(peer_id) = payload.from else { return };
                self.negotiator.apply_answer(&peer_id, &payload.sdp);
            }
            Envelope::IceCandidate(payload) => {
                let Some(peer_id) = payload.from else { return };
                self.negotiator.apply_candidate(&peer_id, &payload.candidate);
            }
            Envelope::TextMessage(payload) => {
                let Some(from) = payload.from else { return };
                self.emit(ClientEvent::TextReceived {
                    from,
                    text: payload.text,
                });
            }
            Envelope::RelayFileMeta(payload) => self.relay_inbox.on_meta(&payload),
            Envelope::RelayFileChunk(payload) => self.relay_inbox.on_chunk(&payload),
            Envelope::RelayFileComplete(payload) => self.relay_inbox.on_complete(&payload),
            // hub-consumed or hub-emitted types a client never receives
            Envelope::Hello { .. } | Envelope::Rename { .. } => {}
        }
    }

    async fn handle_channel_event(&mut self, peer_id: &str, event: ChannelEvent) {
        match self.negotiator.handle_channel_event(peer_id, event) {
            ChannelOutcome::Handled => {}
            ChannelOutcome::Status(PairingStatus::Connected) => {
                self.emit(ClientEvent::Pairing {
                    peer_id: peer_id.to_string(),
                    status: PairingStatus::Connected,
                });
                if let Some(sender) = self.negotiator.sender_for(peer_id) {
                    self.sinks.insert(peer_id, sender);
                }
                // interrupted sends re-announce themselves first, then the
                // queue drains
                self.engine.resume_pending(peer_id);
                self.drain_pending(peer_id).await;
            }
            ChannelOutcome::Status(status) => {
                self.emit(ClientEvent::Pairing {
                    peer_id: peer_id.to_string(),
                    status,
                });
                if status == PairingStatus::Paused {
                    self.sinks.remove(peer_id);
                    // sends queued but never flushed take the fallback;
                    // in-flight engine state stays put for resume
                    self.peer_unreachable(peer_id).await;
                }
            }
            ChannelOutcome::Inbound(ChannelData::Text(text)) => {
                self.engine.handle_control(peer_id, &text);
            }
            ChannelOutcome::Inbound(ChannelData::Binary(bytes)) => {
                self.engine.handle_chunk(peer_id, &bytes);
            }
        }
    }

    async fn drain_pending(&mut self, peer_id: &str) {
        let Some(pending) = self.pending.remove(peer_id) else {
            return;
        };
        for send in pending {
            match send {
                PendingSend::Text(text) => {
                    self.engine.send_text(peer_id, &text);
                }
                PendingSend::File { path, kind } => {
                    if let Err(err) = self.engine.send_file(peer_id, &path, kind).await {
                        self.emit(ClientEvent::Transfer(TransferEvent::Added(failed_item(
                            &self.device.name,
                            kind,
                            Some(path.as_path()),
                            None,
                            &format!("cannot read file: {err}"),
                        ))));
                    }
                }
            }
        }
    }

    /// No direct channel materialized for a peer with queued sends: fall
    /// back to the relay, or fail the sends definitively when the fallback
    /// is disabled.
    async fn peer_unreachable(&mut self, peer_id: &str) {
        self.set_pairing(peer_id, PairingStatus::Paused);
        let Some(pending) = self.pending.remove(peer_id) else {
            return;
        };

        for send in pending {
            if self.relay_fallback {
                let result = match &send {
                    PendingSend::Text(text) => self.relay_sender.send_text(peer_id, text).await,
                    PendingSend::File { path, kind } => {
                        self.relay_sender.send_file(peer_id, path, *kind).await
                    }
                };
                if let Err(err) = result {
                    tracing::warn!(peer = peer_id, error = %err, "relay fallback send failed");
                }
            } else {
                let (kind, path, text) = match &send {
                    PendingSend::Text(text) => (TransferKind::Text, None, Some(text.as_str())),
                    PendingSend::File { path, kind } => (*kind, Some(path), None),
                };
                let reason = crate::error::Error::NoTransport(peer_id.to_string()).to_string();
                self.emit(ClientEvent::Transfer(TransferEvent::Added(failed_item(
                    &self.device.name,
                    kind,
                    path.map(PathBuf::as_path),
                    text,
                    &reason,
                ))));
            }
        }
    }
}

struct PendingFileInfo {
    name: String,
    size: u64,
    mime: String,
}

async fn file_info(path: &std::path::Path) -> crate::error::Result<PendingFileInfo> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(crate::error::Error::InvalidInput(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    Ok(PendingFileInfo {
        name: path
            .file_name()
            .map_or_else(|| "file".to_string(), |name| name.to_string_lossy().into_owned()),
        size: metadata.len(),
        mime: mime_guess::from_path(path).first_or_octet_stream().to_string(),
    })
}

fn failed_item(
    local_name: &str,
    kind: TransferKind,
    path: Option<&std::path::Path>,
    text: Option<&str>,
    error: &str,
) -> TransferItem {
    TransferItem {
        id: Uuid::new_v4().to_string(),
        kind,
        content: text.map_or(TransferContent::Empty, |text| {
            TransferContent::Text(text.to_string())
        }),
        file_name: path.and_then(|path| {
            path.file_name().map(|name| name.to_string_lossy().into_owned())
        }),
        file_size: None,
        mime_type: None,
        timestamp: Utc::now(),
        sender: local_name.to_string(),
        direction: TransferDirection::Sent,
        status: TransferStatus::Failed,
        progress: 0,
        error: Some(error.to_string()),
    }
}
