//! Chunk transfer engine.
//!
//! Reliable, resumable, flow-controlled delivery of one payload per transfer
//! over the byte-channel abstraction in [`crate::channel`]. The channel may
//! reorder or silently drop under load; acks are the only source of truth for
//! what arrived, and resend-on-timeout bounds the worst-case stall without
//! requiring channel-level retransmission guarantees.
//!
//! ## Send side
//!
//! Each outgoing transfer owns a periodic tick. Every tick:
//!
//! 1. in-flight chunks older than the resend timeout are resent verbatim
//!    (at-least-once delivery per chunk);
//! 2. the window is refilled up to `window_size` chunks, draining the resume
//!    queue before advancing `next_index`;
//! 3. a progress patch is emitted; at 100% acked the tick stops and the send
//!    state is dropped.
//!
//! ## Receive side
//!
//! `meta` allocates state and surfaces a receiving record. Every chunk frame
//! is acked, duplicates included, to tolerate ack loss. Full receipt
//! finalizes the payload (text decode or mime-typed bytes) and drops the
//! state. Partial state never survives the process; resume always starts
//! from a fresh `resume:request` by the sender.

pub mod item;

pub use item::{
    TransferContent, TransferDirection, TransferEvent, TransferItem, TransferKind, TransferPatch,
    TransferStatus,
};

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::channel::{ChannelData, PeerSink};
use crate::codec::{
    decode_chunk, encode_chunk, merge_chunks, missing_indices, received_ranges, ControlMessage,
    TransferMeta,
};
use crate::error::{Error, Result};

/// Knobs of the send/receive state machines.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Payload bytes per chunk
    pub chunk_size: u32,
    /// Maximum unacknowledged chunks in flight
    pub window_size: usize,
    /// Age after which an unacked chunk is resent
    pub resend_timeout: Duration,
    /// Period of the send tick
    pub tick_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: crate::CHUNK_SIZE,
            window_size: crate::SEND_WINDOW_SIZE,
            resend_timeout: Duration::from_millis(crate::RESEND_TIMEOUT_MS),
            tick_interval: Duration::from_millis(crate::SEND_TICK_MS),
        }
    }
}

/// Where an outgoing payload's bytes come from.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Payload held in memory (text messages)
    Memory(Bytes),
    /// Payload read chunk-by-chunk from disk
    File(PathBuf),
}

impl PayloadSource {
    /// Read the bytes of one chunk. The read completes before the chunk
    /// counts as sent.
    pub async fn read_chunk(&self, index: u32, chunk_size: u32, size: u64) -> Result<Bytes> {
        let start = u64::from(index) * u64::from(chunk_size);
        let end = (start + u64::from(chunk_size)).min(size);
        let len = end.saturating_sub(start);

        match self {
            Self::Memory(bytes) => {
                let start = usize::try_from(start)
                    .map_err(|_| Error::Internal("chunk offset overflow".to_string()))?;
                let end = usize::try_from(end)
                    .map_err(|_| Error::Internal("chunk offset overflow".to_string()))?;
                Ok(bytes.slice(start.min(bytes.len())..end.min(bytes.len())))
            }
            Self::File(path) => {
                if len == 0 {
                    return Ok(Bytes::new());
                }
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![
                    0u8;
                    usize::try_from(len)
                        .map_err(|_| Error::Internal("chunk length overflow".to_string()))?
                ];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

struct Inflight {
    sent_at: Instant,
    frame: Bytes,
}

/// Sender-side state of one transfer.
struct SendState {
    file_id: String,
    peer_id: String,
    transfer_id: String,
    meta: TransferMeta,
    source: PayloadSource,
    next_index: u32,
    acked: Vec<bool>,
    inflight: HashMap<u32, Inflight>,
    resume_queue: VecDeque<u32>,
    ticker: Option<JoinHandle<()>>,
}

impl SendState {
    fn progress(&self) -> u8 {
        let acked = self.acked.iter().filter(|acked| **acked).count();
        #[allow(clippy::cast_possible_truncation)]
        {
            (acked * 100 / self.acked.len().max(1)) as u8
        }
    }

    fn is_complete(&self) -> bool {
        self.acked.iter().all(|acked| *acked)
    }

    /// Stop the tick task. Idempotent; runs on completion and on teardown.
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for SendState {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

/// Receiver-side state of one transfer.
struct ReceiveState {
    peer_id: String,
    transfer_id: String,
    meta: TransferMeta,
    chunks: Vec<Option<Bytes>>,
    received_count: u32,
}

impl ReceiveState {
    fn progress(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (u64::from(self.received_count) * 100 / u64::from(self.meta.total_chunks).max(1)) as u8
        }
    }
}

/// The send/receive state machines of one client.
///
/// Owned by exactly one task; every method takes `&mut self` and nothing here
/// is shared. The engine pushes outgoing data through its [`PeerSink`] and
/// surfaces [`TransferEvent`]s on the channel given at construction. Tick
/// scheduling is cooperative: the engine spawns one interval task per send,
/// each tick arrives on the receiver returned by [`TransferEngine::new`], and
/// the owner calls [`TransferEngine::tick`] for it.
pub struct TransferEngine {
    settings: TransferSettings,
    local_label: String,
    sink: Arc<dyn PeerSink>,
    events: mpsc::UnboundedSender<TransferEvent>,
    tick_tx: mpsc::UnboundedSender<String>,
    sends: HashMap<String, SendState>,
    receives: HashMap<String, ReceiveState>,
}

impl TransferEngine {
    /// Create an engine. The returned receiver yields the file id of every
    /// due send tick; the owner must feed each into [`TransferEngine::tick`].
    pub fn new(
        settings: TransferSettings,
        local_label: impl Into<String>,
        sink: Arc<dyn PeerSink>,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        (
            Self {
                settings,
                local_label: local_label.into(),
                sink,
                events,
                tick_tx,
                sends: HashMap::new(),
                receives: HashMap::new(),
            },
            tick_rx,
        )
    }

    /// Start sending a text payload to a peer. Returns the wire file id.
    pub fn send_text(&mut self, peer_id: &str, text: &str) -> String {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let size = payload.len() as u64;
        let meta = TransferMeta {
            file_id: Uuid::new_v4().to_string(),
            name: "message.txt".to_string(),
            size,
            mime: "text/plain".to_string(),
            total_chunks: TransferMeta::chunk_count(size, self.settings.chunk_size),
            chunk_size: self.settings.chunk_size,
            kind: TransferKind::Text,
        };

        self.start_send(
            peer_id,
            meta,
            PayloadSource::Memory(payload),
            TransferContent::Text(text.to_string()),
            None,
        )
    }

    /// Start sending a file payload to a peer. Returns the wire file id.
    pub async fn send_file(
        &mut self,
        peer_id: &str,
        path: &Path,
        kind: TransferKind,
    ) -> Result<String> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |name| name.to_string_lossy().into_owned());
        let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
        let size = metadata.len();

        let meta = TransferMeta {
            file_id: Uuid::new_v4().to_string(),
            name,
            size,
            mime,
            total_chunks: TransferMeta::chunk_count(size, self.settings.chunk_size),
            chunk_size: self.settings.chunk_size,
            kind,
        };

        Ok(self.start_send(
            peer_id,
            meta,
            PayloadSource::File(path.to_path_buf()),
            TransferContent::Empty,
            Some(path),
        ))
    }

    fn start_send(
        &mut self,
        peer_id: &str,
        meta: TransferMeta,
        source: PayloadSource,
        content: TransferContent,
        path: Option<&Path>,
    ) -> String {
        let transfer_id = Uuid::new_v4().to_string();
        let file_id = meta.file_id.clone();

        self.emit(TransferEvent::Added(TransferItem {
            id: transfer_id.clone(),
            kind: meta.kind,
            content,
            file_name: path.map(|_| meta.name.clone()),
            file_size: Some(meta.size),
            mime_type: Some(meta.mime.clone()),
            timestamp: Utc::now(),
            sender: self.local_label.clone(),
            direction: TransferDirection::Sent,
            status: TransferStatus::Sending,
            progress: 0,
            error: None,
        }));

        self.sink.send(
            peer_id,
            ChannelData::Text(encode_control(&ControlMessage::Meta(meta.clone()))),
        );

        let total = meta.total_chunks as usize;
        let mut state = SendState {
            file_id: file_id.clone(),
            peer_id: peer_id.to_string(),
            transfer_id,
            meta,
            source,
            next_index: 0,
            acked: vec![false; total],
            inflight: HashMap::new(),
            resume_queue: VecDeque::new(),
            ticker: None,
        };
        state.ticker = Some(self.spawn_ticker(file_id.clone()));
        // a replaced entry (same file id) drops here, aborting its ticker
        self.sends.insert(file_id.clone(), state);

        tracing::debug!(file_id = %file_id, peer = peer_id, chunks = total, "send started");
        file_id
    }

    fn spawn_ticker(&self, file_id: String) -> JoinHandle<()> {
        let tick_tx = self.tick_tx.clone();
        let period = self.settings.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first interval tick fires immediately; skip it so sends
            // start one period after creation, like a plain repeating timer
            interval.tick().await;
            loop {
                interval.tick().await;
                if tick_tx.send(file_id.clone()).is_err() {
                    return;
                }
            }
        })
    }

    /// Drive one tick of a send: resend stale chunks, refill the window,
    /// emit progress. A tick for an unknown file id is a no-op.
    pub async fn tick(&mut self, file_id: &str) {
        let sink = Arc::clone(&self.sink);
        let window_size = self.settings.window_size;
        let resend_timeout = self.settings.resend_timeout;

        let Some(state) = self.sends.get_mut(file_id) else {
            return;
        };

        let now = Instant::now();
        for inflight in state.inflight.values_mut() {
            if now.duration_since(inflight.sent_at) > resend_timeout {
                sink.send(&state.peer_id, ChannelData::Binary(inflight.frame.clone()));
                inflight.sent_at = now;
            }
        }

        while state.inflight.len() < window_size {
            let next = state.resume_queue.pop_front().or_else(|| {
                (state.next_index < state.meta.total_chunks).then(|| {
                    let index = state.next_index;
                    state.next_index += 1;
                    index
                })
            });
            let Some(index) = next else { break };

            let payload = match state
                .source
                .read_chunk(index, state.meta.chunk_size, state.meta.size)
                .await
            {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(file_id = %state.file_id, index, error = %err, "chunk read failed");
                    break;
                }
            };

            let frame = encode_chunk(&state.file_id, index, &payload);
            sink.send(&state.peer_id, ChannelData::Binary(frame.clone()));
            state.inflight.insert(
                index,
                Inflight {
                    sent_at: Instant::now(),
                    frame,
                },
            );
        }

        debug_assert!(state.inflight.len() <= window_size);

        let progress = state.progress();
        let transfer_id = state.transfer_id.clone();
        let done = state.is_complete();
        if done {
            if let Some(mut state) = self.sends.remove(file_id) {
                state.stop_ticker();
            }
        }

        let status = if done {
            TransferStatus::Completed
        } else {
            TransferStatus::Sending
        };
        self.emit(TransferEvent::Updated {
            id: transfer_id,
            patch: TransferPatch::progress(status, progress),
        });
    }

    /// Handle a JSON control message from a peer. Malformed input and stale
    /// file ids are silently dropped.
    pub fn handle_control(&mut self, peer_id: &str, text: &str) {
        let Ok(message) = serde_json::from_str::<ControlMessage>(text) else {
            tracing::trace!(peer = peer_id, "malformed control message dropped");
            return;
        };

        match message {
            ControlMessage::Meta(meta) => self.accept_meta(peer_id, meta),
            ControlMessage::Ack { file_id, index } => self.apply_ack(&file_id, index),
            ControlMessage::ResumeRequest { file_id } => self.answer_resume(peer_id, &file_id),
            ControlMessage::ResumeState { file_id, ranges } => {
                self.apply_resume_state(&file_id, &ranges);
            }
        }
    }

    fn accept_meta(&mut self, peer_id: &str, meta: TransferMeta) {
        let transfer_id = Uuid::new_v4().to_string();

        self.emit(TransferEvent::Added(TransferItem {
            id: transfer_id.clone(),
            kind: meta.kind,
            content: TransferContent::Empty,
            file_name: Some(meta.name.clone()),
            file_size: Some(meta.size),
            mime_type: Some(meta.mime.clone()),
            timestamp: Utc::now(),
            sender: peer_id.to_string(),
            direction: TransferDirection::Received,
            status: TransferStatus::Receiving,
            progress: 0,
            error: None,
        }));

        let total = meta.total_chunks as usize;
        tracing::debug!(file_id = %meta.file_id, peer = peer_id, chunks = total, "receive started");
        self.receives.insert(
            meta.file_id.clone(),
            ReceiveState {
                peer_id: peer_id.to_string(),
                transfer_id,
                meta,
                chunks: vec![None; total],
                received_count: 0,
            },
        );
    }

    fn apply_ack(&mut self, file_id: &str, index: u32) {
        let Some(state) = self.sends.get_mut(file_id) else {
            return;
        };
        let Some(slot) = state.acked.get_mut(index as usize) else {
            return;
        };
        *slot = true;
        state.inflight.remove(&index);

        let progress = state.progress();
        let transfer_id = state.transfer_id.clone();
        let done = state.is_complete();
        if done {
            if let Some(mut state) = self.sends.remove(file_id) {
                state.stop_ticker();
            }
            tracing::debug!(file_id, "send completed");
        }

        let status = if done {
            TransferStatus::Completed
        } else {
            TransferStatus::Sending
        };
        self.emit(TransferEvent::Updated {
            id: transfer_id,
            patch: TransferPatch::progress(status, progress),
        });
    }

    fn answer_resume(&mut self, peer_id: &str, file_id: &str) {
        let Some(state) = self.receives.get(file_id) else {
            // stale resume for an unknown transfer
            return;
        };
        let ranges = received_ranges(&state.chunks);
        self.sink.send(
            peer_id,
            ChannelData::Text(encode_control(&ControlMessage::ResumeState {
                file_id: file_id.to_string(),
                ranges,
            })),
        );
    }

    fn apply_resume_state(&mut self, file_id: &str, ranges: &[(u32, u32)]) {
        let Some(state) = self.sends.get_mut(file_id) else {
            return;
        };
        let missing = missing_indices(state.meta.total_chunks, ranges);
        tracing::debug!(file_id, missing = missing.len(), "resume state applied");
        state.resume_queue = missing.into();
    }

    /// Handle a binary chunk frame from a peer.
    ///
    /// Duplicate and out-of-range indices are ignored, but every decodable
    /// frame is acked so the sender converges even when acks get lost.
    pub fn handle_chunk(&mut self, peer_id: &str, data: &[u8]) {
        let Ok(frame) = decode_chunk(data) else {
            tracing::trace!(peer = peer_id, "malformed chunk frame dropped");
            return;
        };

        let Some(state) = self.receives.get_mut(&frame.file_id) else {
            return;
        };

        let mut progress_patch = None;
        let mut finalize = false;
        if let Some(slot) = state.chunks.get_mut(frame.index as usize) {
            if slot.is_none() {
                *slot = Some(frame.payload.clone());
                state.received_count += 1;
                let progress = state.progress();
                let status = if progress == 100 {
                    TransferStatus::Completed
                } else {
                    TransferStatus::Receiving
                };
                progress_patch = Some((
                    state.transfer_id.clone(),
                    TransferPatch::progress(status, progress),
                ));
                finalize = state.received_count == state.meta.total_chunks;
            }
        }

        if let Some((id, patch)) = progress_patch {
            self.emit(TransferEvent::Updated { id, patch });
        }

        self.sink.send(
            peer_id,
            ChannelData::Text(encode_control(&ControlMessage::Ack {
                file_id: frame.file_id.clone(),
                index: frame.index,
            })),
        );

        if finalize {
            if let Some(state) = self.receives.remove(&frame.file_id) {
                let content = finalize_payload(&state.meta, &state.chunks);
                tracing::debug!(file_id = %frame.file_id, "receive completed");
                self.emit(TransferEvent::Updated {
                    id: state.transfer_id,
                    patch: TransferPatch::completed(content),
                });
            }
        }
    }

    /// Re-announce every send still owned by `peer_id` after a reconnect.
    /// The receiver answers each with its contiguous received ranges.
    pub fn resume_pending(&mut self, peer_id: &str) {
        let requests: Vec<String> = self
            .sends
            .values()
            .filter(|state| state.peer_id == peer_id)
            .map(|state| state.file_id.clone())
            .collect();

        for file_id in requests {
            tracing::debug!(file_id = %file_id, peer = peer_id, "resume requested");
            self.sink.send(
                peer_id,
                ChannelData::Text(encode_control(&ControlMessage::ResumeRequest { file_id })),
            );
        }
    }

    /// Destroy all transfer state owned by `peer_id` and stop its tickers.
    /// State of other peers is untouched. Runs on explicit session teardown,
    /// not on transient channel drops.
    pub fn teardown_peer(&mut self, peer_id: &str) {
        self.sends.retain(|_, state| {
            if state.peer_id == peer_id {
                state.stop_ticker();
                false
            } else {
                true
            }
        });
        self.receives.retain(|_, state| state.peer_id != peer_id);
    }

    /// Wire file ids of sends still owned by `peer_id`.
    #[must_use]
    pub fn pending_sends(&self, peer_id: &str) -> Vec<String> {
        self.sends
            .values()
            .filter(|state| state.peer_id == peer_id)
            .map(|state| state.file_id.clone())
            .collect()
    }

    #[cfg(test)]
    fn resume_queue(&self, file_id: &str) -> Vec<u32> {
        self.sends
            .get(file_id)
            .map(|state| state.resume_queue.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn inflight_len(&self, file_id: &str) -> usize {
        self.sends.get(file_id).map_or(0, |state| state.inflight.len())
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

fn encode_control(message: &ControlMessage) -> String {
    serde_json::to_string(message).unwrap_or_default()
}

fn finalize_payload(meta: &TransferMeta, chunks: &[Option<Bytes>]) -> TransferContent {
    let merged = merge_chunks(chunks);
    if meta.kind == TransferKind::Text {
        TransferContent::Text(String::from_utf8_lossy(&merged).into_owned())
    } else {
        TransferContent::Bytes {
            data: merged,
            mime: meta.mime.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::channel::ChannelData;

    /// Sink that records everything and optionally delivers to a partner
    /// engine later.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, ChannelData)>>,
    }

    impl RecordingSink {
        fn drain(&self) -> Vec<(String, ChannelData)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl PeerSink for RecordingSink {
        fn send(&self, peer_id: &str, data: ChannelData) {
            self.sent.lock().unwrap().push((peer_id.to_string(), data));
        }
    }

    fn small_settings() -> TransferSettings {
        TransferSettings {
            chunk_size: 4,
            window_size: 8,
            resend_timeout: Duration::from_millis(2000),
            tick_interval: Duration::from_millis(120),
        }
    }

    fn engine(
        settings: TransferSettings,
        label: &str,
    ) -> (
        TransferEngine,
        Arc<RecordingSink>,
        mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let sink = Arc::new(RecordingSink::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (engine, _tick_rx) = TransferEngine::new(
            settings,
            label,
            Arc::clone(&sink) as Arc<dyn PeerSink>,
            events_tx,
        );
        (engine, sink, events_rx)
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Deliver everything one engine sent into another engine.
    fn pump(from: &RecordingSink, to: &mut TransferEngine, peer_label: &str) {
        for (_, data) in from.drain() {
            match data {
                ChannelData::Text(text) => to.handle_control(peer_label, &text),
                ChannelData::Binary(bytes) => to.handle_chunk(peer_label, &bytes),
            }
        }
    }

    #[tokio::test]
    async fn test_text_round_trip_single_chunk() {
        let (mut a, a_sink, mut a_events) = engine(TransferSettings::default(), "device-a");
        let (mut b, b_sink, mut b_events) = engine(TransferSettings::default(), "device-b");

        let file_id = a.send_text("d2", "hello");
        a.tick(&file_id).await;

        // meta + exactly one chunk
        assert_eq!(a_sink.sent.lock().unwrap().len(), 2);

        pump(&a_sink, &mut b, "d1");
        pump(&b_sink, &mut a, "d2");

        let b_seen = drain_events(&mut b_events);
        assert!(matches!(
            &b_seen[0],
            TransferEvent::Added(item)
                if item.status == TransferStatus::Receiving
                    && item.direction == TransferDirection::Received
        ));
        assert!(b_seen.iter().any(|event| matches!(
            event,
            TransferEvent::Updated { patch, .. }
                if patch.content == Some(TransferContent::Text("hello".to_string()))
                    && patch.status == Some(TransferStatus::Completed)
        )));

        let a_seen = drain_events(&mut a_events);
        assert!(a_seen.iter().any(|event| matches!(
            event,
            TransferEvent::Updated { patch, .. }
                if patch.progress == Some(100) && patch.status == Some(TransferStatus::Completed)
        )));

        // send state is gone; further ticks are no-ops
        a.tick(&file_id).await;
        assert!(drain_events(&mut a_events).is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_still_completes() {
        let (mut a, a_sink, _a_events) = engine(TransferSettings::default(), "device-a");
        let (mut b, b_sink, mut b_events) = engine(TransferSettings::default(), "device-b");

        let file_id = a.send_text("d2", "");
        a.tick(&file_id).await;

        pump(&a_sink, &mut b, "d1");
        pump(&b_sink, &mut a, "d2");

        let b_seen = drain_events(&mut b_events);
        assert!(b_seen.iter().any(|event| matches!(
            event,
            TransferEvent::Updated { patch, .. }
                if patch.content == Some(TransferContent::Text(String::new()))
        )));
    }

    #[tokio::test]
    async fn test_window_is_never_exceeded() {
        let (mut a, a_sink, _a_events) = engine(small_settings(), "device-a");

        // 4-byte chunks, 100 bytes -> 25 chunks, window 8
        let payload = "x".repeat(100);
        let file_id = a.send_text("d2", &payload);
        a.tick(&file_id).await;
        assert_eq!(a.inflight_len(&file_id), 8);

        // further ticks without acks keep the window full, not growing
        a.tick(&file_id).await;
        a.tick(&file_id).await;
        assert_eq!(a.inflight_len(&file_id), 8);

        // count distinct chunk frames actually sent
        let frames: Vec<_> = a_sink
            .drain()
            .into_iter()
            .filter(|(_, data)| matches!(data, ChannelData::Binary(_)))
            .collect();
        assert_eq!(frames.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_inflight_chunks_are_resent() {
        let (mut a, a_sink, _a_events) = engine(small_settings(), "device-a");

        let file_id = a.send_text("d2", "abcd");
        a.tick(&file_id).await;
        assert_eq!(
            a_sink
                .drain()
                .iter()
                .filter(|(_, data)| matches!(data, ChannelData::Binary(_)))
                .count(),
            1
        );

        // not stale yet
        tokio::time::advance(Duration::from_millis(1000)).await;
        a.tick(&file_id).await;
        assert_eq!(
            a_sink
                .drain()
                .iter()
                .filter(|(_, data)| matches!(data, ChannelData::Binary(_)))
                .count(),
            0
        );

        // past the resend timeout the identical frame goes out again
        tokio::time::advance(Duration::from_millis(1500)).await;
        a.tick(&file_id).await;
        assert_eq!(
            a_sink
                .drain()
                .iter()
                .filter(|(_, data)| matches!(data, ChannelData::Binary(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_ignored_but_acked() {
        let (mut a, a_sink, _a_events) = engine(TransferSettings::default(), "device-a");
        let (mut b, b_sink, mut b_events) = engine(TransferSettings::default(), "device-b");

        let file_id = a.send_text("d2", "hello");
        a.tick(&file_id).await;

        let sent = a_sink.drain();
        let meta = sent
            .iter()
            .find_map(|(_, data)| match data {
                ChannelData::Text(text) => Some(text.clone()),
                ChannelData::Binary(_) => None,
            })
            .unwrap();
        let frame = sent
            .iter()
            .find_map(|(_, data)| match data {
                ChannelData::Binary(bytes) => Some(bytes.clone()),
                ChannelData::Text(_) => None,
            })
            .unwrap();

        b.handle_control("d1", &meta);
        b.handle_chunk("d1", &frame);

        // the transfer is finalized; replay the same frame
        b.handle_chunk("d1", &frame);

        // only the first frame was acked: the replay hit a transfer whose
        // state was already discarded
        let acks = b_sink
            .drain()
            .into_iter()
            .filter(|(_, data)| matches!(data, ChannelData::Text(text) if text.contains("\"ack\"")))
            .count();
        assert_eq!(acks, 1);

        // completion was emitted exactly once
        let completions = drain_events(&mut b_events)
            .into_iter()
            .filter(|event| matches!(
                event,
                TransferEvent::Updated { patch, .. } if patch.content.is_some()
            ))
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_before_completion_keeps_count() {
        let (mut a, a_sink, _a_events) = engine(small_settings(), "device-a");
        let (mut b, b_sink, mut b_events) = engine(small_settings(), "device-b");

        // 3 chunks
        let file_id = a.send_text("d2", "aaaabbbbcc");
        a.tick(&file_id).await;

        let sent = a_sink.drain();
        let meta = sent
            .iter()
            .find_map(|(_, data)| match data {
                ChannelData::Text(text) => Some(text.clone()),
                ChannelData::Binary(_) => None,
            })
            .unwrap();
        let frames: Vec<Bytes> = sent
            .iter()
            .filter_map(|(_, data)| match data {
                ChannelData::Binary(bytes) => Some(bytes.clone()),
                ChannelData::Text(_) => None,
            })
            .collect();
        assert_eq!(frames.len(), 3);

        b.handle_control("d1", &meta);
        b.handle_chunk("d1", &frames[0]);
        b.handle_chunk("d1", &frames[0]);
        drain_events(&mut b_events);

        // duplicate did not bump received_count: progress stays put and a
        // second ack still went out
        let acks = b_sink
            .drain()
            .into_iter()
            .filter(|(_, data)| matches!(data, ChannelData::Text(text) if text.contains("\"ack\"")))
            .count();
        assert_eq!(acks, 2);

        b.handle_chunk("d1", &frames[1]);
        b.handle_chunk("d1", &frames[2]);
        let completed = drain_events(&mut b_events).into_iter().any(|event| {
            matches!(
                event,
                TransferEvent::Updated { patch, .. }
                    if patch.content == Some(TransferContent::Text("aaaabbbbcc".to_string()))
            )
        });
        assert!(completed);
    }

    #[tokio::test]
    async fn test_resume_round_trip_sends_only_missing() {
        let (mut a, a_sink, _a_events) = engine(small_settings(), "device-a");
        let (mut b, b_sink, _b_events) = engine(small_settings(), "device-b");

        // 4 chunks of 4 bytes
        let file_id = a.send_text("d2", "aaaabbbbccccdddd");
        a.tick(&file_id).await;

        let sent = a_sink.drain();
        let meta = sent
            .iter()
            .find_map(|(_, data)| match data {
                ChannelData::Text(text) => Some(text.clone()),
                ChannelData::Binary(_) => None,
            })
            .unwrap();
        let frames: Vec<Bytes> = sent
            .iter()
            .filter_map(|(_, data)| match data {
                ChannelData::Binary(bytes) => Some(bytes.clone()),
                ChannelData::Text(_) => None,
            })
            .collect();
        assert_eq!(frames.len(), 4);

        // chunks 0 and 1 arrive; 2 and 3 are lost with the channel
        b.handle_control("d1", &meta);
        b.handle_chunk("d1", &frames[0]);
        b.handle_chunk("d1", &frames[1]);
        pump(&b_sink, &mut a, "d2");

        // reconnect: sender asks, receiver answers with its ranges
        a.resume_pending("d2");
        pump(&a_sink, &mut b, "d1");
        pump(&b_sink, &mut a, "d2");

        assert_eq!(a.resume_queue(&file_id), vec![2, 3]);

        // drain in-flight bookkeeping for the lost chunks so the refill pulls
        // from the resume queue
        a.tick(&file_id).await;
        pump(&a_sink, &mut b, "d1");
        pump(&b_sink, &mut a, "d2");

        // chunks 0 and 1 were never resent: the receiver saw 4 distinct
        // stores plus the resumed 2,3 as duplicates at most
        assert!(a.pending_sends("d2").is_empty(), "transfer should be complete");
    }

    #[tokio::test]
    async fn test_resume_state_for_unknown_file_is_ignored() {
        let (mut a, a_sink, _a_events) = engine(small_settings(), "device-a");
        a.handle_control(
            "d2",
            r#"{"type":"resume:state","payload":{"fileId":"nope","ranges":[[0,1]]}}"#,
        );
        a.handle_control("d2", r#"{"type":"resume:request","payload":{"fileId":"nope"}}"#);
        assert!(a_sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_scoped_to_one_peer() {
        let (mut a, _a_sink, _a_events) = engine(small_settings(), "device-a");

        let keep = a.send_text("peer-keep", "data");
        let drop_id = a.send_text("peer-drop", "data");

        a.teardown_peer("peer-drop");
        assert!(a.pending_sends("peer-drop").is_empty());
        assert_eq!(a.pending_sends("peer-keep"), vec![keep]);
        assert!(!a.pending_sends("peer-keep").contains(&drop_id));
    }

    #[tokio::test]
    async fn test_file_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let payload: Vec<u8> = (0u32..50_000).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &payload).await.unwrap();

        let settings = TransferSettings {
            chunk_size: 16 * 1024,
            ..TransferSettings::default()
        };
        let (mut a, a_sink, _a_events) = engine(settings.clone(), "device-a");
        let (mut b, b_sink, mut b_events) = engine(settings, "device-b");

        let file_id = a.send_file("d2", &path, TransferKind::File).await.unwrap();
        a.tick(&file_id).await;

        pump(&a_sink, &mut b, "d1");
        pump(&b_sink, &mut a, "d2");

        let completed = drain_events(&mut b_events).into_iter().find_map(|event| {
            if let TransferEvent::Updated { patch, .. } = event {
                patch.content
            } else {
                None
            }
        });
        match completed {
            Some(TransferContent::Bytes { data, mime }) => {
                assert_eq!(data.as_ref(), payload.as_slice());
                assert_eq!(mime, "application/octet-stream");
            }
            other => panic!("expected binary content, got {other:?}"),
        }
    }
}
