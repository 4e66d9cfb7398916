//! Relay fallback transfer.
//!
//! When no direct channel exists, payloads travel through the hub itself as
//! JSON control messages: `relay:file-meta`, then one base64-encoded
//! `relay:file-chunk` per chunk in order, then `relay:file-complete`. There is
//! no windowing, no ack, and no resend on this path; delivery depends on the
//! hub relay being reliable and the underlying connection being ordered. The
//! trade buys a transport that works across topologies where a direct channel
//! cannot be negotiated at all.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::{merge_chunks, TransferMeta};
use crate::error::{Error, Result};
use crate::signal::{
    Envelope, RelayChunkPayload, RelayCompletePayload, RelayMetaPayload, SignalOutbox,
};
use crate::transfer::{
    PayloadSource, TransferContent, TransferDirection, TransferEvent, TransferItem, TransferKind,
    TransferPatch, TransferStatus,
};

/// Sends payloads through the hub, eagerly and in order.
pub struct RelaySender {
    outbox: Arc<dyn SignalOutbox>,
    events: mpsc::UnboundedSender<TransferEvent>,
    local_label: String,
    chunk_size: u32,
}

impl RelaySender {
    /// Create a relay sender pushing envelopes into `outbox`.
    pub fn new(
        outbox: Arc<dyn SignalOutbox>,
        events: mpsc::UnboundedSender<TransferEvent>,
        local_label: impl Into<String>,
        chunk_size: u32,
    ) -> Self {
        Self {
            outbox,
            events,
            local_label: local_label.into(),
            chunk_size,
        }
    }

    /// Send a text payload. Returns the wire file id.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let size = payload.len() as u64;
        self.send_payload(
            to,
            "message.txt",
            "text/plain",
            TransferKind::Text,
            PayloadSource::Memory(payload),
            size,
            TransferContent::Text(text.to_string()),
            None,
        )
        .await
    }

    /// Send a file payload. Returns the wire file id.
    pub async fn send_file(&self, to: &str, path: &Path, kind: TransferKind) -> Result<String> {
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

        self.send_payload(
            to,
            &name,
            &mime,
            kind,
            PayloadSource::File(path.to_path_buf()),
            size,
            TransferContent::Empty,
            Some(name.clone()),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_payload(
        &self,
        to: &str,
        name: &str,
        mime: &str,
        kind: TransferKind,
        source: PayloadSource,
        size: u64,
        content: TransferContent,
        file_name: Option<String>,
    ) -> Result<String> {
        let file_id = Uuid::new_v4().to_string();
        let total_chunks = TransferMeta::chunk_count(size, self.chunk_size);
        let transfer_id = Uuid::new_v4().to_string();

        let _ = self.events.send(TransferEvent::Added(TransferItem {
            id: transfer_id.clone(),
            kind,
            content,
            file_name,
            file_size: Some(size),
            mime_type: Some(mime.to_string()),
            timestamp: Utc::now(),
            sender: self.local_label.clone(),
            direction: TransferDirection::Sent,
            status: TransferStatus::Sending,
            progress: 0,
            error: None,
        }));

        self.outbox.send(Envelope::RelayFileMeta(RelayMetaPayload {
            to: to.to_string(),
            from: None,
            file_id: file_id.clone(),
            name: name.to_string(),
            mime: mime.to_string(),
            size,
            total_chunks,
            kind,
        }));

        for index in 0..total_chunks {
            let payload = match source.read_chunk(index, self.chunk_size, size).await {
                Ok(payload) => payload,
                Err(err) => {
                    let _ = self.events.send(TransferEvent::Updated {
                        id: transfer_id.clone(),
                        patch: TransferPatch::failed(format!("payload read failed: {err}")),
                    });
                    return Err(err);
                }
            };

            self.outbox.send(Envelope::RelayFileChunk(RelayChunkPayload {
                to: to.to_string(),
                from: None,
                file_id: file_id.clone(),
                index,
                data: BASE64.encode(&payload),
            }));

            #[allow(clippy::cast_possible_truncation)]
            let progress = ((u64::from(index) + 1) * 100 / u64::from(total_chunks)) as u8;
            let _ = self.events.send(TransferEvent::Updated {
                id: transfer_id.clone(),
                patch: TransferPatch::progress(TransferStatus::Sending, progress),
            });
        }

        self.outbox
            .send(Envelope::RelayFileComplete(RelayCompletePayload {
                to: to.to_string(),
                from: None,
                file_id: file_id.clone(),
            }));

        // fire-and-forget: the hub gives no delivery receipt on this path
        let _ = self.events.send(TransferEvent::Updated {
            id: transfer_id,
            patch: TransferPatch::progress(TransferStatus::Completed, 100),
        });

        tracing::debug!(file_id = %file_id, to, chunks = total_chunks, "relay send finished");
        Ok(file_id)
    }
}

struct RelayReceiveState {
    transfer_id: String,
    kind: TransferKind,
    mime: String,
    total_chunks: u32,
    chunks: Vec<Option<Bytes>>,
    received_count: u32,
}

/// Buffers inbound relay transfers by chunk index.
///
/// Duplicate and out-of-range indices are ignored. Completion is declared
/// only once every expected index is filled; an incomplete transfer whose
/// `relay:file-complete` already arrived simply stays pending, since nothing
/// will retransmit on this path.
pub struct RelayInbox {
    events: mpsc::UnboundedSender<TransferEvent>,
    states: HashMap<String, RelayReceiveState>,
}

impl RelayInbox {
    /// Create an empty inbox.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self {
            events,
            states: HashMap::new(),
        }
    }

    /// Handle `relay:file-meta`.
    pub fn on_meta(&mut self, payload: &RelayMetaPayload) {
        let Some(from) = payload.from.as_deref() else {
            return;
        };

        let transfer_id = Uuid::new_v4().to_string();
        let _ = self.events.send(TransferEvent::Added(TransferItem {
            id: transfer_id.clone(),
            kind: payload.kind,
            content: TransferContent::Empty,
            file_name: Some(payload.name.clone()),
            file_size: Some(payload.size),
            mime_type: Some(payload.mime.clone()),
            timestamp: Utc::now(),
            sender: from.to_string(),
            direction: TransferDirection::Received,
            status: TransferStatus::Receiving,
            progress: 0,
            error: None,
        }));

        let total = payload.total_chunks.max(1);
        self.states.insert(
            payload.file_id.clone(),
            RelayReceiveState {
                transfer_id,
                kind: payload.kind,
                mime: payload.mime.clone(),
                total_chunks: total,
                chunks: vec![None; total as usize],
                received_count: 0,
            },
        );
    }

    /// Handle `relay:file-chunk`.
    pub fn on_chunk(&mut self, payload: &RelayChunkPayload) {
        let Some(state) = self.states.get_mut(&payload.file_id) else {
            return;
        };
        let Ok(data) = BASE64.decode(&payload.data) else {
            tracing::trace!(file_id = %payload.file_id, "undecodable relay chunk dropped");
            return;
        };

        let Some(slot) = state.chunks.get_mut(payload.index as usize) else {
            // out of range: ignored, not an error
            return;
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(Bytes::from(data));
        state.received_count += 1;

        #[allow(clippy::cast_possible_truncation)]
        let progress =
            (u64::from(state.received_count) * 100 / u64::from(state.total_chunks)) as u8;
        let transfer_id = state.transfer_id.clone();
        let complete = state.received_count == state.total_chunks;

        if !complete {
            let _ = self.events.send(TransferEvent::Updated {
                id: transfer_id,
                patch: TransferPatch::progress(TransferStatus::Receiving, progress),
            });
            return;
        }
        self.finalize(&payload.file_id);
    }

    /// Handle `relay:file-complete`. A no-op unless every chunk is present
    /// (normally the last chunk already finalized the transfer).
    pub fn on_complete(&mut self, payload: &RelayCompletePayload) {
        let Some(state) = self.states.get(&payload.file_id) else {
            return;
        };
        if state.received_count == state.total_chunks {
            self.finalize(&payload.file_id);
        } else {
            tracing::debug!(
                file_id = %payload.file_id,
                received = state.received_count,
                total = state.total_chunks,
                "relay complete before all chunks; leaving transfer pending"
            );
        }
    }

    fn finalize(&mut self, file_id: &str) {
        let Some(state) = self.states.remove(file_id) else {
            return;
        };
        let merged = merge_chunks(&state.chunks);
        let content = if state.kind == TransferKind::Text {
            TransferContent::Text(String::from_utf8_lossy(&merged).into_owned())
        } else {
            TransferContent::Bytes {
                data: merged,
                mime: state.mime,
            }
        };
        tracing::debug!(file_id, "relay receive completed");
        let _ = self.events.send(TransferEvent::Updated {
            id: state.transfer_id,
            patch: TransferPatch::completed(content),
        });
    }
}
