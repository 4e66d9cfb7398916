//! Observable transfer records.
//!
//! The core never stores a transfer list of its own. It emits one
//! [`TransferEvent::Added`] per transfer followed by [`TransferEvent::Updated`]
//! patches, and the surrounding application owns whatever list or history it
//! builds from them. Nothing here is read back by the protocol.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Plain text
    Text,
    /// Arbitrary file
    File,
    /// Image file (shown inline by UIs)
    Image,
}

/// Direction of a transfer relative to the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local device is the sender
    Sent,
    /// Local device is the receiver
    Received,
}

/// Lifecycle state of a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Waiting for a channel
    Queued,
    /// Chunks are going out
    Sending,
    /// Chunks are coming in
    Receiving,
    /// Channel dropped, state preserved for resume
    Paused,
    /// All chunks delivered and finalized
    Completed,
    /// No viable transport; definitively over
    Failed,
}

/// Finalized or in-progress content of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferContent {
    /// Nothing finalized yet
    Empty,
    /// Decoded text payload
    Text(String),
    /// Reassembled binary payload
    Bytes {
        /// Raw payload
        data: Bytes,
        /// Declared MIME type
        mime: String,
    },
}

/// User-facing record of one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferItem {
    /// Record id (distinct from the wire-level file id)
    pub id: String,
    /// Payload kind
    pub kind: TransferKind,
    /// Content; text is present from the start on the sending side,
    /// binary arrives with the completion patch
    pub content: TransferContent,
    /// File name, if any
    pub file_name: Option<String>,
    /// Payload size in bytes
    pub file_size: Option<u64>,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Peer device id, or the local display name for outgoing items
    pub sender: String,
    /// Direction
    pub direction: TransferDirection,
    /// Lifecycle state
    pub status: TransferStatus,
    /// Progress, 0-100
    pub progress: u8,
    /// Human-readable failure reason
    pub error: Option<String>,
}

/// Partial update against a [`TransferItem`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferPatch {
    /// New status
    pub status: Option<TransferStatus>,
    /// New progress
    pub progress: Option<u8>,
    /// Finalized content
    pub content: Option<TransferContent>,
    /// Failure reason
    pub error: Option<String>,
}

impl TransferPatch {
    /// Progress update, flipping to the given status.
    #[must_use]
    pub fn progress(status: TransferStatus, progress: u8) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            ..Self::default()
        }
    }

    /// Completion with finalized content.
    #[must_use]
    pub fn completed(content: TransferContent) -> Self {
        Self {
            status: Some(TransferStatus::Completed),
            progress: Some(100),
            content: Some(content),
            ..Self::default()
        }
    }

    /// Definitive failure with a human-readable reason.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TransferStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Create/patch events emitted against the application's transfer list.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A new transfer record
    Added(TransferItem),
    /// A partial update to an existing record
    Updated {
        /// Record id
        id: String,
        /// Fields to apply
        patch: TransferPatch,
    },
}
