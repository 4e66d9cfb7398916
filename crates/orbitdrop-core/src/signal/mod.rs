//! Signaling envelope: the hub wire protocol.
//!
//! Every message exchanged with the hub is a JSON object `{type, payload}`.
//! The set of types is closed: unknown or malformed messages fail to decode
//! in one place and are silently dropped by both the hub and the client, so
//! no handler ever sees a partial envelope.
//!
//! Relayable variants carry a `to` field consumed by the hub's router and a
//! `from` field that the hub always stamps with the sender's registered
//! device id, overriding whatever the sender supplied.

use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceInfo, DeviceType};
use crate::transfer::TransferKind;

/// Connection status of the signaling link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    /// Attempting to reach the hub
    Connecting,
    /// Hub session is live
    Online,
    /// No hub session
    Offline,
}

/// Fire-and-forget sink for outgoing envelopes.
///
/// Implemented by the signaling link on clients and by test harnesses.
/// Delivery is best-effort at this layer; the transfer engine's own acks are
/// the only delivery guarantee.
pub trait SignalOutbox: Send + Sync {
    /// Enqueue an envelope toward the hub.
    fn send(&self, envelope: Envelope);
}

/// Addressing shared by the plain relayed handshake messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routed {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Payload of `share:request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Sender display name
    pub name: String,
    /// Sender form factor
    pub device_type: DeviceType,
    /// What the sender wants to share
    pub kind: TransferKind,
    /// File name, for file/image shares
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// File size in bytes, for file/image shares
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// MIME type, for file/image shares
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Payload of `offer` and `answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionPayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Session description
    pub sdp: String,
}

/// Payload of `ice-candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Network candidate, relayed one per message
    pub candidate: String,
}

/// Payload of `text-message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Message body
    pub text: String,
}

/// Payload of `relay:file-meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetaPayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Transfer id
    pub file_id: String,
    /// File name
    pub name: String,
    /// MIME type
    pub mime: String,
    /// Payload size in bytes
    pub size: u64,
    /// Number of chunks that will follow
    pub total_chunks: u32,
    /// Payload kind
    pub kind: TransferKind,
}

/// Payload of `relay:file-chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayChunkPayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Transfer id
    pub file_id: String,
    /// Chunk index
    pub index: u32,
    /// Base64-encoded chunk payload
    pub data: String,
}

/// Payload of `relay:file-complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCompletePayload {
    /// Recipient device id
    pub to: String,
    /// Sender device id, stamped by the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Transfer id
    pub file_id: String,
}

/// A signaling message, `{type, payload}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    /// Device registration, sent once per connection
    #[serde(rename = "hello")]
    Hello {
        /// Identity to register
        device: DeviceInfo,
    },
    /// Display-name change for the sender's session
    #[serde(rename = "rename")]
    Rename {
        /// New display name
        name: String,
    },
    /// Hub-to-client presence broadcast
    #[serde(rename = "presence:list")]
    PresenceList {
        /// Every registered device
        devices: Vec<Device>,
    },
    /// Ask a device to receive a share
    #[serde(rename = "share:request")]
    ShareRequest(SharePayload),
    /// Accept a pending share request
    #[serde(rename = "share:accept")]
    ShareAccept(Routed),
    /// Reject a pending share request
    #[serde(rename = "share:reject")]
    ShareReject(Routed),
    /// Session description from the offering side
    #[serde(rename = "offer")]
    Offer(DescriptionPayload),
    /// Session description from the answering side
    #[serde(rename = "answer")]
    Answer(DescriptionPayload),
    /// One locally discovered network candidate
    #[serde(rename = "ice-candidate")]
    IceCandidate(CandidatePayload),
    /// Plain text relayed through the hub, no session required
    #[serde(rename = "text-message")]
    TextMessage(TextPayload),
    /// Relay-fallback transfer announcement
    #[serde(rename = "relay:file-meta")]
    RelayFileMeta(RelayMetaPayload),
    /// Relay-fallback chunk, base64 payload
    #[serde(rename = "relay:file-chunk")]
    RelayFileChunk(RelayChunkPayload),
    /// Relay-fallback end-of-stream marker
    #[serde(rename = "relay:file-complete")]
    RelayFileComplete(RelayCompletePayload),
}

impl Envelope {
    /// The recipient of a relayable envelope, `None` for everything the hub
    /// consumes itself (`hello`, `rename`) or only ever emits
    /// (`presence:list`).
    #[must_use]
    pub fn relay_target(&self) -> Option<&str> {
        match self {
            Self::ShareRequest(p) => Some(&p.to),
            Self::ShareAccept(p) | Self::ShareReject(p) => Some(&p.to),
            Self::Offer(p) | Self::Answer(p) => Some(&p.to),
            Self::IceCandidate(p) => Some(&p.to),
            Self::TextMessage(p) => Some(&p.to),
            Self::RelayFileMeta(p) => Some(&p.to),
            Self::RelayFileChunk(p) => Some(&p.to),
            Self::RelayFileComplete(p) => Some(&p.to),
            Self::Hello { .. } | Self::Rename { .. } | Self::PresenceList { .. } => None,
        }
    }

    /// Stamp the sender's device id onto a relayable envelope, overriding any
    /// caller-supplied value. Spoofed `from` fields never survive the hub.
    pub fn stamp_from(&mut self, sender: &str) {
        let from = match self {
            Self::ShareRequest(p) => &mut p.from,
            Self::ShareAccept(p) | Self::ShareReject(p) => &mut p.from,
            Self::Offer(p) | Self::Answer(p) => &mut p.from,
            Self::IceCandidate(p) => &mut p.from,
            Self::TextMessage(p) => &mut p.from,
            Self::RelayFileMeta(p) => &mut p.from,
            Self::RelayFileChunk(p) => &mut p.from,
            Self::RelayFileComplete(p) => &mut p.from,
            Self::Hello { .. } | Self::Rename { .. } | Self::PresenceList { .. } => return,
        };
        *from = Some(sender.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_type_tags() {
        let offer = Envelope::Offer(DescriptionPayload {
            to: "b".to_string(),
            from: None,
            sdp: "sdp-blob".to_string(),
        });
        let json = serde_json::to_string(&offer).unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        assert!(json.contains("\"payload\""));

        let candidate = Envelope::IceCandidate(CandidatePayload {
            to: "b".to_string(),
            from: None,
            candidate: "cand".to_string(),
        });
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"type\":\"ice-candidate\""));

        let complete = Envelope::RelayFileComplete(RelayCompletePayload {
            to: "b".to_string(),
            from: None,
            file_id: "f1".to_string(),
        });
        let json = serde_json::to_string(&complete).unwrap();
        assert!(json.contains("\"type\":\"relay:file-complete\""));
        assert!(json.contains("\"fileId\":\"f1\""));
    }

    #[test]
    fn test_malformed_is_one_decode_failure() {
        assert!(serde_json::from_str::<Envelope>("not json").is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"type":"bogus","payload":{}}"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"payload":{}}"#).is_err());
        // missing required field
        assert!(
            serde_json::from_str::<Envelope>(r#"{"type":"offer","payload":{"to":"b"}}"#).is_err()
        );
    }

    #[test]
    fn test_stamp_from_overrides_caller_value() {
        let mut envelope = Envelope::ShareAccept(Routed {
            to: "b".to_string(),
            from: Some("spoofed".to_string()),
        });
        envelope.stamp_from("a");

        match envelope {
            Envelope::ShareAccept(p) => assert_eq!(p.from.as_deref(), Some("a")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_relay_target() {
        let hello = Envelope::Hello {
            device: DeviceInfo {
                id: "d1".to_string(),
                name: "Laptop".to_string(),
                device_type: DeviceType::Desktop,
                client_version: None,
            },
        };
        assert!(hello.relay_target().is_none());

        let text = Envelope::TextMessage(TextPayload {
            to: "b".to_string(),
            from: None,
            text: "hi".to_string(),
        });
        assert_eq!(text.relay_target(), Some("b"));
    }

    #[test]
    fn test_share_request_round_trip() {
        let json = r#"{
            "type": "share:request",
            "payload": {
                "to": "d2",
                "name": "Laptop",
                "deviceType": "desktop",
                "kind": "file",
                "fileName": "report.pdf",
                "fileSize": 2048,
                "mimeType": "application/pdf"
            }
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        match &envelope {
            Envelope::ShareRequest(p) => {
                assert_eq!(p.to, "d2");
                assert_eq!(p.kind, TransferKind::File);
                assert_eq!(p.file_size, Some(2048));
                assert!(p.from.is_none());
            }
            _ => unreachable!(),
        }
    }
}
