//! Authoritative session registry.
//!
//! One registry per hub process maps device ids to live connections. It is
//! the sole writer of the presence list and the sole router of relayed
//! messages; every mutation happens under one lock, so the "at most one
//! session per device id" invariant is enforced in a single place and a
//! presence broadcast is always consistent with the mutation that triggered
//! it.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::device::{Device, DeviceInfo};
use crate::signal::Envelope;

/// Close code sent to a connection displaced by a newer `hello` for the same
/// device id.
pub const CLOSE_REPLACED: u16 = 1012;

/// Outbound traffic of one hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubOutbound {
    /// A serialized envelope
    Message(String),
    /// Close the connection with a reason
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: &'static str,
    },
}

/// Handle to one connection's outbound queue.
///
/// The `id` distinguishes connections of the same device across replacements:
/// a disconnect only removes the session if the ids still match.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: u64,
    tx: mpsc::UnboundedSender<HubOutbound>,
}

impl ConnHandle {
    /// Create a handle over a connection's outbound queue.
    #[must_use]
    pub fn new(id: u64, tx: mpsc::UnboundedSender<HubOutbound>) -> Self {
        Self { id, tx }
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, outbound: HubOutbound) {
        // a closed queue means the connection is gone; the disconnect path
        // will clean the session up
        let _ = self.tx.send(outbound);
    }
}

struct HubSession {
    device: DeviceInfo,
    conn: ConnHandle,
}

/// Process-wide registry of `device id → session`.
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, HubSession>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, replacing any prior session for the same id.
    ///
    /// The displaced connection receives a close with a distinguishable
    /// "replaced" reason. Invalid identities are dropped. Triggers a presence
    /// broadcast.
    pub async fn hello(&self, device: DeviceInfo, conn: ConnHandle) {
        if !device.is_valid() {
            tracing::debug!("hello with incomplete identity dropped");
            return;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(prior) = sessions.get(&device.id) {
            if prior.conn.id != conn.id {
                tracing::debug!(device = %device.id, "replacing prior session");
                prior.conn.send(HubOutbound::Close {
                    code: CLOSE_REPLACED,
                    reason: "replaced",
                });
            }
        }

        tracing::info!(device = %device.id, name = %device.name, "device registered");
        sessions.insert(device.id.clone(), HubSession { device, conn });
        Self::broadcast_presence(&sessions);
    }

    /// Update a device's display name. A name that is empty after trimming
    /// is a no-op. Triggers a presence broadcast.
    pub async fn rename(&self, device_id: &str, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(device_id) else {
            return;
        };
        session.device.name = name.to_string();
        Self::broadcast_presence(&sessions);
    }

    /// Route a relayable envelope to its target, stamping `from`.
    ///
    /// An unknown target or a closed connection drops the message silently:
    /// the sender gets no delivery confirmation at this layer, by design.
    pub async fn relay(&self, from: &str, mut envelope: Envelope) {
        let Some(to) = envelope.relay_target().map(ToString::to_string) else {
            return;
        };
        envelope.stamp_from(from);

        let sessions = self.sessions.read().await;
        let Some(target) = sessions.get(&to) else {
            tracing::trace!(from, to = %to, "relay target not registered, dropped");
            return;
        };
        let Ok(json) = serde_json::to_string(&envelope) else {
            return;
        };
        target.conn.send(HubOutbound::Message(json));
    }

    /// Remove the session owned by a connection. Idempotent: disconnecting
    /// an already-removed or replaced session is a no-op. Triggers a presence
    /// broadcast when a session was actually removed.
    pub async fn disconnect(&self, conn_id: u64) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.conn.id != conn_id);
        if sessions.len() != before {
            tracing::debug!(conn = conn_id, "session removed");
            Self::broadcast_presence(&sessions);
        }
    }

    /// Snapshot of the current presence list.
    pub async fn devices(&self) -> Vec<Device> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|session| Device::online(&session.device))
            .collect()
    }

    /// Send the presence list to every registered session, including the one
    /// that triggered the change. O(sessions), synchronous with the
    /// triggering mutation.
    fn broadcast_presence(sessions: &HashMap<String, HubSession>) {
        let devices = sessions
            .values()
            .map(|session| Device::online(&session.device))
            .collect();
        let Ok(json) = serde_json::to_string(&Envelope::PresenceList { devices }) else {
            return;
        };
        for session in sessions.values() {
            session.conn.send(HubOutbound::Message(json.clone()));
        }
    }
}
