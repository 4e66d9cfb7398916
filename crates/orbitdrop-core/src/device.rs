//! Device identity and presence types.
//!
//! A device is identified by a stable id generated once and persisted by the
//! client (see [`crate::config`]); the id survives reconnects so that hub
//! sessions and peer pairings always refer to the same logical device.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The form factor a device reports to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone
    Mobile,
    /// Desktop or laptop
    Desktop,
    /// Tablet
    Tablet,
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Desktop
    }
}

/// Presence status as reported in the hub's presence list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Device has a live hub session
    Online,
    /// Device is known but has no live session
    Offline,
}

/// Identity a device announces in its `hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Form factor
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Client software version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

impl DeviceInfo {
    /// Whether the announced identity is complete enough to register.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty()
    }
}

/// One entry of the hub's presence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Form factor
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Presence status
    pub status: PresenceStatus,
    /// Last-seen timestamp, milliseconds since the Unix epoch
    pub last_seen: i64,
}

impl Device {
    /// Build a presence entry for a currently connected device.
    #[must_use]
    pub fn online(info: &DeviceInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            device_type: info.device_type,
            status: PresenceStatus::Online,
            last_seen: Utc::now().timestamp_millis(),
        }
    }
}

/// Generate a fresh stable device id.
#[must_use]
pub fn generate_device_id() -> String {
    Uuid::new_v4().to_string()
}

/// Best-effort default device name, derived from the host name.
#[must_use]
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "orbitdrop-device".to_string())
}
