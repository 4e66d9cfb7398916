//! # Orbitdrop Core Library
//!
//! `orbitdrop-core` provides the core functionality for Orbitdrop,
//! device-to-device text and file drop with hub-brokered pairing.
//!
//! ## How it fits together
//!
//! - A shared **signaling hub** tracks connected devices, broadcasts
//!   presence, and relays pairing and session-setup messages by device id.
//! - A client-side **negotiator** turns an accepted share request into a
//!   live direct channel via offer/answer/candidate exchange.
//! - The **chunk transfer engine** moves payloads over that channel with a
//!   sliding window, per-chunk acks, resend on timeout, and resume after
//!   reconnects.
//! - When no direct channel can be negotiated, the **relay fallback** moves
//!   the same chunks through the hub as base64-framed messages.
//!
//! ## Modules
//!
//! - [`channel`] - Direct-channel abstraction and the in-memory transport
//! - [`client`] - Client orchestrator and the signaling link
//! - [`codec`] - Chunk frame and control-message wire codec
//! - [`config`] - Configuration management
//! - [`device`] - Device identity and presence types
//! - [`hub`] - Signaling hub (session registry + WebSocket endpoint)
//! - [`relay`] - Relay fallback transfer
//! - [`session`] - Peer-session negotiation
//! - [`signal`] - Signaling envelope (hub wire protocol)
//! - [`transfer`] - Chunk transfer engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use orbitdrop_core::client::Client;
//! use orbitdrop_core::channel::NullChannelFactory;
//! use orbitdrop_core::config::Config;
//! use std::sync::Arc;
//!
//! let config = Config::load()?;
//! let (client, mut events) = Client::start(&config, Arc::new(NullChannelFactory));
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod relay;
pub mod session;
pub mod signal;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port of the signaling hub
pub const DEFAULT_HUB_PORT: u16 = 8787;

/// Default chunk size for transfers (64 KB)
pub const CHUNK_SIZE: u32 = 64 * 1024;

/// Maximum unacknowledged chunks in flight per send
pub const SEND_WINDOW_SIZE: usize = 8;

/// Milliseconds before an unacknowledged chunk is resent
pub const RESEND_TIMEOUT_MS: u64 = 2000;

/// Milliseconds between send ticks
pub const SEND_TICK_MS: u64 = 120;
