//! Error types for Orbitdrop.
//!
//! This module provides a unified error type for all Orbitdrop operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Orbitdrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Orbitdrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid protocol frame or envelope
    #[error("invalid protocol message: {0}")]
    Protocol(String),

    /// The direct channel to a peer is closed or was never established
    #[error("channel to '{0}' is not open")]
    ChannelClosed(String),

    /// Channel negotiation failed
    #[error("negotiation with '{peer}' failed: {reason}")]
    NegotiationFailed {
        /// Peer device id
        peer: String,
        /// Reason for failure
        reason: String,
    },

    /// No transport is available for a transfer
    #[error("no viable transport to '{0}': direct channel unavailable and relay fallback disabled")]
    NoTransport(String),

    /// Invalid input from the caller
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether this error is recoverable (can be retried).
    ///
    /// Channel failures are transient: the pairing moves to `paused` and
    /// transfer state is preserved for resume. [`Error::NoTransport`] is the
    /// only failure that definitively ends a transfer.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ChannelClosed(_) | Self::NegotiationFailed { .. })
    }
}
