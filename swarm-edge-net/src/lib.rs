//! # SwarmEdge Network
//!
//! Network plumbing for SwarmEdge consensus traffic.
//!
//! This crate provides:
//! - The `MessageEnvelope` wire format (postcard) and its payload types
//! - The `SwarmTransport` trait every transport implements
//! - An in-memory `MockNetwork` for tests and simulation
//! - The report trust layer (`ReportVerifier`)

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use swarm_edge_core::crypto::VerifyError;

pub mod protocol;
pub mod traits;
pub mod trust;

#[cfg(feature = "std")]
mod mock;
#[cfg(feature = "std")]
pub use mock::{MockNetwork, MockTransport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::protocol::*;
    pub use crate::traits::*;
    pub use crate::trust::*;
}

/// Result type for network operations
pub type Result<T> = core::result::Result<T, Error>;

/// Network error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Send failed
    SendFailed,
    /// Receive failed
    ReceiveFailed,
    /// Timeout
    Timeout,
    /// Peer not found
    PeerNotFound,
    /// Serialization error
    Serialization,
    /// Transport not available
    TransportUnavailable,
    /// Invalid message format
    InvalidMessage,
    /// Envelope from an incompatible protocol version
    UnsupportedVersion(u8, u8),
    /// Report signed by a node with no registered key
    UnknownSigner,
    /// Report failed signature verification
    Untrusted(VerifyError),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::SendFailed => write!(f, "send failed"),
            Error::ReceiveFailed => write!(f, "receive failed"),
            Error::Timeout => write!(f, "timeout"),
            Error::PeerNotFound => write!(f, "peer not found"),
            Error::Serialization => write!(f, "serialization error"),
            Error::TransportUnavailable => write!(f, "transport unavailable"),
            Error::InvalidMessage => write!(f, "invalid message format"),
            Error::UnsupportedVersion(major, minor) => {
                write!(f, "unsupported protocol version {}.{}", major, minor)
            }
            Error::UnknownSigner => write!(f, "no key registered for reporting node"),
            Error::Untrusted(e) => write!(f, "untrusted report: {}", e),
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(_: postcard::Error) -> Self {
        Error::Serialization
    }
}

impl From<VerifyError> for Error {
    fn from(e: VerifyError) -> Self {
        Error::Untrusted(e)
    }
}
