use thiserror::Error;

use crate::buffer::BufferType;
use crate::status::SecurityStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type. The three variants deliberately separate "you used the API
/// wrong" from "the security package refused" from "the bytes on the wire are bad",
/// so callers can react to each without string matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The caller violated the lifecycle or ordering contract of this crate. These are
    /// never produced by a provider call and are never worth retrying.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// A provider call returned a non-success status. Carries the original status code
    /// and its static classification; retry policy belongs to the caller.
    #[error("{operation} failed: {status}")]
    Package {
        operation: &'static str,
        status: SecurityStatus,
    },

    /// A received frame is malformed. Raised before any provider call is attempted so
    /// attacker-controlled lengths never reach the native layer.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl Error {
    pub(crate) fn package(operation: &'static str, status: SecurityStatus) -> Self {
        Error::Package { operation, status }
    }

    /// The provider status behind this error, if it is a package failure.
    pub fn status(&self) -> Option<SecurityStatus> {
        match self {
            Error::Package { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Misuse of the crate's own state machine and handle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("the object has already been disposed")]
    Disposed,

    #[error("the native handle is invalid or its release has been requested")]
    InvalidHandle,

    #[error("the security context is not established yet")]
    NotEstablished,

    #[error("the handshake has already completed on this context")]
    HandshakeComplete,

    #[error("a peer token was supplied on the first handshake step")]
    UnexpectedPeerToken,

    #[error("the peer's reply is required to continue the handshake")]
    MissingPeerToken,

    #[error("an impersonation is already active on this context")]
    AlreadyImpersonating,

    #[error("the security package does not support impersonation")]
    ImpersonationUnsupported,

    #[error("no {0:?} buffer was provided in the buffer set")]
    MissingBuffer(BufferType),

    #[error("the provider reported {used} used bytes for a buffer of {capacity}")]
    BufferOverrun { used: usize, capacity: usize },
}

/// Structural problems with an encrypted or signed frame, detected during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {got} bytes cannot contain a complete message (need at least {need})")]
    Truncated { need: usize, got: usize },

    #[error("the declared section lengths exceed the frame size")]
    LengthMismatch,

    #[error("section of {0} bytes does not fit the frame's length field")]
    SectionTooLarge(usize),
}
