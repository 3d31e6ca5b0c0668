use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

/// Status codes reported by a security package.
///
/// The values follow the SSPI `SECURITY_STATUS` convention: success codes have the
/// high bit clear, failure codes have it set. Tokens, handles and buffers produced by
/// the package are opaque to this crate, but the status codes are part of the contract
/// and are surfaced unchanged inside [`Error::Package`](crate::Error::Package).
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Ok = 0,
    ContinueNeeded = 0x0009_0312,
    CompleteNeeded = 0x0009_0313,
    CompleteAndContinue = 0x0009_0314,

    OutOfMemory = 0x8009_0300,
    InvalidHandle = 0x8009_0301,
    Unsupported = 0x8009_0302,
    TargetUnknown = 0x8009_0303,
    InternalError = 0x8009_0304,
    PackageNotFound = 0x8009_0305,
    NotOwned = 0x8009_0306,
    InvalidToken = 0x8009_0308,
    QopNotSupported = 0x8009_030A,
    NoImpersonation = 0x8009_030B,
    LogonDenied = 0x8009_030C,
    UnknownCredentials = 0x8009_030D,
    NoCredentials = 0x8009_030E,
    MessageAltered = 0x8009_030F,
    OutOfSequence = 0x8009_0310,
    NoAuthenticatingAuthority = 0x8009_0311,
    ContextExpired = 0x8009_0317,
    IncompleteMessage = 0x8009_0318,
    IncompleteCredentials = 0x8009_0320,
    BufferTooSmall = 0x8009_0321,
    WrongPrincipal = 0x8009_0322,
    TimeSkew = 0x8009_0324,
    SecurityQosFailed = 0x8009_0332,
    UnfinishedContextDeleted = 0x8009_0333,
}

impl SecurityStatus {
    /// Maps a raw status code onto the known set. Unknown codes yield `None`; callers
    /// that must carry them anyway should fall back to [`SecurityStatus::InternalError`].
    pub fn from_code(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    pub fn code(self) -> u32 {
        self.to_u32().unwrap_or(0x8009_0304)
    }

    /// Whether the status denotes a failed package call. `ContinueNeeded` and friends
    /// are progress reports, not failures.
    pub fn is_error(self) -> bool {
        self.code() & 0x8000_0000 != 0
    }

    /// Static human-readable classification of the status.
    pub fn description(self) -> &'static str {
        match self {
            SecurityStatus::Ok => "the operation completed successfully",
            SecurityStatus::ContinueNeeded => "the token must be sent to the peer and a reply awaited",
            SecurityStatus::CompleteNeeded => "the token must be completed before use",
            SecurityStatus::CompleteAndContinue => "complete the token, then send it to the peer",
            SecurityStatus::OutOfMemory => "the security package ran out of memory",
            SecurityStatus::InvalidHandle => "the handle is not valid for this operation",
            SecurityStatus::Unsupported => "the operation is not supported by this security package",
            SecurityStatus::TargetUnknown => "the target principal is unknown",
            SecurityStatus::InternalError => "the security package failed internally",
            SecurityStatus::PackageNotFound => "no security package by that name exists",
            SecurityStatus::NotOwned => "the caller does not own the referenced resource",
            SecurityStatus::InvalidToken => "the token is malformed or was not produced by the peer",
            SecurityStatus::QopNotSupported => "the requested quality of protection is not supported",
            SecurityStatus::NoImpersonation => "impersonation could not be performed",
            SecurityStatus::LogonDenied => "the logon was denied",
            SecurityStatus::UnknownCredentials => "the supplied credentials were not recognized",
            SecurityStatus::NoCredentials => "no credentials are available for the identity",
            SecurityStatus::MessageAltered => "the message has been altered in transit",
            SecurityStatus::OutOfSequence => "the message arrived out of sequence",
            SecurityStatus::NoAuthenticatingAuthority => "no authority could be contacted for authentication",
            SecurityStatus::ContextExpired => "the security context has expired",
            SecurityStatus::IncompleteMessage => "the message is incomplete; more data is required",
            SecurityStatus::IncompleteCredentials => "the credentials are incomplete",
            SecurityStatus::BufferTooSmall => "a supplied buffer is too small",
            SecurityStatus::WrongPrincipal => "the peer principal did not match the expected one",
            SecurityStatus::TimeSkew => "the clocks of the two parties are too far apart",
            SecurityStatus::SecurityQosFailed => "the negotiated quality of protection was not honored",
            SecurityStatus::UnfinishedContextDeleted => "a partially established context was deleted",
        }
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.description(), self.code())
    }
}
