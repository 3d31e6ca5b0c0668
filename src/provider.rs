//! The interface this crate consumes from the authentication backend.
//!
//! A [`SecurityProvider`] wraps a platform security package (Kerberos-like,
//! NTLM-like, a negotiation meta-package). It performs the actual cryptographic
//! authentication; this crate only sequences it. Tokens are opaque blobs, handles are
//! opaque [`RawHandle`]s, and buffer exchange happens through [`BufferSet`]s whose
//! used lengths the provider fills in before returning.

use time::OffsetDateTime;

use crate::buffer::BufferSet;
use crate::context::ContextFlags;
use crate::credential::{AuthIdentity, CredentialUse};
use crate::handle::RawHandle;
use crate::package::{ContextSizes, PackageInfo};
use crate::status::SecurityStatus;

/// Result of one provider call: any non-success status travels as the error value.
pub type PackageResult<T> = std::result::Result<T, SecurityStatus>;

/// Output of a successful credential acquisition.
#[derive(Debug, Clone)]
pub struct AcquiredCredential {
    pub handle: RawHandle,
    pub expiry: OffsetDateTime,
}

/// Output of a successful handshake step.
///
/// `status` is `Ok` when the provider considers the context established, or
/// `ContinueNeeded` when another token round is required. `handle` is the context
/// handle — on the first step of a side it is freshly created, afterwards it echoes
/// the existing one.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: SecurityStatus,
    pub handle: RawHandle,
    pub flags: ContextFlags,
    pub expiry: OffsetDateTime,
}

/// String attributes queryable on an established context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStringAttribute {
    /// Name of the authenticating authority.
    Authority,
    /// Logon name of the authenticated peer.
    Names,
}

/// The operations this crate needs from a security package.
///
/// Implementations must be callable from multiple threads; the crate brackets every
/// call that passes a handle with an in-flight reference on the corresponding
/// [`NativeHandle`](crate::NativeHandle), so a handle passed to any method here is
/// guaranteed not to be deleted for the duration of the call.
pub trait SecurityProvider: Send + Sync {
    fn package_info(&self, package: &str) -> PackageResult<PackageInfo>;

    fn acquire_credential(
        &self,
        package: &str,
        usage: CredentialUse,
        identity: Option<&AuthIdentity>,
    ) -> PackageResult<AcquiredCredential>;

    /// Initiator-side handshake step. `context` is `None` exactly on the first call.
    /// The produced token (if any) lands in the `output` set's `Token` buffer, with
    /// its used length set accordingly; zero used bytes means "no token this round".
    fn initialize_context(
        &self,
        credential: RawHandle,
        context: Option<RawHandle>,
        target: Option<&str>,
        requested: ContextFlags,
        input: Option<&mut BufferSet<'_>>,
        output: &mut BufferSet<'_>,
    ) -> PackageResult<StepResult>;

    /// Acceptor-side handshake step; always keyed off the peer's token.
    fn accept_context(
        &self,
        credential: RawHandle,
        context: Option<RawHandle>,
        input: &mut BufferSet<'_>,
        requested: ContextFlags,
        output: &mut BufferSet<'_>,
    ) -> PackageResult<StepResult>;

    fn query_sizes(&self, context: RawHandle) -> PackageResult<ContextSizes>;

    /// `Ok(None)` when the package cannot answer the query for this attribute.
    fn query_string(
        &self,
        context: RawHandle,
        attribute: ContextStringAttribute,
    ) -> PackageResult<Option<String>>;

    /// Resolved principal name behind a credential; `Ok(None)` when unsupported.
    fn query_credential_name(&self, credential: RawHandle) -> PackageResult<Option<String>>;

    fn query_session_key(&self, context: RawHandle) -> PackageResult<Vec<u8>>;

    fn encrypt_message(&self, context: RawHandle, message: &mut BufferSet<'_>) -> PackageResult<()>;

    fn decrypt_message(&self, context: RawHandle, message: &mut BufferSet<'_>) -> PackageResult<()>;

    fn make_signature(&self, context: RawHandle, message: &mut BufferSet<'_>) -> PackageResult<()>;

    /// `Err(MessageAltered)` and `Err(OutOfSequence)` are expected outcomes here and
    /// are downgraded to data by the caller; everything else is a hard failure.
    fn verify_signature(&self, context: RawHandle, message: &mut BufferSet<'_>)
        -> PackageResult<()>;

    fn impersonate(&self, context: RawHandle) -> PackageResult<()>;

    fn revert(&self, context: RawHandle) -> PackageResult<()>;

    fn delete_context(&self, context: RawHandle);

    fn free_credential(&self, credential: RawHandle);
}
