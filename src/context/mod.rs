//! Security-context lifecycle and message protection.
//!
//! Both handshake roles share one core: consume a peer token, produce an own token,
//! report continue-or-done. [`ClientContext`] and [`ServerContext`] implement the two
//! ends of that ping-pong; once a side reports completion the shared
//! [`SecurityContext`] unlocks encrypt/decrypt/sign/verify and the identity queries.

mod client;
mod server;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bitflags::bitflags;
use time::OffsetDateTime;
use tracing::debug;

pub use self::client::ClientContext;
pub use self::server::{ImpersonationHandle, ServerContext};

use crate::buffer::{BufferSet, BufferType, SecureBuffer};
use crate::credential::Credential;
use crate::error::{ContractError, Error, Result};
use crate::frame::{EncryptedFrame, SignedFrame};
use crate::handle::{HandleRef, NativeHandle, RawHandle};
use crate::package::ContextSizes;
use crate::provider::{ContextStringAttribute, SecurityProvider, StepResult};
use crate::status::SecurityStatus;

bitflags! {
    /// Properties requested for (and, after establishment, granted to) a context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const CONNECTION = 0x800;
        const STREAM = 0x8000;
        const INTEGRITY = 0x1_0000;
        const IDENTIFY = 0x2_0000;
    }
}

/// Lifecycle of a security context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No handshake step has run yet.
    Uninitialized,
    /// Mid-handshake; more token rounds are expected.
    Continuing,
    /// The handshake completed; message protection is available.
    Established,
    /// Terminal.
    Disposed,
}

/// Outcome of one handshake step.
///
/// `status` is [`SecurityStatus::Ok`] when this side considers the exchange complete,
/// or [`SecurityStatus::ContinueNeeded`] when the peer's reply is expected. The token,
/// when present, must be delivered to the peer; a step may legitimately produce no
/// token in either state.
#[derive(Clone)]
pub struct HandshakeStep {
    pub status: SecurityStatus,
    pub token: Option<Vec<u8>>,
}

impl HandshakeStep {
    pub fn is_complete(&self) -> bool {
        self.status == SecurityStatus::Ok
    }
}

impl fmt::Debug for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeStep")
            .field("status", &self.status)
            .field("token_len", &self.token.as_ref().map(Vec::len))
            .finish()
    }
}

/// Result of verifying a signed frame. A failed signature is a normal outcome, not an
/// error; `message` carries the recovered plaintext only when the signature held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureVerification {
    pub valid: bool,
    pub message: Option<Vec<u8>>,
}

/// State shared by both handshake roles: the owned context handle, the lifecycle
/// state, and the message-protection operations available once established.
///
/// Message protection may be called concurrently from multiple threads; every
/// operation takes a transient reference on the context handle for the duration of
/// its provider call, so a concurrent dispose can never free the native resource
/// under an in-flight call.
pub struct SecurityContext {
    provider: Arc<dyn SecurityProvider>,
    credential: Arc<Credential>,
    handle: Arc<NativeHandle>,
    state: Mutex<ContextState>,
    flags: Mutex<ContextFlags>,
    expiry: Mutex<Option<OffsetDateTime>>,
}

impl SecurityContext {
    fn new(credential: Arc<Credential>) -> Self {
        Self {
            provider: Arc::clone(credential.provider()),
            credential,
            handle: Arc::new(NativeHandle::new()),
            state: Mutex::new(ContextState::Uninitialized),
            flags: Mutex::new(ContextFlags::empty()),
            expiry: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_established(&self) -> bool {
        self.state() == ContextState::Established
    }

    /// UTC expiry negotiated during the handshake; `None` until established.
    pub fn expiry(&self) -> Option<OffsetDateTime> {
        *self.expiry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flags actually granted by the provider, populated as the handshake proceeds.
    pub fn negotiated_flags(&self) -> ContextFlags {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn credential(&self) -> &Arc<Credential> {
        &self.credential
    }

    /// Encrypts `input` with the context's session key and packs it into the
    /// encrypted wire frame.
    ///
    /// Trailer and padding buffers are sized from a fresh size query; the provider
    /// reports how much of each it actually used, and only the used prefixes travel.
    pub fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.ensure_established()?;
        let guard = self.guard()?;
        let sizes = self.query_sizes(&guard)?;

        let mut buffers = [
            SecureBuffer::with_capacity(sizes.security_trailer as usize, BufferType::Token),
            SecureBuffer::from_vec(input.to_vec(), BufferType::Data),
            SecureBuffer::with_capacity(sizes.block as usize, BufferType::Padding),
        ];
        {
            let mut message = BufferSet::new(&mut buffers);
            self.provider
                .encrypt_message(guard.raw(), &mut message)
                .map_err(|status| Error::package("encrypt_message", status))?;
        }

        let [trailer, data, padding] = &buffers;
        let frame = EncryptedFrame {
            trailer: trailer.data(),
            data: data.data(),
            padding: padding.data(),
        };
        Ok(frame.encode()?)
    }

    /// Decrypts a frame produced by the peer's `encrypt`.
    ///
    /// The frame is validated structurally before any provider call: it must be long
    /// enough for the header plus the current minimum trailer, and its declared
    /// section lengths must fit the physical buffer.
    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.ensure_established()?;
        let guard = self.guard()?;
        let sizes = self.query_sizes(&guard)?;

        let frame = EncryptedFrame::decode(input, sizes.security_trailer as usize)?;

        let mut buffers = [
            SecureBuffer::from_vec(frame.trailer.to_vec(), BufferType::Token),
            SecureBuffer::from_vec(frame.data.to_vec(), BufferType::Data),
            SecureBuffer::from_vec(frame.padding.to_vec(), BufferType::Padding),
        ];
        {
            let mut message = BufferSet::new(&mut buffers);
            self.provider
                .decrypt_message(guard.raw(), &mut message)
                .map_err(|status| Error::package("decrypt_message", status))?;
        }

        // The provider reports the true plaintext length, which may be shorter than
        // the ciphertext section.
        let [_, data, _] = buffers;
        Ok(data.into_vec())
    }

    /// Signs `message` with the context's session key and packs message plus
    /// signature into the signed wire frame.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.ensure_established()?;
        let guard = self.guard()?;
        let sizes = self.query_sizes(&guard)?;

        let mut buffers = [
            SecureBuffer::from_vec(message.to_vec(), BufferType::Data),
            SecureBuffer::with_capacity(sizes.max_signature as usize, BufferType::Token),
        ];
        {
            let mut set = BufferSet::new(&mut buffers);
            self.provider
                .make_signature(guard.raw(), &mut set)
                .map_err(|status| Error::package("make_signature", status))?;
        }

        let [data, signature] = &buffers;
        let frame = SignedFrame {
            message: data.data(),
            signature: signature.data(),
        };
        Ok(frame.encode()?)
    }

    /// Verifies a signed frame.
    ///
    /// A provider verdict of "message altered" or "out of sequence" is an expected,
    /// recoverable outcome and is reported as `valid == false`; any other non-success
    /// status is a hard error.
    pub fn verify(&self, signed: &[u8]) -> Result<SignatureVerification> {
        self.ensure_established()?;
        let guard = self.guard()?;

        let frame = SignedFrame::decode(signed)?;

        let mut buffers = [
            SecureBuffer::from_vec(frame.message.to_vec(), BufferType::Data),
            SecureBuffer::from_vec(frame.signature.to_vec(), BufferType::Token),
        ];
        let outcome = {
            let mut set = BufferSet::new(&mut buffers);
            self.provider.verify_signature(guard.raw(), &mut set)
        };

        match outcome {
            Ok(()) => {
                let [data, _] = buffers;
                Ok(SignatureVerification {
                    valid: true,
                    message: Some(data.into_vec()),
                })
            }
            Err(SecurityStatus::MessageAltered) | Err(SecurityStatus::OutOfSequence) => {
                debug!("signature verification rejected the message");
                Ok(SignatureVerification {
                    valid: false,
                    message: None,
                })
            }
            Err(status) => Err(Error::package("verify_signature", status)),
        }
    }

    /// Logon name of the authenticated peer, or `None` if the package cannot say.
    pub fn user_name(&self) -> Result<Option<String>> {
        self.query_context_string(ContextStringAttribute::Names)
    }

    /// Name of the authenticating authority, or `None` if the package cannot say.
    pub fn authority_name(&self) -> Result<Option<String>> {
        self.query_context_string(ContextStringAttribute::Authority)
    }

    /// The negotiated session key, for callers that need it for out-of-band HMACs.
    pub fn session_key(&self) -> Result<Vec<u8>> {
        self.ensure_established()?;
        let guard = self.guard()?;
        self.provider
            .query_session_key(guard.raw())
            .map_err(|status| Error::package("query_session_key", status))
    }

    fn query_context_string(&self, attribute: ContextStringAttribute) -> Result<Option<String>> {
        self.ensure_established()?;
        let guard = self.guard()?;
        match self.provider.query_string(guard.raw(), attribute) {
            Ok(value) => Ok(value),
            Err(SecurityStatus::Unsupported) => Ok(None),
            Err(status) => Err(Error::package("query_string", status)),
        }
    }

    fn ensure_established(&self) -> Result<()> {
        match self.state() {
            ContextState::Established => Ok(()),
            ContextState::Disposed => Err(ContractError::Disposed.into()),
            _ => Err(ContractError::NotEstablished.into()),
        }
    }

    fn guard(&self) -> Result<HandleRef> {
        Ok(self.handle.acquire()?)
    }

    fn query_sizes(&self, guard: &HandleRef) -> Result<ContextSizes> {
        self.provider
            .query_sizes(guard.raw())
            .map_err(|status| Error::package("query_sizes", status))
    }

    /// Records the outcome of a handshake step: negotiated flags, expiry, and the
    /// continue/established transition.
    fn record_step(&self, result: &StepResult) {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner) = result.flags;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if result.status == SecurityStatus::Ok {
            *state = ContextState::Established;
            *self.expiry.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.expiry);
            debug!(expiry = %result.expiry, "security context established");
        } else {
            *state = ContextState::Continuing;
        }
    }

    /// Stores the context handle produced by the first step. Returns `false` when the
    /// context was disposed while the step was in flight; the caller then owns the
    /// fresh native resource and must release it.
    fn adopt_handle(&self, raw: RawHandle) -> bool {
        self.handle.set(raw)
    }

    /// Marks the context disposed and requests release of its handle. Idempotent; the
    /// actual `delete_context` is deferred until the last in-flight call finishes.
    fn dispose(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ContextState::Disposed {
                return;
            }
            *state = ContextState::Disposed;
        }
        let provider = Arc::clone(&self.provider);
        self.handle
            .request_close(Box::new(move |raw: RawHandle| provider.delete_context(raw)));
    }
}

impl Drop for SecurityContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("state", &self.state())
            .field("flags", &self.negotiated_flags())
            .field("handle", &self.handle)
            .finish()
    }
}
