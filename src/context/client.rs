use std::sync::Arc;

use time::OffsetDateTime;
use tracing::instrument;

use crate::buffer::{BufferSet, BufferType, SecureBuffer};
use crate::credential::Credential;
use crate::error::{ContractError, Error, Result};
use crate::handle::HandleRef;

use super::{ContextFlags, ContextState, HandshakeStep, SecurityContext, SignatureVerification};

/// The initiator side of a security-context handshake.
///
/// A client drives the token exchange: it produces the first token out of nothing,
/// then feeds every reply from the acceptor back into [`init`](ClientContext::init)
/// until a step reports completion.
pub struct ClientContext {
    context: SecurityContext,
    target: Option<String>,
    requested: ContextFlags,
}

impl ClientContext {
    /// Creates an initiator context over `credential`, aimed at `target` (the
    /// service principal to authenticate to, when the package needs one).
    ///
    /// No provider call happens here; the native context comes into existence on the
    /// first [`init`](ClientContext::init).
    pub fn new(
        credential: Arc<Credential>,
        target: Option<&str>,
        requested: ContextFlags,
    ) -> Self {
        Self {
            context: SecurityContext::new(credential),
            target: target.map(str::to_owned),
            requested,
        }
    }

    /// Runs one initiator handshake step.
    ///
    /// The first call must pass no peer token; every later call must pass the
    /// acceptor's reply. The returned step carries the token to deliver to the
    /// acceptor, if this round produced one, and reports whether the exchange is
    /// complete from this side's point of view.
    #[instrument(level = "debug", ret, skip_all)]
    pub fn init(&mut self, peer_token: Option<&[u8]>) -> Result<HandshakeStep> {
        match self.context.state() {
            ContextState::Disposed => return Err(ContractError::Disposed.into()),
            ContextState::Established => return Err(ContractError::HandshakeComplete.into()),
            ContextState::Uninitialized if peer_token.is_some() => {
                return Err(ContractError::UnexpectedPeerToken.into());
            }
            ContextState::Continuing if peer_token.is_none() => {
                return Err(ContractError::MissingPeerToken.into());
            }
            _ => {}
        }

        let credential_guard = self.context.credential().acquire_handle()?;
        let existing = match self.context.state() {
            ContextState::Uninitialized => None,
            _ => Some(self.context.guard()?),
        };

        let max_token = self.context.credential().package().max_token_len as usize;
        let mut output_buffers = [SecureBuffer::with_capacity(max_token, BufferType::Token)];
        let mut input_buffers;

        let result = {
            let mut output = BufferSet::new(&mut output_buffers);
            let context_handle = existing.as_ref().map(HandleRef::raw);
            match peer_token {
                Some(token) => {
                    input_buffers = [SecureBuffer::from_vec(token.to_vec(), BufferType::Token)];
                    let mut input = BufferSet::new(&mut input_buffers);
                    self.context.provider.initialize_context(
                        credential_guard.raw(),
                        context_handle,
                        self.target.as_deref(),
                        self.requested,
                        Some(&mut input),
                        &mut output,
                    )
                }
                None => self.context.provider.initialize_context(
                    credential_guard.raw(),
                    context_handle,
                    self.target.as_deref(),
                    self.requested,
                    None,
                    &mut output,
                ),
            }
        }
        .map_err(|status| Error::package("initialize_context", status))?;

        if existing.is_none() && !self.context.adopt_handle(result.handle) {
            // Disposed while the first step was in flight; the fresh native context
            // is ours to release.
            self.context.provider.delete_context(result.handle);
            return Err(ContractError::Disposed.into());
        }
        self.context.record_step(&result);

        let [token_buffer] = output_buffers;
        let token = (token_buffer.used() > 0).then(|| token_buffer.into_vec());
        Ok(HandshakeStep {
            status: result.status,
            token,
        })
    }

    pub fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.context.encrypt(input)
    }

    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.context.decrypt(input)
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.context.sign(message)
    }

    pub fn verify(&self, signed: &[u8]) -> Result<SignatureVerification> {
        self.context.verify(signed)
    }

    pub fn user_name(&self) -> Result<Option<String>> {
        self.context.user_name()
    }

    pub fn authority_name(&self) -> Result<Option<String>> {
        self.context.authority_name()
    }

    pub fn session_key(&self) -> Result<Vec<u8>> {
        self.context.session_key()
    }

    pub fn state(&self) -> ContextState {
        self.context.state()
    }

    pub fn is_established(&self) -> bool {
        self.context.is_established()
    }

    pub fn expiry(&self) -> Option<OffsetDateTime> {
        self.context.expiry()
    }

    pub fn negotiated_flags(&self) -> ContextFlags {
        self.context.negotiated_flags()
    }

    /// The service principal this context was aimed at.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Releases the native context. Idempotent; `Drop` calls this too.
    pub fn dispose(&self) {
        self.context.dispose();
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("target", &self.target)
            .field("requested", &self.requested)
            .field("context", &self.context)
            .finish()
    }
}
