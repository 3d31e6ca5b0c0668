use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::buffer::{BufferSet, BufferType, SecureBuffer};
use crate::credential::Credential;
use crate::error::{ContractError, Error, Result};
use crate::handle::{HandleRef, NativeHandle};
use crate::package::PackageCapabilities;
use crate::provider::SecurityProvider;

use super::{ContextFlags, ContextState, HandshakeStep, SecurityContext, SignatureVerification};

/// The acceptor side of a security-context handshake.
///
/// A server never speaks first: every [`accept`](ServerContext::accept) step consumes
/// a token produced by the initiator. Once established, the server side can
/// additionally impersonate the authenticated peer.
pub struct ServerContext {
    context: SecurityContext,
    requested: ContextFlags,
    impersonating: Arc<AtomicBool>,
}

impl ServerContext {
    pub fn new(credential: Arc<Credential>, requested: ContextFlags) -> Self {
        Self {
            context: SecurityContext::new(credential),
            requested,
            impersonating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs one acceptor handshake step on the initiator's token.
    #[instrument(level = "debug", ret, skip_all)]
    pub fn accept(&mut self, peer_token: &[u8]) -> Result<HandshakeStep> {
        match self.context.state() {
            ContextState::Disposed => return Err(ContractError::Disposed.into()),
            ContextState::Established => return Err(ContractError::HandshakeComplete.into()),
            _ => {}
        }

        let credential_guard = self.context.credential().acquire_handle()?;
        let existing = match self.context.state() {
            ContextState::Uninitialized => None,
            _ => Some(self.context.guard()?),
        };

        let max_token = self.context.credential().package().max_token_len as usize;
        let mut input_buffers = [SecureBuffer::from_vec(peer_token.to_vec(), BufferType::Token)];
        let mut output_buffers = [SecureBuffer::with_capacity(max_token, BufferType::Token)];

        let result = {
            let mut input = BufferSet::new(&mut input_buffers);
            let mut output = BufferSet::new(&mut output_buffers);
            self.context.provider.accept_context(
                credential_guard.raw(),
                existing.as_ref().map(HandleRef::raw),
                &mut input,
                self.requested,
                &mut output,
            )
        }
        .map_err(|status| Error::package("accept_context", status))?;

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

    /// Whether the underlying package can impersonate at all.
    pub fn supports_impersonation(&self) -> bool {
        self.context
            .credential()
            .package()
            .capabilities
            .contains(PackageCapabilities::IMPERSONATION)
    }

    /// Switches the calling thread to the authenticated peer's identity.
    ///
    /// At most one impersonation may be active per context; the returned handle
    /// reverts it, on [`revert`](ImpersonationHandle::revert) or on drop, whichever
    /// comes first. Disposing the context while impersonating also reverts.
    #[instrument(level = "debug", skip_all)]
    pub fn impersonate(&self) -> Result<ImpersonationHandle> {
        self.context.ensure_established()?;
        if !self.supports_impersonation() {
            return Err(ContractError::ImpersonationUnsupported.into());
        }
        if self
            .impersonating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ContractError::AlreadyImpersonating.into());
        }

        let outcome = self
            .context
            .guard()
            .and_then(|guard| {
                self.context
                    .provider
                    .impersonate(guard.raw())
                    .map_err(|status| Error::package("impersonate", status))
            });
        if let Err(err) = outcome {
            self.impersonating.store(false, Ordering::SeqCst);
            return Err(err);
        }

        Ok(ImpersonationHandle {
            provider: Arc::clone(&self.context.provider),
            handle: Arc::clone(&self.context.handle),
            active: Arc::clone(&self.impersonating),
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

    /// Releases the native context, reverting any active impersonation first so the
    /// thread never keeps a borrowed identity past the context's life.
    pub fn dispose(&self) {
        revert_impersonation(&self.context.provider, &self.context.handle, &self.impersonating);
        self.context.dispose();
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("requested", &self.requested)
            .field("impersonating", &self.impersonating.load(Ordering::SeqCst))
            .field("context", &self.context)
            .finish()
    }
}

/// Scoped witness of an active impersonation.
///
/// Dropping the handle reverts the thread to its own identity; [`revert`] does the
/// same eagerly. The revert happens exactly once no matter how many of the handle,
/// the context dispose, and the context drop race each other.
///
/// [`revert`]: ImpersonationHandle::revert
pub struct ImpersonationHandle {
    provider: Arc<dyn SecurityProvider>,
    handle: Arc<NativeHandle>,
    active: Arc<AtomicBool>,
}

impl ImpersonationHandle {
    /// Reverts to the process identity now instead of at drop.
    pub fn revert(self) {
        // Drop does the work.
    }
}

impl Drop for ImpersonationHandle {
    fn drop(&mut self) {
        revert_impersonation(&self.provider, &self.handle, &self.active);
    }
}

impl std::fmt::Debug for ImpersonationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonationHandle")
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

/// Reverts an impersonation if (and only if) one is active. The atomic swap elects a
/// single winner among racing callers; losing callers return without touching the
/// provider.
fn revert_impersonation(
    provider: &Arc<dyn SecurityProvider>,
    handle: &Arc<NativeHandle>,
    active: &AtomicBool,
) {
    if !active.swap(false, Ordering::SeqCst) {
        return;
    }
    match handle.acquire() {
        Ok(guard) => {
            if let Err(status) = provider.revert(guard.raw()) {
                warn!(%status, "failed to revert impersonation");
            }
        }
        // Context handle already released; there is no identity left to revert.
        Err(_) => {}
    }
}
