//! Safe, role-based interface to native security packages.
//!
//! This crate sequences an abstract authentication backend (a [`SecurityProvider`])
//! into a safe API: credentials and contexts are reference-counted handles that are
//! never released under an in-flight call, the handshake is a typed initiator/acceptor
//! state machine, and protected messages travel in self-describing big-endian frames.
//!
//! A typical client session:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use secpkg::{ClientContext, ContextFlags, Credential, CredentialUse, SecurityProvider};
//!
//! fn connect(provider: Arc<dyn SecurityProvider>) -> secpkg::Result<()> {
//!     let credential = Arc::new(Credential::acquire(
//!         provider,
//!         "Negotiate",
//!         CredentialUse::Outbound,
//!         None,
//!     )?);
//!
//!     let mut client = ClientContext::new(
//!         credential,
//!         Some("host/server.example.com"),
//!         ContextFlags::CONFIDENTIALITY | ContextFlags::INTEGRITY | ContextFlags::MUTUAL_AUTH,
//!     );
//!
//!     let mut step = client.init(None)?;
//!     while !step.is_complete() {
//!         let reply = exchange_with_server(step.token.as_deref());
//!         step = client.init(reply.as_deref())?;
//!     }
//!
//!     let sealed = client.encrypt(b"hello")?;
//!     send(&sealed);
//!     Ok(())
//! }
//! # fn exchange_with_server(_: Option<&[u8]>) -> Option<Vec<u8>> { None }
//! # fn send(_: &[u8]) {}
//! ```

pub mod buffer;
pub mod context;
pub mod credential;
pub mod error;
pub mod frame;
pub mod handle;
pub mod package;
pub mod provider;
pub mod status;

pub use buffer::{BufferSet, BufferType, SecureBuffer};
pub use context::{
    ClientContext, ContextFlags, ContextState, HandshakeStep, ImpersonationHandle,
    SecurityContext, ServerContext, SignatureVerification,
};
pub use credential::{AuthIdentity, Credential, CredentialUse, Secret};
pub use error::{ContractError, Error, FrameError, Result};
pub use frame::{EncryptedFrame, SignedFrame};
pub use handle::{HandleRef, NativeHandle, RawHandle};
pub use package::{ContextSizes, PackageCapabilities, PackageInfo};
pub use provider::{
    AcquiredCredential, ContextStringAttribute, PackageResult, SecurityProvider, StepResult,
};
pub use status::SecurityStatus;
