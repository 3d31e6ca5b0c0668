use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ContractError, Error, Result};
use crate::handle::{HandleRef, NativeHandle, RawHandle};
use crate::package::PackageInfo;
use crate::provider::SecurityProvider;
use crate::status::SecurityStatus;

/// Wrapper that keeps credential secrets out of logs and zeroizes them on drop.
#[derive(Zeroize, ZeroizeOnDrop, Clone, PartialEq, Eq, Default)]
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(inner: T) -> Self {
        Self(inner)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(secret)")
    }
}

impl<T: Zeroize> AsRef<T> for Secret<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(inner: T) -> Self {
        Self(inner)
    }
}

/// An explicit identity to authenticate as. Absence of an `AuthIdentity` means "the
/// current process identity".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub username: String,
    pub domain: Option<String>,
    pub password: Secret<String>,
}

/// Which side of the handshake a credential will serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialUse {
    /// Acceptor (server) side.
    Inbound,
    /// Initiator (client) side.
    Outbound,
    /// Usable for either role.
    Both,
}

/// An acquired, package-scoped authentication identity.
///
/// A credential is owned by whoever acquired it; contexts hold a shared, non-owning
/// reference (`Arc<Credential>`) and never dispose it. The handle is read-only after
/// acquisition, so any number of contexts may use it concurrently.
pub struct Credential {
    provider: Arc<dyn SecurityProvider>,
    package: PackageInfo,
    usage: CredentialUse,
    handle: Arc<NativeHandle>,
    expiry: OffsetDateTime,
}

impl Credential {
    /// Acquires a credential from `package` for the given role.
    ///
    /// Acquisition talks to the local authority and can fail for bad credentials, but
    /// a package is also free to defer validation until the first handshake step — a
    /// successful acquisition is not proof the identity is valid.
    pub fn acquire(
        provider: Arc<dyn SecurityProvider>,
        package: &str,
        usage: CredentialUse,
        identity: Option<AuthIdentity>,
    ) -> Result<Self> {
        let package = provider
            .package_info(package)
            .map_err(|status| Error::package("package_info", status))?;

        let acquired = provider
            .acquire_credential(&package.name, usage, identity.as_ref())
            .map_err(|status| Error::package("acquire_credential", status))?;

        debug!(package = %package.name, ?usage, "acquired credential");

        let handle = Arc::new(NativeHandle::new());
        handle.set(acquired.handle);

        Ok(Self {
            provider,
            package,
            usage,
            handle,
            expiry: acquired.expiry,
        })
    }

    pub fn package(&self) -> &PackageInfo {
        &self.package
    }

    pub fn usage(&self) -> CredentialUse {
        self.usage
    }

    /// UTC instant at which the credential stops being usable.
    pub fn expiry(&self) -> Result<OffsetDateTime> {
        if !self.handle.is_valid() {
            return Err(ContractError::Disposed.into());
        }
        Ok(self.expiry)
    }

    /// The resolved principal name behind this credential, or `None` if the package
    /// does not support the query.
    pub fn principal_name(&self) -> Result<Option<String>> {
        let guard = self.acquire_handle()?;
        match self.provider.query_credential_name(guard.raw()) {
            Ok(name) => Ok(name),
            Err(SecurityStatus::Unsupported) => Ok(None),
            Err(status) => Err(Error::package("query_credential_name", status)),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn SecurityProvider> {
        &self.provider
    }

    /// Takes an in-flight reference for one provider call made on behalf of a context.
    pub(crate) fn acquire_handle(&self) -> Result<HandleRef> {
        self.handle
            .acquire()
            .map_err(|_| ContractError::Disposed.into())
    }

    /// Releases the credential handle. Idempotent; actual release is deferred while
    /// any call is still in flight. All later operations fail with a disposed error.
    pub fn dispose(&self) {
        let provider = Arc::clone(&self.provider);
        self.handle
            .request_close(Box::new(move |raw: RawHandle| provider.free_credential(raw)));
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("package", &self.package.name)
            .field("usage", &self.usage)
            .field("expiry", &self.expiry)
            .field("handle", &self.handle)
            .finish()
    }
}
