use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ContractError;

/// A raw provider handle: two machine words, opaque to this crate. Provider handles
/// are always this shape regardless of what they refer to (credential or context).
/// A zero value means "not acquired yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub low: u64,
    pub high: u64,
}

impl RawHandle {
    pub const fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }
}

type Disposer = Box<dyn FnOnce(RawHandle) + Send>;

/// Reference-counted liveness wrapper around a [`RawHandle`].
///
/// Every operation that hands the raw handle to the provider must bracket the call
/// with [`acquire`](NativeHandle::acquire); the returned [`HandleRef`] keeps the
/// underlying resource alive for the duration of the call. Disposal is requested via
/// [`request_close`](NativeHandle::request_close) and the actual release is deferred
/// until the last in-flight reference drops. This is the sole serialization mechanism
/// between a release racing an in-use call (for example an impersonation handle being
/// dropped on another thread while the owner is inside `encrypt_message`).
pub struct NativeHandle {
    inner: Mutex<Inner>,
}

struct Inner {
    raw: RawHandle,
    refs: usize,
    close_requested: bool,
    closed: bool,
    disposer: Option<Disposer>,
}

impl NativeHandle {
    /// Creates an invalid (zero) handle. The raw value is written exactly once, by the
    /// acquisition call that produces it.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                raw: RawHandle::default(),
                refs: 0,
                close_requested: false,
                closed: false,
                disposer: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the raw handle produced by an acquisition call.
    ///
    /// Returns `false` when a close was requested while the acquisition was in flight;
    /// in that case the value has not been stored and the caller is responsible for
    /// releasing the fresh resource itself.
    pub fn set(&self, raw: RawHandle) -> bool {
        let mut inner = self.lock();
        if inner.close_requested || inner.closed {
            return false;
        }
        debug_assert!(inner.raw.is_zero(), "native handle must be set exactly once");
        inner.raw = raw;
        true
    }

    /// Whether the handle holds a usable raw value.
    pub fn is_valid(&self) -> bool {
        let inner = self.lock();
        !inner.raw.is_zero() && !inner.close_requested && !inner.closed
    }

    /// Takes an in-flight reference for the duration of one provider call.
    ///
    /// Fails once a close has been requested, or while the handle has not been set;
    /// the caller must then report an invalid-handle error instead of touching the
    /// native resource.
    pub fn acquire(self: &Arc<Self>) -> Result<HandleRef, ContractError> {
        let mut inner = self.lock();
        if inner.close_requested || inner.closed || inner.raw.is_zero() {
            return Err(ContractError::InvalidHandle);
        }
        inner.refs += 1;
        Ok(HandleRef {
            handle: Arc::clone(self),
            raw: inner.raw,
        })
    }

    /// Requests the release of the underlying resource. Idempotent.
    ///
    /// The disposer runs immediately when no references are in flight, otherwise it is
    /// deferred to the drop of the last [`HandleRef`]. A handle that was never set is
    /// closed without invoking the disposer (there is nothing to release).
    pub fn request_close(&self, disposer: Disposer) {
        let mut inner = self.lock();
        if inner.close_requested || inner.closed {
            return;
        }
        inner.close_requested = true;

        if inner.raw.is_zero() {
            inner.closed = true;
            return;
        }

        if inner.refs == 0 {
            inner.closed = true;
            let raw = inner.raw;
            drop(inner);
            disposer(raw);
        } else {
            inner.disposer = Some(disposer);
        }
    }
}

impl Default for NativeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("NativeHandle")
            .field("raw", &inner.raw)
            .field("refs", &inner.refs)
            .field("close_requested", &inner.close_requested)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// An in-flight reference to a [`NativeHandle`]. The raw value is guaranteed to stay
/// alive until this guard is dropped.
#[derive(Debug)]
pub struct HandleRef {
    handle: Arc<NativeHandle>,
    raw: RawHandle,
}

impl HandleRef {
    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        let mut inner = self.handle.lock();
        inner.refs -= 1;
        if inner.refs == 0 && inner.close_requested && !inner.closed {
            inner.closed = true;
            if let Some(disposer) = inner.disposer.take() {
                let raw = inner.raw;
                drop(inner);
                disposer(raw);
            }
        }
    }
}
