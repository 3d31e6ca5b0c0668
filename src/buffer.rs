use crate::error::{ContractError, Result};

/// Semantic tag of a [`SecureBuffer`] inside a buffer set. The provider dispatches on
/// the tag, not on position: a trailer travels in a `Token` buffer, application bytes
/// in `Data`, cipher padding in `Padding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Empty,
    Data,
    Token,
    Padding,
}

/// A byte buffer handed to the provider as part of a [`BufferSet`].
///
/// The provider does not know in advance how much of a buffer it will fill (a
/// signature buffer is sized to the maximum possible signature but may only need a
/// fraction of it), so each buffer carries a *used* length distinct from its capacity.
/// `used` starts equal to the capacity and is overwritten by the provider through
/// [`set_used`](SecureBuffer::set_used) once the call completes.
#[derive(Debug, Clone)]
pub struct SecureBuffer {
    data: Vec<u8>,
    buffer_type: BufferType,
    used: usize,
}

impl SecureBuffer {
    /// A zeroed buffer of the given capacity, for the provider to write into.
    pub fn with_capacity(capacity: usize, buffer_type: BufferType) -> Self {
        Self {
            data: vec![0; capacity],
            buffer_type,
            used: capacity,
        }
    }

    /// Wraps existing bytes, e.g. a received token or a plaintext copy.
    pub fn from_vec(data: Vec<u8>, buffer_type: BufferType) -> Self {
        let used = data.len();
        Self {
            data,
            buffer_type,
            used,
        }
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes the provider actually produced (or, before the call, the
    /// capacity).
    pub fn used(&self) -> usize {
        self.used
    }

    /// The used prefix of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// The whole capacity, for the provider to write into.
    pub fn full_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Records how many bytes of the buffer the provider consumed or produced.
    pub fn set_used(&mut self, used: usize) -> Result<()> {
        if used > self.data.len() {
            return Err(ContractError::BufferOverrun {
                used,
                capacity: self.data.len(),
            }
            .into());
        }
        self.used = used;
        Ok(())
    }

    /// Consumes the buffer, truncated to its used length.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.used);
        self.data
    }
}

/// An ordered set of [`SecureBuffer`]s presented to the provider as a single call
/// argument.
///
/// The set borrows its buffers for the duration of exactly one provider call; the
/// borrow scope *is* the call scope, so the set cannot outlive the buffers or be
/// stashed across calls. Used lengths written by the provider land directly in the
/// constituent buffers and remain readable after the set is dropped.
pub struct BufferSet<'a> {
    buffers: &'a mut [SecureBuffer],
}

impl<'a> BufferSet<'a> {
    pub fn new(buffers: &'a mut [SecureBuffer]) -> Self {
        debug_assert!(!buffers.is_empty(), "a buffer set carries at least one buffer");
        Self { buffers }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecureBuffer> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SecureBuffer> {
        self.buffers.iter_mut()
    }

    /// The first buffer of the given type. Providers use this to locate their inputs;
    /// a missing buffer means the caller assembled the set incorrectly.
    pub fn find(&self, buffer_type: BufferType) -> Result<&SecureBuffer> {
        self.buffers
            .iter()
            .find(|b| b.buffer_type() == buffer_type)
            .ok_or_else(|| ContractError::MissingBuffer(buffer_type).into())
    }

    pub fn find_mut(&mut self, buffer_type: BufferType) -> Result<&mut SecureBuffer> {
        self.buffers
            .iter_mut()
            .find(|b| b.buffer_type() == buffer_type)
            .ok_or_else(|| ContractError::MissingBuffer(buffer_type).into())
    }
}
