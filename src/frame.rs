//! Wire framing for protected messages.
//!
//! Both frames use big-endian, unsigned length fields. Declared lengths are validated
//! against the physical buffer before any section is sliced, so a malformed frame is
//! rejected here and never reaches the provider.

use byteorder::{BigEndian, ByteOrder};

use crate::error::FrameError;

/// `u16 trailerLen | u32 dataLen | u16 paddingLen` header.
pub const ENCRYPTED_HEADER_LEN: usize = 2 + 4 + 2;

/// `u32 messageLen | u16 sigLen` header.
pub const SIGNED_HEADER_LEN: usize = 4 + 2;

/// An encrypted message as it travels on the wire: header, then trailer, data and
/// padding sections back to back. Trailer and padding are provider-defined auxiliary
/// regions; their sizes vary per context and per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedFrame<'a> {
    pub trailer: &'a [u8],
    pub data: &'a [u8],
    pub padding: &'a [u8],
}

impl<'a> EncryptedFrame<'a> {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let trailer_len = section_u16(self.trailer)?;
        let data_len = section_u32(self.data)?;
        let padding_len = section_u16(self.padding)?;

        let mut header = [0u8; ENCRYPTED_HEADER_LEN];
        BigEndian::write_u16(&mut header[0..2], trailer_len);
        BigEndian::write_u32(&mut header[2..6], data_len);
        BigEndian::write_u16(&mut header[6..8], padding_len);

        let mut out = Vec::with_capacity(
            ENCRYPTED_HEADER_LEN + self.trailer.len() + self.data.len() + self.padding.len(),
        );
        out.extend_from_slice(&header);
        out.extend_from_slice(self.trailer);
        out.extend_from_slice(self.data);
        out.extend_from_slice(self.padding);
        Ok(out)
    }

    /// Parses a frame, requiring room for the header plus `min_trailer` bytes (the
    /// context's current security-trailer size; a shorter input cannot possibly hold
    /// an encrypted message).
    pub fn decode(input: &'a [u8], min_trailer: usize) -> Result<Self, FrameError> {
        let need = ENCRYPTED_HEADER_LEN + min_trailer;
        if input.len() < need {
            return Err(FrameError::Truncated {
                need,
                got: input.len(),
            });
        }

        // The reads widen unsigned; a high bit in a length field must not sign-extend.
        let trailer_len = usize::from(BigEndian::read_u16(&input[0..2]));
        let data_len = BigEndian::read_u32(&input[2..6]) as usize;
        let padding_len = usize::from(BigEndian::read_u16(&input[6..8]));

        let body = &input[ENCRYPTED_HEADER_LEN..];
        let total = trailer_len
            .checked_add(data_len)
            .and_then(|n| n.checked_add(padding_len))
            .ok_or(FrameError::LengthMismatch)?;
        if total > body.len() {
            return Err(FrameError::LengthMismatch);
        }

        let (trailer, rest) = body.split_at(trailer_len);
        let (data, rest) = rest.split_at(data_len);
        let padding = &rest[..padding_len];
        Ok(Self {
            trailer,
            data,
            padding,
        })
    }
}

/// A signed message: header, then the plaintext message followed by its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedFrame<'a> {
    pub message: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> SignedFrame<'a> {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let message_len = section_u32(self.message)?;
        let signature_len = section_u16(self.signature)?;

        let mut header = [0u8; SIGNED_HEADER_LEN];
        BigEndian::write_u32(&mut header[0..4], message_len);
        BigEndian::write_u16(&mut header[4..6], signature_len);

        let mut out =
            Vec::with_capacity(SIGNED_HEADER_LEN + self.message.len() + self.signature.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(self.message);
        out.extend_from_slice(self.signature);
        Ok(out)
    }

    pub fn decode(input: &'a [u8]) -> Result<Self, FrameError> {
        if input.len() < SIGNED_HEADER_LEN {
            return Err(FrameError::Truncated {
                need: SIGNED_HEADER_LEN,
                got: input.len(),
            });
        }

        let message_len = BigEndian::read_u32(&input[0..4]) as usize;
        let signature_len = usize::from(BigEndian::read_u16(&input[4..6]));

        let body = &input[SIGNED_HEADER_LEN..];
        let total = message_len
            .checked_add(signature_len)
            .ok_or(FrameError::LengthMismatch)?;
        if total > body.len() {
            return Err(FrameError::LengthMismatch);
        }

        let (message, rest) = body.split_at(message_len);
        let signature = &rest[..signature_len];
        Ok(Self { message, signature })
    }
}

fn section_u16(section: &[u8]) -> Result<u16, FrameError> {
    u16::try_from(section.len()).map_err(|_| FrameError::SectionTooLarge(section.len()))
}

fn section_u32(section: &[u8]) -> Result<u32, FrameError> {
    u32::try_from(section.len()).map_err(|_| FrameError::SectionTooLarge(section.len()))
}
