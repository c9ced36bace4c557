use bytes::{BufMut, Bytes, BytesMut};
use fifomsg_transport::ATOMIC_WRITE_LIMIT;

use crate::error::{FrameError, Result};

/// Frame header: a 4-byte signed body length.
pub const HEADER_SIZE: usize = 4;

/// Largest body that still fits in one atomic pipe write.
pub const MAX_BODY: usize = ATOMIC_WRITE_LIMIT - HEADER_SIZE;

/// One request or reply body.
///
/// An empty frame carries no payload. Sent by a client it is the close
/// notice; sent by a server it is an empty reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFrame {
    body: Bytes,
}

impl MessageFrame {
    /// Create a frame. The size is checked when the frame is written.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// The zero-length frame.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Check the body fits in one frame.
    pub fn validate(&self) -> Result<()> {
        validate_size(self.size())
    }
}

impl From<&'static [u8]> for MessageFrame {
    fn from(body: &'static [u8]) -> Self {
        Self::new(body)
    }
}

impl From<Vec<u8>> for MessageFrame {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

/// Reject bodies larger than [`MAX_BODY`].
pub fn validate_size(size: usize) -> Result<()> {
    if size > MAX_BODY {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_BODY,
        });
    }
    Ok(())
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────────┬──────────────────┐
/// │ Length (4B, i32,   │ Body             │
/// │ host byte order)   │ (Length bytes)   │
/// └────────────────────┴──────────────────┘
/// ```
///
/// Nothing is written to `dst` when the body is too large.
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    validate_size(body.len())?;
    // MAX_BODY < i32::MAX, so the cast is lossless.
    let len = body.len() as i32;
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&len.to_ne_bytes());
    dst.put_slice(body);
    Ok(())
}

/// Decode a frame header into the body length it announces.
pub fn decode_header(header: [u8; HEADER_SIZE]) -> Result<usize> {
    let declared = i32::from_ne_bytes(header);
    if declared < 0 {
        return Err(FrameError::InvalidLength(declared));
    }
    let size = declared as usize;
    validate_size(size)?;
    Ok(size)
}

/// Decode a frame delivered as one whole message.
///
/// Message-mode pipes hand over a complete write at once, so the buffer must
/// contain exactly one header and the body it declares.
pub fn decode_message(src: &[u8]) -> Result<MessageFrame> {
    let Some((header, body)) = src.split_first_chunk::<HEADER_SIZE>() else {
        return Err(FrameError::Truncated {
            expected: HEADER_SIZE,
            received: src.len(),
        });
    };

    let size = decode_header(*header)?;
    if body.len() < size {
        return Err(FrameError::Truncated {
            expected: size,
            received: body.len(),
        });
    }
    if body.len() > size {
        return Err(FrameError::LengthMismatch {
            declared: size,
            received: body.len(),
        });
    }

    Ok(MessageFrame::new(Bytes::copy_from_slice(body)))
}
