use std::io::{self, ErrorKind, Write};

use bytes::BytesMut;
use fifomsg_transport::ATOMIC_WRITE_LIMIT;
use tracing::trace;

use crate::codec::{encode_frame, validate_size, MessageFrame};
use crate::error::{FrameError, Result};

/// Sends length-prefixed frames over a byte stream.
///
/// Header and body are staged in one buffer so that a frame no larger than
/// the atomic write limit reaches a pipe in a single `write` call.
pub struct FrameWriter<T> {
    inner: T,
    staging: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            staging: BytesMut::with_capacity(ATOMIC_WRITE_LIMIT),
        }
    }

    pub fn write_frame(&mut self, frame: &MessageFrame) -> Result<()> {
        self.send(frame.body())
    }

    /// Encode and send one body.
    ///
    /// An oversized body fails with `PayloadTooLarge` before anything is
    /// written.
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        validate_size(body.len())?;

        self.staging.clear();
        encode_frame(body, &mut self.staging)?;

        let mut sent = 0usize;
        while sent < self.staging.len() {
            let pending = &self.staging[sent..];
            let inner = &mut self.inner;
            match retry_transient(|| inner.write(pending))? {
                0 => return Err(FrameError::ConnectionClosed),
                n => sent += n,
            }
        }
        trace!(size = body.len(), "sent frame");

        let inner = &mut self.inner;
        retry_transient(|| inner.flush())
    }

    /// Send the zero-length close notice.
    pub fn send_close_notice(&mut self) -> Result<()> {
        self.send(&[])
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Repeat `op` while it fails with `Interrupted` or `WouldBlock`.
fn retry_transient<R>(mut op: impl FnMut() -> io::Result<R>) -> Result<R> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
