use std::io::{ErrorKind, Read};
use std::time::Instant;

use bytes::BytesMut;
use fifomsg_transport::{WaitReadable, WaitTimeout};
use tracing::trace;

use crate::codec::{decode_header, MessageFrame, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Receives length-prefixed frames from a byte stream.
///
/// Only the header and the declared body are consumed, never bytes of the
/// following frame.
pub struct FrameReader<T> {
    inner: T,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Block until the next complete frame arrives.
    ///
    /// A stream that ends on a frame boundary yields
    /// `FrameError::ConnectionClosed`; one that ends inside a frame yields
    /// `FrameError::Truncated`.
    pub fn read_frame(&mut self) -> Result<MessageFrame> {
        self.read_frame_with(|_| {
            std::thread::yield_now();
            Ok(true)
        })
    }

    /// The stream frames are read from, for readiness checks.
    pub fn stream(&self) -> &T {
        &self.inner
    }

    /// `on_would_block` decides whether to keep reading after `WouldBlock`;
    /// returning `false` gives up on the frame.
    fn read_frame_with(
        &mut self,
        mut on_would_block: impl FnMut(&T) -> Result<bool>,
    ) -> Result<MessageFrame> {
        let mut header = [0u8; HEADER_SIZE];
        let got = self.read_up_to(&mut header, &mut on_would_block)?;
        if got == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        if got < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                received: got,
            });
        }

        let size = decode_header(header)?;
        let mut body = BytesMut::zeroed(size);
        let got = self.read_up_to(&mut body, &mut on_would_block)?;
        if got < size {
            return Err(FrameError::Truncated {
                expected: size,
                received: got,
            });
        }

        trace!(size, "received frame");
        Ok(MessageFrame::new(body.freeze()))
    }

    /// Read into `buf` until it is full or the stream ends.
    fn read_up_to(
        &mut self,
        buf: &mut [u8],
        on_would_block: &mut impl FnMut(&T) -> Result<bool>,
    ) -> Result<usize> {
        let mut got = 0usize;
        while got < buf.len() {
            match self.inner.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !on_would_block(&self.inner)? {
                        return Err(FrameError::Truncated {
                            expected: buf.len(),
                            received: got,
                        });
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(got)
    }
}

impl<T: Read + WaitReadable> FrameReader<T> {
    /// Read one frame from a non-blocking stream whose writer may stall.
    ///
    /// A FIFO held open for writing by its own reader never reports
    /// end-of-channel, so a peer that dies mid-frame is only noticed by the
    /// bound: a frame still incomplete after `limit` fails with
    /// `FrameError::Truncated`.
    pub fn read_frame_within(&mut self, limit: WaitTimeout) -> Result<MessageFrame> {
        let deadline = limit.deadline_from(Instant::now());
        self.read_frame_with(|stream| {
            let left = WaitTimeout::from_millis(i64::from(WaitTimeout::remaining_millis(deadline)));
            Ok(stream.wait_readable(left)?)
        })
    }
}
