//! Length-prefixed message frames for fifomsg.
//!
//! Every message on the wire is:
//! - A 4-byte signed length `N` in host byte order
//! - Exactly `N` body bytes
//!
//! A whole frame never exceeds the platform's atomic pipe-write limit, so a
//! frame is delivered by a single write and can never interleave with
//! another writer's. A zero-length frame is the close notice.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_header, decode_message, encode_frame, validate_size, MessageFrame, HEADER_SIZE,
    MAX_BODY,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
