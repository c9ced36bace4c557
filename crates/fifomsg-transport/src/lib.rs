//! OS pipe primitives for fifomsg.
//!
//! Provides the two platform channel mechanisms the request/reply layer is
//! built on:
//! - FIFO files (Linux/macOS): `mkfifo`, open-mode helpers, bounded `poll` waits
//! - Named pipes (Windows): message-mode pipe instances, overlapped connect
//!
//! This is the lowest layer of fifomsg. Nothing here knows about frames or
//! sessions; it only creates, opens, waits on and cleans up channels.

pub mod error;
pub mod limits;
pub mod timeout;
pub mod traits;

#[cfg(unix)]
pub mod fifo;

#[cfg(windows)]
pub mod pipe;

pub use error::{Result, TransportError};
pub use limits::{ATOMIC_WRITE_LIMIT, MAX_NAME_LEN};
pub use timeout::{ParseTimeoutError, WaitTimeout};
pub use traits::WaitReadable;

#[cfg(unix)]
pub use fifo::FifoFile;

#[cfg(windows)]
pub use pipe::{AlertableWait, ConnectState, Event, PipeInstance};
