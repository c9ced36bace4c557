//! Synchronous request/reply messaging between local processes.
//!
//! A client writes one request frame and reads one reply frame; the server
//! runs a per-connection loop that hands every request to a [`Dispatch`]
//! implementation and writes back what it returns.
//!
//! Two backends implement the same [`Transport`] contract:
//! - [`fifo::Fifo`] (Unix): FIFO files with a rendezvous handshake and one
//!   worker thread per connection
//! - [`pipe::NamedPipe`] (Windows): message-mode named pipes driven by I/O
//!   completion routines on a single thread
//!
//! [`Server`] and [`Client`] name the backend for the current platform.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod transport;

#[cfg(unix)]
pub mod fifo;

#[cfg(windows)]
pub mod pipe;

pub use config::{ClientConfig, ServerConfig, DEFAULT_TIMEOUT};
pub use dispatch::{Dispatch, Echo, FixedReply};
pub use error::{Result, RpcError, Status};
pub use session::{CloseReason, ConnectionSession, SessionState, SessionTracker};
pub use transport::{
    Client, ClientEndpoint, Platform, Server, ServerEndpoint, Transport, DEFAULT_NAME,
};

pub use fifomsg_frame::{MessageFrame, MAX_BODY};
pub use fifomsg_transport::WaitTimeout;
