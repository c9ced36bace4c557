//! Synchronous request/reply messaging between local processes.
//!
//! fifomsg sends one request frame and receives one reply frame over the
//! platform's pipe mechanism: FIFO files on Linux and macOS, message-mode
//! named pipes on Windows. Every frame fits in one atomic pipe write.
//!
//! # Crate Structure
//!
//! - [`transport`]: OS primitives (FIFO files, pipe instances, bounded waits)
//! - [`frame`]: Length-prefixed message framing
//! - [`rpc`]: Servers, clients, sessions and the dispatch contract
//!
//! The most used types are re-exported at the crate root:
//!
//! ```no_run
//! use fifomsg::{Client, ClientConfig, ClientEndpoint, MessageFrame};
//!
//! let mut client = Client::connect(ClientConfig::default())?;
//! let reply = client.call(&MessageFrame::new("[1] hello from client"))?;
//! println!("{}", String::from_utf8_lossy(reply.body()));
//! # Ok::<(), fifomsg::RpcError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use fifomsg_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use fifomsg_frame::*;
}

/// Re-export request/reply types.
pub mod rpc {
    pub use fifomsg_rpc::*;
}

pub use fifomsg_rpc::{
    Client, ClientConfig, ClientEndpoint, Dispatch, Echo, FixedReply, MessageFrame, RpcError,
    Server, ServerConfig, ServerEndpoint, Status, Transport, WaitTimeout, DEFAULT_NAME,
    DEFAULT_TIMEOUT, MAX_BODY,
};
