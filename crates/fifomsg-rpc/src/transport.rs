use fifomsg_frame::MessageFrame;
use fifomsg_transport::WaitTimeout;

use crate::config::{ClientConfig, ServerConfig};
use crate::dispatch::Dispatch;
use crate::error::Result;

/// The listening side of a backend.
pub trait ServerEndpoint: Sized {
    /// Create the listening resources. Fails with `RpcError::Setup` when the
    /// well-known channel cannot be created or opened.
    fn create(config: ServerConfig) -> Result<Self>;

    /// The name clients connect to.
    fn name(&self) -> &str;

    /// Accept and serve connections until `keep_running` returns `false`.
    ///
    /// `keep_running` is checked once per accept iteration, so shutdown takes
    /// effect within one connect timeout. Session-local failures are logged
    /// and close only that session; setup failures end the loop with
    /// `RpcError::Setup`.
    fn run_forever<D, P>(&mut self, dispatch: D, keep_running: P) -> Result<()>
    where
        D: Dispatch + 'static,
        P: FnMut() -> bool;
}

/// The connecting side of a backend.
pub trait ClientEndpoint: Sized {
    fn connect(config: ClientConfig) -> Result<Self>;

    /// The server name this client is connected to.
    fn name(&self) -> &str;

    /// The channel this client owns. Backends without per-client channels
    /// report the server name.
    fn channel_name(&self) -> String {
        self.name().to_string()
    }

    /// Send one request. Bodies over `MAX_BODY` fail with `BadArgument`
    /// before anything is written.
    fn write(&mut self, frame: &MessageFrame) -> Result<()>;

    /// Wait for and read one reply, bounded by the configured wait timeout.
    fn read(&mut self) -> Result<MessageFrame>;

    /// Wait for and read one reply with an explicit bound.
    ///
    /// Returns `RpcError::Timeout` when nothing arrived in time. An empty
    /// frame is a valid (empty) reply.
    fn read_timeout(&mut self, timeout: WaitTimeout) -> Result<MessageFrame>;

    /// Release the connection. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write `request` and read its reply.
    fn call(&mut self, request: &MessageFrame) -> Result<MessageFrame> {
        self.write(request)?;
        self.read()
    }
}

/// One platform channel mechanism.
pub trait Transport {
    /// Short backend name for logs and diagnostics.
    const NAME: &'static str;
    /// Name used when a config leaves it unset.
    const DEFAULT_NAME: &'static str;

    type Server: ServerEndpoint;
    type Client: ClientEndpoint;
}

/// The backend for the current platform.
#[cfg(unix)]
pub type Platform = crate::fifo::Fifo;

/// The backend for the current platform.
#[cfg(windows)]
pub type Platform = crate::pipe::NamedPipe;

pub type Server = <Platform as Transport>::Server;
pub type Client = <Platform as Transport>::Client;

/// Default endpoint name on this platform.
pub const DEFAULT_NAME: &str = <Platform as Transport>::DEFAULT_NAME;
