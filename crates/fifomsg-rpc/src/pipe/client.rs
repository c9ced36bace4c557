use std::fs::File;
use std::io::{ErrorKind, Read};

use fifomsg_frame::{decode_message, FrameWriter, MessageFrame};
use fifomsg_transport::pipe::{connect_client, peek_available};
use fifomsg_transport::{WaitReadable, WaitTimeout, ATOMIC_WRITE_LIMIT};
use tracing::{debug, trace};

use super::NamedPipe;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::transport::{ClientEndpoint, Transport};

/// Client end of a message-mode named pipe.
pub struct PipeClient {
    name: String,
    wait_timeout: WaitTimeout,
    pipe: Option<File>,
    buf: Vec<u8>,
}

impl PipeClient {
    /// Connect to `config.name` (or the default pipe), waiting up to the
    /// configured wait timeout while every instance is busy.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let name = config.name_or(NamedPipe::DEFAULT_NAME).to_string();
        let pipe = connect_client(&name, config.wait_timeout)?;
        debug!(name = %name, "connected to named pipe server");

        Ok(Self {
            name,
            wait_timeout: config.wait_timeout,
            pipe: Some(pipe),
            buf: vec![0u8; ATOMIC_WRITE_LIMIT],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.pipe.is_none()
    }

    pub fn write(&mut self, frame: &MessageFrame) -> Result<()> {
        frame
            .validate()
            .map_err(|err| RpcError::BadArgument(err.to_string()))?;
        let pipe = self.pipe.as_ref().ok_or(RpcError::Disconnected)?;
        // One WriteFile per frame keeps it one pipe message.
        FrameWriter::new(pipe).write_frame(frame)?;
        Ok(())
    }

    pub fn read(&mut self) -> Result<MessageFrame> {
        self.read_timeout(self.wait_timeout)
    }

    pub fn read_timeout(&mut self, timeout: WaitTimeout) -> Result<MessageFrame> {
        let pipe = self.pipe.as_ref().ok_or(RpcError::Disconnected)?;
        if !pipe.wait_readable(timeout)? {
            return Err(RpcError::Timeout(timeout));
        }

        let mut reader = pipe;
        let n = loop {
            match reader.read(&mut self.buf) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(RpcError::Disconnected)
                }
                Err(err) => return Err(RpcError::Transport(err.into())),
            }
        };

        if n == 0 {
            // A zero-length message and a closed server both read as 0 bytes.
            return match peek_available(pipe)? {
                Some(_) => Ok(MessageFrame::empty()),
                None => Err(RpcError::Disconnected),
            };
        }

        let reply = decode_message(&self.buf[..n])?;
        trace!(name = %self.name, size = reply.size(), "reply received");
        Ok(reply)
    }

    /// Close the pipe handle. The server sees the disconnect on its next
    /// read. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.pipe.take().is_some() {
            debug!(name = %self.name, "named pipe client closed");
        }
        Ok(())
    }
}

impl Drop for PipeClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl ClientEndpoint for PipeClient {
    fn connect(config: ClientConfig) -> Result<Self> {
        PipeClient::connect(config)
    }

    fn name(&self) -> &str {
        PipeClient::name(self)
    }

    fn write(&mut self, frame: &MessageFrame) -> Result<()> {
        PipeClient::write(self, frame)
    }

    fn read(&mut self) -> Result<MessageFrame> {
        PipeClient::read(self)
    }

    fn read_timeout(&mut self, timeout: WaitTimeout) -> Result<MessageFrame> {
        PipeClient::read_timeout(self, timeout)
    }

    fn close(&mut self) -> Result<()> {
        PipeClient::close(self)
    }
}

impl std::fmt::Debug for PipeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeClient")
            .field("name", &self.name)
            .field("wait_timeout", &self.wait_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use fifomsg_frame::MAX_BODY;

    use super::*;

    #[test]
    fn connect_without_server_fails() {
        let name = format!(r"\\.\pipe\fifomsg-absent-{}", std::process::id());
        let config = ClientConfig::default()
            .with_name(name)
            .with_wait_timeout(WaitTimeout::from_millis(50));
        let err = PipeClient::connect(config).unwrap_err();
        assert_eq!(err.status(), crate::Status::Failed);
    }

    #[test]
    fn closed_client_rejects_io() {
        let mut client = PipeClient {
            name: "closed".to_string(),
            wait_timeout: WaitTimeout::Immediate,
            pipe: None,
            buf: Vec::new(),
        };
        assert!(matches!(
            client.write(&MessageFrame::new("x")),
            Err(RpcError::Disconnected)
        ));
        assert!(matches!(client.read(), Err(RpcError::Disconnected)));
        assert_eq!(
            client
                .write(&MessageFrame::new(vec![0u8; MAX_BODY + 1]))
                .unwrap_err()
                .status(),
            crate::Status::BadArgument
        );
        client.close().unwrap();
    }
}
