use std::fs::File;

use fifomsg_frame::{FrameReader, FrameWriter, MessageFrame};
use fifomsg_transport::fifo::{open_read_nonblocking, open_write_connected, open_write_rendezvous};
use fifomsg_transport::{FifoFile, WaitReadable, WaitTimeout};
use tracing::{debug, trace, warn};

use super::handshake::{
    default_suffix, derive_paths, encode_request, validate_base_name, validate_suffix,
};
use super::Fifo;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::transport::{ClientEndpoint, Transport};

/// Client end of a FIFO connection.
///
/// Creates its own request and reply FIFOs and removes them again on
/// [`close`](FifoClient::close) or drop.
pub struct FifoClient {
    name: String,
    suffix: String,
    wait_timeout: WaitTimeout,
    // Descriptors are declared before the FIFO files so they close first.
    reader: FrameReader<File>,
    writer: Option<FrameWriter<File>>,
    request_fifo: Option<FifoFile>,
    reply_fifo: Option<FifoFile>,
}

impl FifoClient {
    /// Connect to the server at `config.name` (or the default name).
    ///
    /// Blocks until the server has opened this client's request FIFO, or
    /// until the wait timeout elapses.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let name = config.name_or(Fifo::DEFAULT_NAME).to_string();
        validate_base_name(&name)?;

        let suffix = match config.suffix {
            Some(suffix) => {
                validate_suffix(&suffix)?;
                suffix
            }
            None => default_suffix(),
        };
        let paths = derive_paths(&name, &suffix);

        let request_fifo = FifoFile::create(&paths.request)?;
        let reply_fifo = FifoFile::create(&paths.reply)?;
        let reply = open_read_nonblocking(reply_fifo.path())?;

        // Fails with ENXIO when no server holds the well-known FIFO open.
        let mut control = FrameWriter::new(open_write_connected(&name)?);
        control.write_frame(&encode_request(&suffix))?;
        drop(control);
        trace!(name = %name, suffix = %suffix, "rendezvous request sent");

        let request = open_write_rendezvous(request_fifo.path(), config.wait_timeout)?;
        debug!(name = %name, suffix = %suffix, "connected to fifo server");

        Ok(Self {
            name,
            suffix,
            wait_timeout: config.wait_timeout,
            reader: FrameReader::new(reply),
            writer: Some(FrameWriter::new(request)),
            request_fifo: Some(request_fifo),
            reply_fifo: Some(reply_fifo),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This client's request FIFO, `<base>.<suffix>`.
    pub fn channel_name(&self) -> String {
        derive_paths(&self.name, &self.suffix)
            .request
            .display()
            .to_string()
    }

    /// The rendezvous suffix this client announced.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn write(&mut self, frame: &MessageFrame) -> Result<()> {
        frame
            .validate()
            .map_err(|err| RpcError::BadArgument(err.to_string()))?;
        let writer = self.writer.as_mut().ok_or(RpcError::Disconnected)?;
        writer.write_frame(frame)?;
        Ok(())
    }

    pub fn read(&mut self) -> Result<MessageFrame> {
        self.read_timeout(self.wait_timeout)
    }

    pub fn read_timeout(&mut self, timeout: WaitTimeout) -> Result<MessageFrame> {
        if self.is_closed() {
            return Err(RpcError::Disconnected);
        }
        if !self.reader.stream().wait_readable(timeout)? {
            return Err(RpcError::Timeout(timeout));
        }
        Ok(self.reader.read_frame_within(timeout)?)
    }

    /// Send the close notice, release the descriptors and remove this
    /// client's FIFOs. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let notice = writer.send_close_notice();
        drop(writer);
        self.request_fifo.take();
        self.reply_fifo.take();

        match notice {
            Ok(()) => {
                debug!(name = %self.name, suffix = %self.suffix, "fifo client closed");
                Ok(())
            }
            Err(err) => {
                warn!(name = %self.name, error = %err, "close notice not delivered");
                Err(err.into())
            }
        }
    }
}

impl Drop for FifoClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl ClientEndpoint for FifoClient {
    fn connect(config: ClientConfig) -> Result<Self> {
        FifoClient::connect(config)
    }

    fn name(&self) -> &str {
        FifoClient::name(self)
    }

    fn channel_name(&self) -> String {
        FifoClient::channel_name(self)
    }

    fn write(&mut self, frame: &MessageFrame) -> Result<()> {
        FifoClient::write(self, frame)
    }

    fn read(&mut self) -> Result<MessageFrame> {
        FifoClient::read(self)
    }

    fn read_timeout(&mut self, timeout: WaitTimeout) -> Result<MessageFrame> {
        FifoClient::read_timeout(self, timeout)
    }

    fn close(&mut self) -> Result<()> {
        FifoClient::close(self)
    }
}

impl std::fmt::Debug for FifoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoClient")
            .field("name", &self.name)
            .field("suffix", &self.suffix)
            .field("wait_timeout", &self.wait_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use fifomsg_frame::MAX_BODY;

    use super::*;

    fn base_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/fifomsg-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("server")
    }

    #[test]
    fn connect_without_server_fails_and_cleans_up() {
        let base = base_path("noserver");
        let config = ClientConfig::default()
            .with_name(base.to_str().unwrap())
            .with_suffix("lonely")
            .with_wait_timeout(WaitTimeout::from_millis(50));

        let err = FifoClient::connect(config).unwrap_err();
        assert_eq!(err.status(), crate::Status::Failed);

        let paths = derive_paths(base.to_str().unwrap(), "lonely");
        assert!(!paths.request.exists());
        assert!(!paths.reply.exists());
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }

    #[test]
    fn connect_rejects_bad_suffix() {
        let config = ClientConfig::default()
            .with_name("/tmp/fifomsg-unused")
            .with_suffix("bad/suffix");
        assert!(matches!(
            FifoClient::connect(config),
            Err(RpcError::Handshake(_))
        ));
    }

    #[test]
    fn rendezvous_times_out_when_server_never_accepts() {
        let base = base_path("noaccept");
        // A listener that never runs its accept loop.
        let listener_fifo = FifoFile::create(&base).unwrap();
        let _listener = open_read_nonblocking(listener_fifo.path()).unwrap();

        let config = ClientConfig::default()
            .with_name(base.to_str().unwrap())
            .with_wait_timeout(WaitTimeout::from_millis(50));
        let err = FifoClient::connect(config).unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");

        drop(listener_fifo);
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }

    #[test]
    fn oversized_write_is_bad_argument() {
        let base = base_path("oversize");
        let listener_fifo = FifoFile::create(&base).unwrap();
        let _listener = open_read_nonblocking(listener_fifo.path()).unwrap();

        // Accept by hand: open the request FIFO's read side once it exists.
        let paths = derive_paths(base.to_str().unwrap(), "manual");
        let request_path = paths.request.clone();
        let acceptor = std::thread::spawn(move || {
            loop {
                if request_path.exists() {
                    if let Ok(file) = open_read_nonblocking(&request_path) {
                        return file;
                    }
                }
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        });

        let config = ClientConfig::default()
            .with_name(base.to_str().unwrap())
            .with_suffix("manual")
            .with_wait_timeout(WaitTimeout::from_millis(2000));
        let mut client = FifoClient::connect(config).unwrap();
        let server_side = acceptor.join().unwrap();

        let err = client
            .write(&MessageFrame::new(vec![0u8; MAX_BODY + 1]))
            .unwrap_err();
        assert_eq!(err.status(), crate::Status::BadArgument);
        assert!(!server_side.wait_readable(WaitTimeout::Immediate).unwrap());

        client.close().unwrap();
        client.close().unwrap();
        assert!(!paths.request.exists());
        assert!(!paths.reply.exists());

        drop(listener_fifo);
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }
}
