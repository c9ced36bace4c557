use std::fs::File;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fifomsg_frame::{FrameError, FrameReader, FrameWriter};
use fifomsg_transport::fifo::{open_read_nonblocking, open_write_connected};
use fifomsg_transport::{FifoFile, WaitReadable, WaitTimeout};
use tracing::{debug, info, trace, warn};

use super::handshake::{decode_request, derive_paths, validate_base_name};
use super::Fifo;
use crate::config::ServerConfig;
use crate::dispatch::Dispatch;
use crate::error::{Result, RpcError};
use crate::session::{CloseReason, ConnectionSession, SessionTracker};
use crate::transport::{ServerEndpoint, Transport};

/// Thread-per-connection server over FIFO files.
///
/// Owns the well-known rendezvous FIFO, which is removed when the server is
/// dropped. Each accepted client is served by its own worker thread; workers
/// own their channel descriptors and outlive neither their client nor their
/// idle timeout.
pub struct FifoServer {
    name: String,
    config: ServerConfig,
    // Declared before `fifo` so the descriptor closes before the unlink.
    listener: FrameReader<File>,
    fifo: FifoFile,
    tracker: SessionTracker,
    next_session: u64,
    workers: Vec<JoinHandle<()>>,
}

impl FifoServer {
    pub fn create(config: ServerConfig) -> Result<Self> {
        let name = config.name_or(Fifo::DEFAULT_NAME).to_string();
        validate_base_name(&name)?;

        let fifo = FifoFile::create(&name).map_err(RpcError::setup)?;
        let listener = open_read_nonblocking(fifo.path()).map_err(RpcError::setup)?;
        info!(
            name = %name,
            client_timeout = %config.client_timeout,
            connect_timeout = %config.connect_timeout,
            "fifo server listening"
        );

        Ok(Self {
            name,
            config,
            listener: FrameReader::new(listener),
            fifo,
            tracker: SessionTracker::new(),
            next_session: 1,
            workers: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sessions whose worker has not finished yet.
    pub fn active_sessions(&self) -> usize {
        self.tracker.active()
    }

    pub fn run_forever<D, P>(&mut self, dispatch: D, mut keep_running: P) -> Result<()>
    where
        D: Dispatch + 'static,
        P: FnMut() -> bool,
    {
        let dispatch: Arc<dyn Dispatch> = Arc::new(dispatch);

        while keep_running() {
            self.reap_workers();

            let ready = self
                .listener
                .stream()
                .wait_readable(self.config.connect_timeout)
                .map_err(RpcError::setup)?;
            if !ready {
                trace!(name = %self.name, "no connection within connect timeout");
                continue;
            }

            // Control frames arrive in one atomic write; anything shorter than
            // its header declares is malformed.
            let frame = match self.listener.read_frame_within(WaitTimeout::Immediate) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "dropping unreadable rendezvous frame");
                    continue;
                }
            };
            if frame.is_empty() {
                trace!("ignoring empty rendezvous frame");
                continue;
            }

            let suffix = match decode_request(&frame) {
                Ok(suffix) => suffix,
                Err(err) => {
                    warn!(error = %err, "rejecting rendezvous request");
                    continue;
                }
            };

            match self.accept(&suffix, &dispatch) {
                Ok(()) => {}
                Err(err @ RpcError::Setup(_)) => return Err(err),
                Err(err) => warn!(suffix = %suffix, error = %err, "rendezvous failed"),
            }
        }

        debug!(name = %self.name, "fifo server loop stopped");
        Ok(())
    }

    fn accept(&mut self, suffix: &str, dispatch: &Arc<dyn Dispatch>) -> Result<()> {
        let paths = derive_paths(&self.name, suffix);
        let request = open_read_nonblocking(&paths.request)?;
        let reply = open_write_connected(&paths.reply)?;

        let id = self.next_session;
        self.next_session += 1;

        let worker = SessionWorker {
            session: ConnectionSession::new(id, Arc::clone(dispatch), &self.tracker),
            reader: FrameReader::new(request),
            writer: FrameWriter::new(reply),
            idle_timeout: self.config.client_timeout,
        };

        let handle = thread::Builder::new()
            .name(format!("fifomsg-session-{id}"))
            .spawn(move || worker.run())
            .map_err(|err| RpcError::Setup(format!("failed to spawn session worker: {err}")))?;
        self.workers.push(handle);

        debug!(session = id, path = ?paths.request, "session accepted");
        Ok(())
    }

    fn reap_workers(&mut self) {
        self.workers.retain(|worker| !worker.is_finished());
    }
}

impl ServerEndpoint for FifoServer {
    fn create(config: ServerConfig) -> Result<Self> {
        FifoServer::create(config)
    }

    fn name(&self) -> &str {
        FifoServer::name(self)
    }

    fn run_forever<D, P>(&mut self, dispatch: D, keep_running: P) -> Result<()>
    where
        D: Dispatch + 'static,
        P: FnMut() -> bool,
    {
        FifoServer::run_forever(self, dispatch, keep_running)
    }
}

impl std::fmt::Debug for FifoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoServer")
            .field("name", &self.name)
            .field("path", &self.fifo.path())
            .field("config", &self.config)
            .field("active_sessions", &self.tracker.active())
            .finish_non_exhaustive()
    }
}

/// One accepted client, served on its own thread.
struct SessionWorker {
    session: ConnectionSession,
    reader: FrameReader<File>,
    writer: FrameWriter<File>,
    idle_timeout: WaitTimeout,
}

impl SessionWorker {
    fn run(mut self) {
        let reason = self.serve();
        self.session.begin_close(reason);
        // Channels close when `self` drops at the end of this scope.
        self.session.finish_close();
    }

    fn serve(&mut self) -> CloseReason {
        let id = self.session.id();
        loop {
            self.session.begin_read();

            match self.reader.stream().wait_readable(self.idle_timeout) {
                Ok(true) => {}
                Ok(false) => return CloseReason::IdleTimeout,
                Err(err) => {
                    warn!(session = id, error = %err, "session wait failed");
                    return CloseReason::Error;
                }
            }

            let request = match self.reader.read_frame_within(self.idle_timeout) {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => return CloseReason::Disconnected,
                Err(err) => {
                    warn!(session = id, error = %err, "session read failed");
                    return CloseReason::Error;
                }
            };
            trace!(session = id, size = request.size(), "request received");

            let Some(reply) = self.session.handle_request(&request) else {
                return CloseReason::CloseNotice;
            };

            if let Err(err) = self.writer.write_frame(&reply) {
                warn!(session = id, error = %err, "session write failed");
                return CloseReason::Error;
            }
            trace!(session = id, size = reply.size(), "reply sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use fifomsg_frame::MessageFrame;

    use super::*;
    use crate::dispatch::Echo;

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

    fn config_for(base: &std::path::Path) -> ServerConfig {
        ServerConfig::default()
            .with_name(base.to_str().expect("temp path should be UTF-8"))
            .with_connect_timeout(WaitTimeout::from_millis(20))
    }

    #[test]
    fn create_makes_and_removes_rendezvous_fifo() {
        let base = base_path("create");
        let server = FifoServer::create(config_for(&base)).expect("server should start");
        assert!(base.exists());
        assert_eq!(server.name(), base.to_str().unwrap());

        drop(server);
        assert!(!base.exists());
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }

    #[test]
    fn create_rejects_long_base_name() {
        let name = format!("/tmp/{}", "n".repeat(crate::fifo::MAX_BASE_LEN));
        let err = FifoServer::create(ServerConfig::default().with_name(name)).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Transport(fifomsg_transport::TransportError::NameTooLong { .. })
        ));
    }

    #[test]
    fn create_in_missing_directory_is_setup_error() {
        let err = FifoServer::create(
            ServerConfig::default().with_name("/nonexistent-fifomsg-dir/server"),
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::Setup(_)));
    }

    #[test]
    fn predicate_is_checked_every_iteration() {
        let base = base_path("predicate");
        let mut server = FifoServer::create(config_for(&base)).unwrap();

        let mut checks = 0;
        let start = Instant::now();
        server
            .run_forever(Echo, || {
                checks += 1;
                checks <= 3
            })
            .unwrap();

        assert_eq!(checks, 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
        drop(server);
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }

    #[test]
    fn malformed_rendezvous_frame_is_skipped() {
        let base = base_path("malformed");
        let mut server = FifoServer::create(config_for(&base)).unwrap();

        let mut control = FrameWriter::new(open_write_connected(&base).unwrap());
        control.write_frame(&MessageFrame::new("../escape\0")).unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        server
            .run_forever(Echo, || Instant::now() < deadline)
            .expect("malformed frame must not stop the server");
        assert_eq!(server.active_sessions(), 0);

        drop(server);
        let _ = std::fs::remove_dir_all(base.parent().unwrap());
    }
}
