use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use fifomsg_frame::{decode_message, encode_frame, MessageFrame};
use fifomsg_transport::pipe::{wait_alertable, AlertableWait, ConnectState, Event, PipeInstance};
use fifomsg_transport::{TransportError, WaitTimeout, ATOMIC_WRITE_LIMIT, MAX_NAME_LEN};
use tracing::{debug, info, trace, warn};
use windows_sys::Win32::Foundation::ERROR_BROKEN_PIPE;
use windows_sys::Win32::Storage::FileSystem::{ReadFileEx, WriteFileEx};
use windows_sys::Win32::System::Threading::SleepEx;
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use super::NamedPipe;
use crate::config::ServerConfig;
use crate::dispatch::Dispatch;
use crate::error::{Result, RpcError};
use crate::session::{CloseReason, ConnectionSession, SessionState, SessionTracker};
use crate::transport::{ServerEndpoint, Transport};

/// Alertable sleep used while draining cancelled sessions.
const DRAIN_INTERVAL_MS: u32 = 10;

/// Lower bound on how often idle sessions are swept.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

type Registry = HashMap<u64, *mut PipeSession>;

/// One connected client.
///
/// Heap-allocated and leaked while I/O is outstanding; the completion
/// routines recover it from the `OVERLAPPED` pointer and free it in
/// [`close_session`].
#[repr(C)]
struct PipeSession {
    // Must stay the first field.
    overlapped: OVERLAPPED,
    pipe: PipeInstance,
    session: ConnectionSession,
    request: Box<[u8]>,
    reply: BytesMut,
    registry: Rc<RefCell<Registry>>,
    idle_since: Instant,
    cancel_reason: Option<CloseReason>,
}

impl PipeSession {
    fn is_idle(&self, limit: Duration) -> bool {
        self.cancel_reason.is_none()
            && self.session.state() == SessionState::Reading
            && self.idle_since.elapsed() >= limit
    }
}

/// Completion-driven server over message-mode named pipes.
///
/// All sessions are serviced on the thread that calls
/// [`run_forever`](PipeServer::run_forever). Live sessions are cancelled and
/// drained when the loop stops and again when the server is dropped.
pub struct PipeServer {
    name: String,
    config: ServerConfig,
    listening: Option<PipeInstance>,
    connect_event: Event,
    connect_overlapped: Box<OVERLAPPED>,
    connect_pending: bool,
    registry: Rc<RefCell<Registry>>,
    tracker: SessionTracker,
    next_session: u64,
}

impl PipeServer {
    pub fn create(config: ServerConfig) -> Result<Self> {
        let name = config.name_or(NamedPipe::DEFAULT_NAME).to_string();
        if name.len() > MAX_NAME_LEN {
            return Err(TransportError::NameTooLong {
                len: name.len(),
                name,
                max: MAX_NAME_LEN,
            }
            .into());
        }

        let connect_event = Event::new_manual_reset(false).map_err(RpcError::setup)?;
        let listening = PipeInstance::create(
            &name,
            ATOMIC_WRITE_LIMIT as u32,
            config.client_timeout,
        )
        .map_err(RpcError::setup)?;
        info!(
            name = %name,
            client_timeout = %config.client_timeout,
            connect_timeout = %config.connect_timeout,
            "named pipe server listening"
        );

        Ok(Self {
            name,
            config,
            listening: Some(listening),
            connect_event,
            // SAFETY: OVERLAPPED is plain data; all-zero is its initial state.
            connect_overlapped: Box::new(unsafe { std::mem::zeroed() }),
            connect_pending: false,
            registry: Rc::new(RefCell::new(HashMap::new())),
            tracker: SessionTracker::new(),
            next_session: 1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sessions accepted and not yet closed.
    pub fn active_sessions(&self) -> usize {
        self.tracker.active()
    }

    pub fn run_forever<D, P>(&mut self, dispatch: D, mut keep_running: P) -> Result<()>
    where
        D: Dispatch + 'static,
        P: FnMut() -> bool,
    {
        let dispatch: Arc<dyn Dispatch> = Arc::new(dispatch);
        let result = self.serve(&dispatch, &mut keep_running);
        self.shutdown_sessions();
        debug!(name = %self.name, "named pipe server loop stopped");
        result
    }

    fn serve(
        &mut self,
        dispatch: &Arc<dyn Dispatch>,
        keep_running: &mut dyn FnMut() -> bool,
    ) -> Result<()> {
        self.begin_connect()?;

        while keep_running() {
            match wait_alertable(&self.connect_event, self.wait_bound()).map_err(RpcError::setup)? {
                AlertableWait::Signaled => self.accept(dispatch)?,
                AlertableWait::IoCompletion => {}
                AlertableWait::TimedOut => {
                    trace!(name = %self.name, "no connection within connect timeout")
                }
            }
            self.sweep_idle();
        }
        Ok(())
    }

    /// Start an overlapped connect on the listening instance.
    fn begin_connect(&mut self) -> Result<()> {
        let Some(instance) = self.listening.as_ref() else {
            return Ok(());
        };
        if self.connect_pending {
            return Ok(());
        }

        self.connect_event.reset().map_err(RpcError::setup)?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its initial state.
        *self.connect_overlapped = unsafe { std::mem::zeroed() };
        self.connect_overlapped.hEvent = self.connect_event.raw();

        for attempt in 0..2 {
            // SAFETY: the boxed OVERLAPPED has a valid event and lives as long
            // as the server; Drop cancels and waits out a pending connect.
            let state = unsafe { instance.connect_overlapped(&mut *self.connect_overlapped) };
            match state {
                Ok(ConnectState::Pending) => {
                    self.connect_pending = true;
                    return Ok(());
                }
                Ok(ConnectState::Connected) => {
                    self.connect_event.set().map_err(RpcError::setup)?;
                    return Ok(());
                }
                Err(err) if attempt == 0 => {
                    // A client that connected and left before the call.
                    warn!(error = %err, "listening instance connect failed; retrying");
                    let _ = instance.disconnect();
                }
                Err(err) => return Err(RpcError::setup(err)),
            }
        }
        Ok(())
    }

    fn accept(&mut self, dispatch: &Arc<dyn Dispatch>) -> Result<()> {
        let Some(instance) = self.listening.take() else {
            return Ok(());
        };

        if self.connect_pending {
            self.connect_pending = false;
            let mut transferred = 0u32;
            // SAFETY: the connect has signalled its event; the OVERLAPPED is
            // the one it was issued with.
            let ok = unsafe {
                GetOverlappedResult(
                    instance.raw(),
                    &*self.connect_overlapped,
                    &mut transferred,
                    0,
                )
            };
            if ok == 0 {
                warn!(
                    error = %io::Error::last_os_error(),
                    "pending connect failed; reusing instance"
                );
                let _ = instance.disconnect();
                self.listening = Some(instance);
                return self.begin_connect();
            }
        }

        self.start_session(instance, dispatch);

        let next = PipeInstance::create(
            &self.name,
            ATOMIC_WRITE_LIMIT as u32,
            self.config.client_timeout,
        )
        .map_err(RpcError::setup)?;
        self.listening = Some(next);
        self.begin_connect()
    }

    fn start_session(&mut self, instance: PipeInstance, dispatch: &Arc<dyn Dispatch>) {
        let id = self.next_session;
        self.next_session += 1;

        let session = Box::new(PipeSession {
            // SAFETY: OVERLAPPED is plain data; all-zero is its initial state.
            overlapped: unsafe { std::mem::zeroed() },
            pipe: instance,
            session: ConnectionSession::new(id, Arc::clone(dispatch), &self.tracker),
            request: vec![0u8; ATOMIC_WRITE_LIMIT].into_boxed_slice(),
            reply: BytesMut::with_capacity(ATOMIC_WRITE_LIMIT),
            registry: Rc::clone(&self.registry),
            idle_since: Instant::now(),
            cancel_reason: None,
        });
        let ptr = Box::into_raw(session);
        self.registry.borrow_mut().insert(id, ptr);
        debug!(session = id, "session accepted");

        // SAFETY: `ptr` was just leaked from a Box and has no I/O outstanding.
        if let Err(err) = unsafe { start_read(ptr) } {
            warn!(session = id, error = %err, "initial read failed");
            // SAFETY: the read was not issued, so nothing else refers to `ptr`.
            unsafe { close_session(ptr, CloseReason::Error) };
        }
    }

    fn idle_limit(&self) -> Option<Duration> {
        match self.config.client_timeout {
            WaitTimeout::Infinite => None,
            WaitTimeout::Immediate => Some(Duration::ZERO),
            WaitTimeout::Bounded(limit) => Some(limit),
        }
    }

    /// The connect timeout, shortened while idle sessions need sweeping.
    fn wait_bound(&self) -> WaitTimeout {
        let connect = self.config.connect_timeout;
        let Some(limit) = self.idle_limit() else {
            return connect;
        };
        if self.registry.borrow().is_empty() {
            return connect;
        }

        let sweep = (limit / 4).max(MIN_SWEEP_INTERVAL);
        match connect {
            WaitTimeout::Immediate => connect,
            WaitTimeout::Bounded(bound) if bound <= sweep => connect,
            _ => WaitTimeout::Bounded(sweep),
        }
    }

    fn sweep_idle(&self) {
        let Some(limit) = self.idle_limit() else {
            return;
        };
        let idle: Vec<*mut PipeSession> = self
            .registry
            .borrow()
            .values()
            .copied()
            // SAFETY: registered sessions are live until `close_session`
            // removes them, which only runs inside alertable waits.
            .filter(|&ptr| unsafe { (*ptr).is_idle(limit) })
            .collect();

        for ptr in idle {
            // SAFETY: as above; no completion routine is running.
            unsafe { cancel_session(ptr, CloseReason::IdleTimeout) };
        }
    }

    /// Cancel every live session and run completions until all are freed.
    fn shutdown_sessions(&mut self) {
        let live: Vec<*mut PipeSession> = self.registry.borrow().values().copied().collect();
        if live.is_empty() {
            return;
        }

        debug!(count = live.len(), "cancelling live sessions");
        for ptr in live {
            // SAFETY: registered sessions are live; no completion routine is running.
            unsafe { cancel_session(ptr, CloseReason::Shutdown) };
        }
        while !self.registry.borrow().is_empty() {
            // SAFETY: plain alertable sleep; queued completions run here.
            unsafe { SleepEx(DRAIN_INTERVAL_MS, 1) };
        }
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.shutdown_sessions();

        if self.connect_pending {
            if let Some(instance) = self.listening.as_ref() {
                let mut transferred = 0u32;
                // SAFETY: the OVERLAPPED is still owned by `self`; waiting for
                // the cancelled connect guarantees the kernel is done with it.
                unsafe {
                    CancelIoEx(instance.raw(), &*self.connect_overlapped);
                    GetOverlappedResult(
                        instance.raw(),
                        &*self.connect_overlapped,
                        &mut transferred,
                        1,
                    );
                }
            }
            self.connect_pending = false;
        }
    }
}

impl ServerEndpoint for PipeServer {
    fn create(config: ServerConfig) -> Result<Self> {
        PipeServer::create(config)
    }

    fn name(&self) -> &str {
        PipeServer::name(self)
    }

    fn run_forever<D, P>(&mut self, dispatch: D, keep_running: P) -> Result<()>
    where
        D: Dispatch + 'static,
        P: FnMut() -> bool,
    {
        PipeServer::run_forever(self, dispatch, keep_running)
    }
}

impl std::fmt::Debug for PipeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeServer")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("active_sessions", &self.tracker.active())
            .finish_non_exhaustive()
    }
}

/// Issue the next read for a session.
///
/// # Safety
///
/// `ptr` must be a live, registered session with no I/O outstanding.
unsafe fn start_read(ptr: *mut PipeSession) -> io::Result<()> {
    // SAFETY: upheld by the caller.
    let (handle, buf, len) = unsafe {
        let session = &mut *ptr;
        session.session.begin_read();
        session.idle_since = Instant::now();
        session.overlapped = std::mem::zeroed();
        (
            session.pipe.raw(),
            session.request.as_mut_ptr(),
            session.request.len() as u32,
        )
    };

    // SAFETY: the buffer and OVERLAPPED live inside the leaked session until
    // the completion routine frees it.
    let ok = unsafe { ReadFileEx(handle, buf, len, ptr.cast(), Some(on_read_complete)) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Dispatch a completed read and issue the reply write.
///
/// Returns the close reason when the session should end instead.
///
/// # Safety
///
/// `ptr` must be a live session whose read just completed.
unsafe fn reply_to(ptr: *mut PipeSession, transferred: usize) -> std::result::Result<(), CloseReason> {
    // SAFETY: upheld by the caller; no other reference to the session exists.
    let session = unsafe { &mut *ptr };
    let id = session.session.id();

    // A zero-byte message carries no header; treat it like the close notice.
    let request = if transferred == 0 {
        MessageFrame::empty()
    } else {
        decode_message(&session.request[..transferred]).map_err(|err| {
            warn!(session = id, error = %err, "malformed request");
            CloseReason::Error
        })?
    };
    trace!(session = id, size = request.size(), "request received");

    let reply = catch_unwind(AssertUnwindSafe(|| session.session.handle_request(&request)))
        .map_err(|_| {
            warn!(session = id, "dispatch panicked");
            CloseReason::Error
        })?;
    let Some(reply) = reply else {
        return Err(CloseReason::CloseNotice);
    };

    session.reply.clear();
    encode_frame(reply.body(), &mut session.reply).map_err(|err| {
        warn!(session = id, error = %err, "reply encoding failed");
        CloseReason::Error
    })?;
    // SAFETY: OVERLAPPED is plain data; all-zero is its initial state.
    session.overlapped = unsafe { std::mem::zeroed() };
    let (handle, buf, len) = (
        session.pipe.raw(),
        session.reply.as_ptr(),
        session.reply.len() as u32,
    );

    // SAFETY: the reply buffer and OVERLAPPED live inside the leaked session
    // until the completion routine frees it.
    let ok = unsafe { WriteFileEx(handle, buf, len, ptr.cast(), Some(on_write_complete)) };
    if ok == 0 {
        warn!(session = id, error = %io::Error::last_os_error(), "reply write failed");
        return Err(CloseReason::Error);
    }
    trace!(session = id, size = reply.size(), "reply queued");
    Ok(())
}

fn error_reason(code: u32) -> CloseReason {
    if code == ERROR_BROKEN_PIPE {
        CloseReason::Disconnected
    } else {
        CloseReason::Error
    }
}

unsafe extern "system" fn on_read_complete(error: u32, transferred: u32, overlapped: *mut OVERLAPPED) {
    let ptr = overlapped.cast::<PipeSession>();
    // SAFETY: `overlapped` is the first field of a live PipeSession; the
    // session is freed only here or in `on_write_complete`.
    unsafe {
        if let Some(reason) = (*ptr).cancel_reason {
            close_session(ptr, reason);
            return;
        }
        if error != 0 {
            close_session(ptr, error_reason(error));
            return;
        }
        if let Err(reason) = reply_to(ptr, transferred as usize) {
            close_session(ptr, reason);
        }
    }
}

unsafe extern "system" fn on_write_complete(error: u32, transferred: u32, overlapped: *mut OVERLAPPED) {
    let ptr = overlapped.cast::<PipeSession>();
    // SAFETY: as in `on_read_complete`.
    unsafe {
        if let Some(reason) = (*ptr).cancel_reason {
            close_session(ptr, reason);
            return;
        }
        if error != 0 {
            close_session(ptr, error_reason(error));
            return;
        }
        if transferred as usize != (*ptr).reply.len() {
            warn!(
                session = (*ptr).session.id(),
                transferred,
                expected = (*ptr).reply.len(),
                "short reply write"
            );
            close_session(ptr, CloseReason::Error);
            return;
        }
        if let Err(err) = start_read(ptr) {
            warn!(session = (*ptr).session.id(), error = %err, "read failed");
            close_session(ptr, CloseReason::Error);
        }
    }
}

/// Request cancellation of a session's outstanding I/O.
///
/// The completion routine sees `cancel_reason` and closes the session.
///
/// # Safety
///
/// `ptr` must be a live, registered session and no completion routine may
/// be running.
unsafe fn cancel_session(ptr: *mut PipeSession, reason: CloseReason) {
    // SAFETY: upheld by the caller.
    unsafe {
        let session = &mut *ptr;
        if session.cancel_reason.is_some() {
            return;
        }
        session.cancel_reason = Some(reason);
        let handle = session.pipe.raw();
        // Fails harmlessly when the completion is already queued.
        CancelIoEx(handle, ptr.cast::<OVERLAPPED>().cast_const());
    }
}

/// Disconnect and free a session.
///
/// # Safety
///
/// `ptr` must come from `Box::into_raw` in `start_session` and have no I/O
/// outstanding.
unsafe fn close_session(ptr: *mut PipeSession, reason: CloseReason) {
    // SAFETY: upheld by the caller; this takes back ownership exactly once.
    let mut session = unsafe { Box::from_raw(ptr) };
    let id = session.session.id();
    session.registry.borrow_mut().remove(&id);

    session.session.begin_close(reason);
    if let Err(err) = session.pipe.disconnect() {
        trace!(session = id, error = %err, "disconnect failed");
    }
    session.session.finish_close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Echo;

    fn unique_name(tag: &str) -> String {
        format!(
            r"\\.\pipe\fifomsg-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        )
    }

    #[test]
    fn create_rejects_long_name() {
        let name = format!(r"\\.\pipe\{}", "p".repeat(MAX_NAME_LEN));
        let err = PipeServer::create(ServerConfig::default().with_name(name)).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Transport(TransportError::NameTooLong { .. })
        ));
    }

    #[test]
    fn predicate_is_checked_every_iteration() {
        let config = ServerConfig::default()
            .with_name(unique_name("predicate"))
            .with_connect_timeout(WaitTimeout::from_millis(20));
        let mut server = PipeServer::create(config).unwrap();

        let mut checks = 0;
        server
            .run_forever(Echo, || {
                checks += 1;
                checks <= 3
            })
            .unwrap();
        assert_eq!(checks, 4);
        assert_eq!(server.active_sessions(), 0);
    }
}
