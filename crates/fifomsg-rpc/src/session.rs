use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fifomsg_frame::{MessageFrame, MAX_BODY};
use tracing::{debug, trace, warn};

use crate::dispatch::Dispatch;

/// Where a session is in its request/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Reading,
    Dispatching,
    Writing,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent the zero-length close notice.
    CloseNotice,
    /// No request arrived within the client timeout.
    IdleTimeout,
    /// The client's end of the channel went away.
    Disconnected,
    /// A read, write or wait failed on this session's channel.
    Error,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CloseNotice => "close notice",
            Self::IdleTimeout => "idle timeout",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Counts live sessions across worker threads.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    active: Arc<AtomicUsize>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions not yet dropped.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn enter(&self) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard {
            active: Arc::clone(&self.active),
        }
    }
}

#[derive(Debug)]
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-connection protocol state, independent of the channel it runs on.
///
/// The backends own the channel handles and buffers; this type decides what
/// a received frame means and tracks the state machine
/// `Connected → Reading → Dispatching → Writing → Reading …`, ending in
/// `Closing → Closed`.
pub struct ConnectionSession {
    id: u64,
    state: SessionState,
    dispatch: Arc<dyn Dispatch>,
    served: u64,
    _active: ActiveGuard,
}

impl ConnectionSession {
    pub fn new(id: u64, dispatch: Arc<dyn Dispatch>, tracker: &SessionTracker) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            dispatch,
            served: 0,
            _active: tracker.enter(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, SessionState::Closing | SessionState::Closed)
    }

    /// Enter `Reading`, waiting for the next request.
    pub fn begin_read(&mut self) {
        debug_assert!(matches!(
            self.state,
            SessionState::Connected | SessionState::Writing | SessionState::Reading
        ));
        self.transition(SessionState::Reading);
    }

    /// Handle one received frame.
    ///
    /// Returns the reply to write, or `None` when the frame is the close
    /// notice, in which case the session moves to `Closing` and the dispatch
    /// callback is not invoked. Replies larger than one frame are cut to
    /// [`MAX_BODY`].
    pub fn handle_request(&mut self, request: &MessageFrame) -> Option<MessageFrame> {
        if request.is_empty() {
            trace!(session = self.id, "close notice received");
            self.transition(SessionState::Closing);
            return None;
        }

        self.transition(SessionState::Dispatching);
        let mut reply = self.dispatch.dispatch(request);
        if reply.size() > MAX_BODY {
            warn!(
                session = self.id,
                size = reply.size(),
                max = MAX_BODY,
                "reply exceeds frame capacity; truncating"
            );
            reply = MessageFrame::new(reply.into_body().slice(..MAX_BODY));
        }

        self.served += 1;
        self.transition(SessionState::Writing);
        Some(reply)
    }

    /// Enter `Closing` for `reason`.
    pub fn begin_close(&mut self, reason: CloseReason) {
        if self.state != SessionState::Closing {
            self.transition(SessionState::Closing);
        }
        debug!(
            session = self.id,
            reason = %reason,
            served = self.served,
            "closing session"
        );
    }

    /// Mark the channel resources as released.
    pub fn finish_close(&mut self) {
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        trace!(session = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("served", &self.served)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    fn counting_echo() -> (Arc<dyn Dispatch>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let dispatch: Arc<dyn Dispatch> = Arc::new(move |request: &MessageFrame| {
            counter.fetch_add(1, Ordering::SeqCst);
            request.clone()
        });
        (dispatch, calls)
    }

    #[test]
    fn request_reply_cycle() {
        let tracker = SessionTracker::new();
        let (dispatch, calls) = counting_echo();
        let mut session = ConnectionSession::new(7, dispatch, &tracker);
        assert_eq!(session.state(), SessionState::Connected);

        session.begin_read();
        assert_eq!(session.state(), SessionState::Reading);

        let reply = session.handle_request(&MessageFrame::new("hi")).unwrap();
        assert_eq!(reply.body(), b"hi");
        assert_eq!(session.state(), SessionState::Writing);
        assert_eq!(session.served(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        session.begin_read();
        assert_eq!(session.state(), SessionState::Reading);
    }

    #[test]
    fn close_notice_is_not_dispatched() {
        let tracker = SessionTracker::new();
        let (dispatch, calls) = counting_echo();
        let mut session = ConnectionSession::new(1, dispatch, &tracker);

        session.begin_read();
        assert!(session.handle_request(&MessageFrame::empty()).is_none());
        assert_eq!(session.state(), SessionState::Closing);
        assert!(!session.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        session.begin_close(CloseReason::CloseNotice);
        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn empty_reply_is_still_a_reply() {
        let tracker = SessionTracker::new();
        let silent: Arc<dyn Dispatch> = Arc::new(|_: &MessageFrame| MessageFrame::empty());
        let mut session = ConnectionSession::new(2, silent, &tracker);

        session.begin_read();
        let reply = session.handle_request(&MessageFrame::new("anything")).unwrap();
        assert!(reply.is_empty());
        assert_eq!(session.state(), SessionState::Writing);
    }

    #[test]
    fn oversized_reply_is_truncated() {
        let tracker = SessionTracker::new();
        let huge: Arc<dyn Dispatch> =
            Arc::new(|_: &MessageFrame| MessageFrame::new(vec![9u8; MAX_BODY + 100]));
        let mut session = ConnectionSession::new(3, huge, &tracker);

        session.begin_read();
        let reply = session.handle_request(&MessageFrame::new("x")).unwrap();
        assert_eq!(reply.size(), MAX_BODY);
        assert!(reply.validate().is_ok());
    }

    #[test]
    fn tracker_counts_live_sessions() {
        let tracker = SessionTracker::new();
        let (dispatch, _) = counting_echo();

        let first = ConnectionSession::new(1, Arc::clone(&dispatch), &tracker);
        let second = ConnectionSession::new(2, dispatch, &tracker);
        assert_eq!(tracker.active(), 2);

        drop(first);
        assert_eq!(tracker.active(), 1);
        drop(second);
        assert_eq!(tracker.active(), 0);
    }
}
