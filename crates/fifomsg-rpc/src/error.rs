use fifomsg_frame::FrameError;
use fifomsg_transport::{TransportError, WaitTimeout};

/// Errors that can occur in request/reply operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[source] FrameError),

    /// The caller passed something that cannot be sent; nothing was written.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// No reply arrived within the wait bound.
    #[error("no reply within {0}")]
    Timeout(WaitTimeout),

    /// The peer closed its end of the channel.
    #[error("peer disconnected")]
    Disconnected,

    /// The rendezvous control frame was malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server could not create or keep its listening resources.
    #[error("server setup failed: {0}")]
    Setup(String),
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => Self::Disconnected,
            other => Self::Frame(other),
        }
    }
}

impl RpcError {
    /// Wrap any setup failure as fatal to the server.
    pub(crate) fn setup(err: impl std::fmt::Display) -> Self {
        Self::Setup(err.to_string())
    }

    /// The status code reported at the C boundary and by the CLI.
    pub fn status(&self) -> Status {
        match self {
            Self::BadArgument(_) => Status::BadArgument,
            Self::Timeout(_) | Self::Transport(TransportError::Timeout(_)) => Status::Timeout,
            _ => Status::Failed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status() == Status::Timeout
    }
}

/// Outcome codes shared with C callers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    Failed = -1,
    BadArgument = -2,
    Timeout = -3,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.status(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_c_values() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Failed.code(), -1);
        assert_eq!(Status::BadArgument.code(), -2);
        assert_eq!(Status::Timeout.code(), -3);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            RpcError::BadArgument("too big".into()).status(),
            Status::BadArgument
        );
        assert_eq!(
            RpcError::Timeout(WaitTimeout::from_millis(100)).status(),
            Status::Timeout
        );
        assert_eq!(
            RpcError::from(TransportError::Timeout(WaitTimeout::Immediate)).status(),
            Status::Timeout
        );
        // A peer announcing an oversized reply is a channel failure, not a
        // caller mistake.
        assert_eq!(
            RpcError::from(FrameError::PayloadTooLarge { size: 5000, max: 4092 }).status(),
            Status::Failed
        );
        assert_eq!(RpcError::Disconnected.status(), Status::Failed);
        assert_eq!(RpcError::Setup("boom".into()).status(), Status::Failed);
        assert_eq!(
            RpcError::from(FrameError::Truncated {
                expected: 8,
                received: 3
            })
            .status(),
            Status::Failed
        );
    }

    #[test]
    fn connection_closed_becomes_disconnected() {
        let err = RpcError::from(FrameError::ConnectionClosed);
        assert!(matches!(err, RpcError::Disconnected));
    }

    #[test]
    fn status_from_result() {
        let ok: Result<()> = Ok(());
        let timed_out: Result<()> = Err(RpcError::Timeout(WaitTimeout::Immediate));
        assert_eq!(Status::from(&ok), Status::Ok);
        assert_eq!(Status::from(&timed_out), Status::Timeout);
    }
}
