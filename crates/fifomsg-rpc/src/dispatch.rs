use fifomsg_frame::MessageFrame;

/// Turns one request into one reply.
///
/// Called synchronously from a session loop. On the named-pipe backend it
/// runs on the thread that services every other session, so it must return
/// promptly. An empty reply is still written back to the client.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: &MessageFrame) -> MessageFrame;
}

impl<F> Dispatch for F
where
    F: Fn(&MessageFrame) -> MessageFrame + Send + Sync,
{
    fn dispatch(&self, request: &MessageFrame) -> MessageFrame {
        self(request)
    }
}

/// Replies with the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Dispatch for Echo {
    fn dispatch(&self, request: &MessageFrame) -> MessageFrame {
        request.clone()
    }
}

/// Replies with the same body to every request.
#[derive(Debug, Clone, Default)]
pub struct FixedReply(pub MessageFrame);

impl Dispatch for FixedReply {
    fn dispatch(&self, _request: &MessageFrame) -> MessageFrame {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_dispatch() {
        let upper = |request: &MessageFrame| {
            MessageFrame::new(request.body().to_ascii_uppercase())
        };
        let reply = upper.dispatch(&MessageFrame::new("abc"));
        assert_eq!(reply.body(), b"ABC");
    }

    #[test]
    fn echo_and_fixed_reply() {
        let request = MessageFrame::new("ping");
        assert_eq!(Echo.dispatch(&request), request);

        let fixed = FixedReply(MessageFrame::new("pong"));
        assert_eq!(fixed.dispatch(&request).body(), b"pong");
    }
}
