use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_int;

use fifomsg_rpc::{Client, Server, MAX_BODY};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifomsgResult {
    Ok = 0,
    Failed = -1,
    BadArgument = -2,
    Timeout = -3,
}

pub const FIFOMSG_S_OK: FifomsgResult = FifomsgResult::Ok;
pub const FIFOMSG_E_FAILED: FifomsgResult = FifomsgResult::Failed;
pub const FIFOMSG_E_BADARG: FifomsgResult = FifomsgResult::BadArgument;
pub const FIFOMSG_E_TIMEOUT: FifomsgResult = FifomsgResult::Timeout;

pub const FIFOMSG_TIME_INFINITE: c_int = -1;
pub const FIFOMSG_TIME_NOWAIT: c_int = 0;
pub const FIFOMSG_TIMEOUT: c_int = 6000;

/// Capacity of [`FifomsgPipeMsg::msgbuf`].
pub const FIFOMSG_MSGBUF_SIZE: usize = MAX_BODY;

#[cfg(unix)]
pub(crate) const DEFAULT_NAME_C: &CStr = c"/tmp/namedpipe-default";
#[cfg(windows)]
pub(crate) const DEFAULT_NAME_C: &CStr = c"\\\\.\\pipe\\namedpipe-default";

/// One message as C callers see it: `fifomsg_pipemsg_t`.
#[repr(C)]
#[derive(Clone)]
pub struct FifomsgPipeMsg {
    pub msgsz: i32,
    pub msgbuf: [u8; FIFOMSG_MSGBUF_SIZE],
}

impl FifomsgPipeMsg {
    pub fn new() -> Self {
        Self {
            msgsz: 0,
            msgbuf: [0; FIFOMSG_MSGBUF_SIZE],
        }
    }

    /// Copy `body` in. Callers have already bounded it to the buffer.
    pub(crate) fn fill(&mut self, body: &[u8]) {
        let len = body.len().min(FIFOMSG_MSGBUF_SIZE);
        self.msgbuf[..len].copy_from_slice(&body[..len]);
        self.msgsz = len as i32;
    }

    /// The body, or `None` when `msgsz` is negative or too large.
    pub(crate) fn body(&self) -> Option<&[u8]> {
        let len = usize::try_from(self.msgsz).ok()?;
        self.msgbuf.get(..len)
    }
}

impl Default for FifomsgPipeMsg {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FifomsgPipeMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifomsgPipeMsg")
            .field("msgsz", &self.msgsz)
            .finish_non_exhaustive()
    }
}

/// `fifomsg_onpipemsg_cb`: fill `reply` for `request`.
pub type FifomsgOnPipeMsg = Option<
    unsafe extern "C" fn(request: *const FifomsgPipeMsg, reply: *mut FifomsgPipeMsg, arg: *mut c_void),
>;

/// `fifomsg_serverloop_cb`: non-zero keeps the server running.
pub type FifomsgServerLoop = Option<unsafe extern "C" fn(arg: *mut c_void) -> c_int>;

pub type FifomsgServerHandle = *mut c_void;
pub type FifomsgClientHandle = *mut c_void;

pub(crate) struct ServerHandle {
    pub(crate) server: Server,
    pub(crate) name: CString,
}

pub(crate) struct ClientHandle {
    pub(crate) client: Client,
    pub(crate) name: CString,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_layout_matches_c_struct() {
        assert_eq!(std::mem::size_of::<FifomsgPipeMsg>(), 4 + MAX_BODY);
        assert_eq!(std::mem::offset_of!(FifomsgPipeMsg, msgbuf), 4);
    }

    #[test]
    fn body_rejects_out_of_range_sizes() {
        let mut msg = FifomsgPipeMsg::new();
        msg.fill(b"abc");
        assert_eq!(msg.body(), Some(&b"abc"[..]));

        msg.msgsz = -1;
        assert_eq!(msg.body(), None);
        msg.msgsz = MAX_BODY as i32 + 1;
        assert_eq!(msg.body(), None);
        msg.msgsz = MAX_BODY as i32;
        assert_eq!(msg.body().map(<[u8]>::len), Some(MAX_BODY));
    }

    #[test]
    fn default_name_matches_library() {
        assert_eq!(DEFAULT_NAME_C.to_str().unwrap(), fifomsg_rpc::DEFAULT_NAME);
    }
}
