use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};

use fifomsg_rpc::{Dispatch, MessageFrame, Server, ServerConfig};
use tracing::warn;

use crate::args;
use crate::error;
use crate::types::{
    FifomsgOnPipeMsg, FifomsgPipeMsg, FifomsgResult, FifomsgServerHandle, FifomsgServerLoop,
    ServerHandle, DEFAULT_NAME_C,
};

/// Adapts a C message callback to [`Dispatch`].
struct CallbackDispatch {
    callback: unsafe extern "C" fn(*const FifomsgPipeMsg, *mut FifomsgPipeMsg, *mut c_void),
    arg: *mut c_void,
}

// SAFETY: `fifomsg_server_runforever` requires the callback and its argument
// to be callable from any server thread, concurrently on the FIFO backend.
unsafe impl Send for CallbackDispatch {}
// SAFETY: see above.
unsafe impl Sync for CallbackDispatch {}

impl Dispatch for CallbackDispatch {
    fn dispatch(&self, request: &MessageFrame) -> MessageFrame {
        let mut incoming = Box::<FifomsgPipeMsg>::default();
        incoming.fill(request.body());
        let mut reply = Box::<FifomsgPipeMsg>::default();

        // SAFETY: both messages are valid for the duration of the call.
        unsafe { (self.callback)(&*incoming, &mut *reply, self.arg) };

        match reply.body() {
            Some(body) => MessageFrame::new(body.to_vec()),
            None => {
                warn!(msgsz = reply.msgsz, "callback set an invalid reply size; replying empty");
                MessageFrame::empty()
            }
        }
    }
}

/// Create a server listening on `pipename` (NULL selects the default).
///
/// Timeouts are in milliseconds; negative waits forever.
///
/// # Safety
/// `pipename` must be null or a valid NUL-terminated C string. `out` must be
/// a valid pointer to writable handle storage.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_server_new(
    pipename: *const c_char,
    client_timeout: c_int,
    connect_timeout: c_int,
    out: *mut FifomsgServerHandle,
) -> FifomsgResult {
    crate::ffi_boundary(FifomsgResult::Failed, || {
        error::clear_error_state();

        if out.is_null() {
            return error::set_bad_argument("out cannot be null");
        }
        // SAFETY: null and UTF-8 are validated in the helper.
        let Ok(name) = (unsafe { args::optional_str_arg(pipename, "pipename") }) else {
            return FifomsgResult::BadArgument;
        };

        let mut config = ServerConfig::default()
            .with_client_timeout(args::timeout_arg(client_timeout))
            .with_connect_timeout(args::timeout_arg(connect_timeout));
        if let Some(name) = name {
            config = config.with_name(name);
        }

        match Server::create(config) {
            Ok(server) => {
                let name = match CString::new(server.name()) {
                    Ok(name) => name,
                    Err(_) => return error::set_bad_argument("pipename contains NUL"),
                };
                let handle = Box::new(ServerHandle { server, name });
                // SAFETY: `out` was checked for null; validity is guaranteed by the caller.
                unsafe { *out = Box::into_raw(handle).cast() };
                FifomsgResult::Ok
            }
            Err(err) => error::map_rpc_error(&err),
        }
    })
}

/// Serve until `loop_cb` returns 0 (forever when it is NULL).
///
/// # Safety
/// `server` must be a handle from `fifomsg_server_new`. `msg_cb` and
/// `msg_arg` must be safe to call from several threads at once; `loop_cb` is
/// called from the calling thread only.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_server_runforever(
    server: FifomsgServerHandle,
    msg_cb: FifomsgOnPipeMsg,
    msg_arg: *mut c_void,
    loop_cb: FifomsgServerLoop,
    loop_arg: *mut c_void,
) -> FifomsgResult {
    crate::ffi_boundary(FifomsgResult::Failed, || {
        error::clear_error_state();

        if server.is_null() {
            return error::set_bad_argument("server cannot be null");
        }
        let Some(callback) = msg_cb else {
            return error::set_bad_argument("msg_cb cannot be null");
        };

        let handle = {
            // SAFETY: Pointer validity is guaranteed by the caller.
            unsafe { &mut *server.cast::<ServerHandle>() }
        };
        let dispatch = CallbackDispatch {
            callback,
            arg: msg_arg,
        };
        let keep_running = || match loop_cb {
            // SAFETY: the caller guarantees `loop_cb` accepts `loop_arg`.
            Some(cb) => (unsafe { cb(loop_arg) }) != 0,
            None => true,
        };

        match handle.server.run_forever(dispatch, keep_running) {
            Ok(()) => FifomsgResult::Ok,
            Err(err) => error::map_rpc_error(&err),
        }
    })
}

/// Free a server handle. NULL is ignored.
///
/// # Safety
/// `server` must be null or a handle from `fifomsg_server_new` that is not
/// in use by `fifomsg_server_runforever`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_server_free(server: FifomsgServerHandle) {
    crate::ffi_boundary((), || {
        if server.is_null() {
            return;
        }
        // SAFETY: the handle was created by Box::into_raw in fifomsg_server_new.
        unsafe { drop(Box::from_raw(server.cast::<ServerHandle>())) };
    });
}

/// The server's listen name, or the platform default for NULL.
///
/// The string is owned by the handle (or static) and must not be freed.
///
/// # Safety
/// `server` must be null or a valid handle from `fifomsg_server_new`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_server_get_pipename(server: FifomsgServerHandle) -> *const c_char {
    crate::ffi_boundary(std::ptr::null(), || {
        if server.is_null() {
            return DEFAULT_NAME_C.as_ptr();
        }
        // SAFETY: Pointer validity is guaranteed by the caller.
        let handle = unsafe { &*server.cast::<ServerHandle>() };
        handle.name.as_ptr()
    })
}
