use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use fifomsg_rpc::{Client, ClientConfig, ClientEndpoint, MessageFrame, MAX_BODY};

use crate::args;
use crate::error;
use crate::types::{
    ClientHandle, FifomsgClientHandle, FifomsgPipeMsg, FifomsgResult, DEFAULT_NAME_C,
};

fn with_client<T>(
    handle: FifomsgClientHandle,
    on_error: T,
    f: impl FnOnce(&mut ClientHandle) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_bad_argument("client handle cannot be null");
        return on_error;
    }

    let client_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &mut *handle.cast::<ClientHandle>() }
    };

    f(client_handle)
}

/// Connect to the server at `pipename` (NULL selects the default).
///
/// # Safety
/// `pipename` must be null or a valid NUL-terminated C string. `out` must be
/// a valid pointer to writable handle storage.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_client_new(
    pipename: *const c_char,
    wait_timeout: c_int,
    out: *mut FifomsgClientHandle,
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

        let mut config = ClientConfig::default().with_wait_timeout(args::timeout_arg(wait_timeout));
        if let Some(name) = name {
            config = config.with_name(name);
        }

        match Client::connect(config) {
            Ok(client) => {
                let name = match CString::new(ClientEndpoint::channel_name(&client)) {
                    Ok(name) => name,
                    Err(_) => return error::set_bad_argument("pipename contains NUL"),
                };
                let handle = Box::new(ClientHandle { client, name });
                // SAFETY: `out` was checked for null; validity is guaranteed by the caller.
                unsafe { *out = Box::into_raw(handle).cast() };
                FifomsgResult::Ok
            }
            Err(err) => error::map_rpc_error(&err),
        }
    })
}

/// Send `msg->msgsz` bytes of `msg->msgbuf` as one request.
///
/// # Safety
/// `client` must be a valid handle from `fifomsg_client_new`; `msg` must be
/// null or point to a readable `fifomsg_pipemsg_t`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_client_write(
    client: FifomsgClientHandle,
    msg: *const FifomsgPipeMsg,
) -> FifomsgResult {
    crate::ffi_boundary(FifomsgResult::Failed, || {
        error::clear_error_state();

        if msg.is_null() {
            return error::set_bad_argument("msg cannot be null");
        }
        // SAFETY: Pointer validity is guaranteed by the caller.
        let msg = unsafe { &*msg };
        let Some(body) = msg.body() else {
            return error::set_bad_argument(format!(
                "msgsz {} outside 0..={MAX_BODY}",
                msg.msgsz
            ));
        };

        with_client(client, FifomsgResult::BadArgument, |handle| {
            match handle.client.write(&MessageFrame::new(body.to_vec())) {
                Ok(()) => FifomsgResult::Ok,
                Err(err) => error::map_rpc_error(&err),
            }
        })
    })
}

/// Wait for one reply and copy it into `msg`.
///
/// # Safety
/// `client` must be a valid handle from `fifomsg_client_new`; `msg` must be
/// null or point to a writable `fifomsg_pipemsg_t`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_client_read(
    client: FifomsgClientHandle,
    msg: *mut FifomsgPipeMsg,
) -> FifomsgResult {
    crate::ffi_boundary(FifomsgResult::Failed, || {
        error::clear_error_state();

        if msg.is_null() {
            return error::set_bad_argument("msg cannot be null");
        }

        with_client(client, FifomsgResult::BadArgument, |handle| {
            match handle.client.read() {
                Ok(reply) => {
                    // SAFETY: Pointer validity is guaranteed by the caller.
                    let msg = unsafe { &mut *msg };
                    msg.fill(reply.body());
                    FifomsgResult::Ok
                }
                Err(err) => error::map_rpc_error(&err),
            }
        })
    })
}

/// Close and free a client handle. NULL is ignored.
///
/// # Safety
/// `client` must be null or a handle from `fifomsg_client_new`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_client_free(client: FifomsgClientHandle) {
    crate::ffi_boundary((), || {
        if client.is_null() {
            return;
        }
        // SAFETY: the handle was created by Box::into_raw in fifomsg_client_new.
        let mut handle = unsafe { Box::from_raw(client.cast::<ClientHandle>()) };
        if let Err(err) = handle.client.close() {
            error::set_error_message(err.to_string());
        }
    });
}

/// The channel this client owns (`<base>.<suffix>` on the FIFO backend,
/// the server pipe otherwise), or the platform default for NULL.
///
/// # Safety
/// `client` must be null or a valid handle from `fifomsg_client_new`.
#[no_mangle]
pub unsafe extern "C" fn fifomsg_client_get_pipename(client: FifomsgClientHandle) -> *const c_char {
    crate::ffi_boundary(std::ptr::null(), || {
        if client.is_null() {
            return DEFAULT_NAME_C.as_ptr();
        }
        // SAFETY: Pointer validity is guaranteed by the caller.
        let handle = unsafe { &*client.cast::<ClientHandle>() };
        handle.name.as_ptr()
    })
}
