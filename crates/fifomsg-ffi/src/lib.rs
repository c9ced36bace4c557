//! fifomsg-ffi: C-ABI exports for fifomsg servers and clients.
//!
//! The surface mirrors `include/fifomsg.h`. Every export catches panics and
//! records failures for `fifomsg_last_error()`.

mod args;
mod client;
mod error;
mod server;
mod types;

use std::panic::AssertUnwindSafe;

pub use client::{
    fifomsg_client_free, fifomsg_client_get_pipename, fifomsg_client_new, fifomsg_client_read,
    fifomsg_client_write,
};
pub use server::{
    fifomsg_server_free, fifomsg_server_get_pipename, fifomsg_server_new,
    fifomsg_server_runforever,
};
pub use types::{
    FifomsgClientHandle, FifomsgOnPipeMsg, FifomsgPipeMsg, FifomsgResult, FifomsgServerHandle,
    FifomsgServerLoop, FIFOMSG_E_BADARG, FIFOMSG_E_FAILED, FIFOMSG_E_TIMEOUT,
    FIFOMSG_MSGBUF_SIZE, FIFOMSG_S_OK, FIFOMSG_TIMEOUT, FIFOMSG_TIME_INFINITE,
    FIFOMSG_TIME_NOWAIT,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Message of the last failure on this thread, or an empty string.
#[no_mangle]
pub extern "C" fn fifomsg_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}

#[cfg(test)]
mod tests {
    use std::ffi::{c_void, CStr, CString};
    use std::os::raw::c_int;
    use std::ptr;
    use std::sync::atomic::{AtomicI32, Ordering};

    use super::*;

    fn last_error() -> String {
        let ptr = fifomsg_last_error();
        assert!(!ptr.is_null());
        // SAFETY: fifomsg_last_error returns a pointer to a thread-local CString.
        unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
    }

    #[test]
    fn last_error_starts_empty() {
        error::clear_error_state();
        assert!(last_error().is_empty());
    }

    #[test]
    fn panics_do_not_cross_the_boundary() {
        let result = ffi_boundary(FifomsgResult::Failed, || panic!("boom"));
        assert_eq!(result, FifomsgResult::Failed);
        assert_eq!(last_error(), "panic across FFI boundary");
    }

    #[test]
    fn null_handles_are_tolerated() {
        // SAFETY: null is documented as allowed for these calls.
        unsafe {
            fifomsg_server_free(ptr::null_mut());
            fifomsg_client_free(ptr::null_mut());

            let server_name = CStr::from_ptr(fifomsg_server_get_pipename(ptr::null_mut()));
            let client_name = CStr::from_ptr(fifomsg_client_get_pipename(ptr::null_mut()));
            assert_eq!(server_name.to_str().unwrap(), fifomsg_rpc::DEFAULT_NAME);
            assert_eq!(client_name, server_name);
        }
    }

    #[test]
    fn null_out_pointer_is_bad_argument() {
        // SAFETY: a null `out` is rejected before use.
        let result = unsafe { fifomsg_server_new(ptr::null(), 100, 100, ptr::null_mut()) };
        assert_eq!(result, FIFOMSG_E_BADARG);
        assert!(last_error().contains("out"));
    }

    #[test]
    fn invalid_msgsz_is_bad_argument_before_io() {
        let mut msg = FifomsgPipeMsg::new();
        for msgsz in [-1, FIFOMSG_MSGBUF_SIZE as i32 + 1] {
            msg.msgsz = msgsz;
            // SAFETY: the size check happens before the handle is touched.
            let result = unsafe { fifomsg_client_write(ptr::null_mut(), &msg) };
            assert_eq!(result, FIFOMSG_E_BADARG);
        }
    }

    #[test]
    fn connect_without_server_fails() {
        let name = CString::new(format!("{}-absent-{}", fifomsg_rpc::DEFAULT_NAME, std::process::id()))
            .unwrap();
        let mut client: FifomsgClientHandle = ptr::null_mut();
        // SAFETY: valid C string and out pointer.
        let result = unsafe { fifomsg_client_new(name.as_ptr(), 50, &mut client) };
        assert_eq!(result, FIFOMSG_E_FAILED);
        assert!(client.is_null());
        assert!(!last_error().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn round_trip_through_the_c_surface() {
        static ANSWERED: AtomicI32 = AtomicI32::new(0);

        unsafe extern "C" fn reply_cb(
            request: *const FifomsgPipeMsg,
            reply: *mut FifomsgPipeMsg,
            _arg: *mut c_void,
        ) {
            // SAFETY: the library passes valid messages.
            let (request, reply) = unsafe { (&*request, &mut *reply) };
            let len = request.msgsz as usize;
            reply.msgbuf[..len].copy_from_slice(&request.msgbuf[..len]);
            reply.msgbuf[..len].make_ascii_uppercase();
            reply.msgsz = request.msgsz;
            ANSWERED.fetch_add(1, Ordering::SeqCst);
        }

        unsafe extern "C" fn loop_cb(arg: *mut c_void) -> c_int {
            // SAFETY: `arg` points at the test's AtomicI32 stop flag.
            let stop = unsafe { &*arg.cast::<AtomicI32>() };
            c_int::from(stop.load(Ordering::SeqCst) == 0)
        }

        let dir = std::env::temp_dir().join(format!("fifomsg-ffi-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let name = CString::new(dir.join("server").to_str().unwrap()).unwrap();

        let mut server: FifomsgServerHandle = ptr::null_mut();
        // SAFETY: valid C string and out pointer.
        let result = unsafe { fifomsg_server_new(name.as_ptr(), 2000, 20, &mut server) };
        assert_eq!(result, FIFOMSG_S_OK);

        static STOP: AtomicI32 = AtomicI32::new(0);
        let server_addr = server as usize;
        let runner = std::thread::spawn(move || {
            // SAFETY: the handle stays alive until after this thread is joined.
            unsafe {
                fifomsg_server_runforever(
                    server_addr as FifomsgServerHandle,
                    Some(reply_cb),
                    ptr::null_mut(),
                    Some(loop_cb),
                    ptr::addr_of!(STOP).cast_mut().cast(),
                )
            }
        });

        let mut client: FifomsgClientHandle = ptr::null_mut();
        // SAFETY: valid C string and out pointer.
        let result = unsafe { fifomsg_client_new(name.as_ptr(), 2000, &mut client) };
        assert_eq!(result, FIFOMSG_S_OK);

        let mut msg = FifomsgPipeMsg::new();
        msg.fill(b"hello");
        // SAFETY: `client` and `msg` are valid.
        unsafe {
            assert_eq!(fifomsg_client_write(client, &msg), FIFOMSG_S_OK);
            let mut reply = FifomsgPipeMsg::new();
            assert_eq!(fifomsg_client_read(client, &mut reply), FIFOMSG_S_OK);
            assert_eq!(&reply.msgbuf[..reply.msgsz as usize], b"HELLO");

            let pipename = CStr::from_ptr(fifomsg_client_get_pipename(client));
            let own_prefix = format!("{}.{}-", name.to_str().unwrap(), std::process::id());
            assert!(
                pipename.to_str().unwrap().starts_with(&own_prefix),
                "{pipename:?} should name this client's request FIFO"
            );
            fifomsg_client_free(client);
        }

        STOP.store(1, Ordering::SeqCst);
        assert_eq!(runner.join().unwrap(), FIFOMSG_S_OK);
        assert_eq!(ANSWERED.load(Ordering::SeqCst), 1);

        // SAFETY: the server loop has returned.
        unsafe { fifomsg_server_free(server) };
        let _ = std::fs::remove_dir_all(dir);
    }
}
