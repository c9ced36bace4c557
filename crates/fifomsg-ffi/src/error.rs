use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use fifomsg_rpc::{RpcError, Status};

use crate::types::FifomsgResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        // Interior NULs were replaced above, so this cannot fail.
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_bad_argument(message: impl Into<String>) -> FifomsgResult {
    set_error_message(message);
    FifomsgResult::BadArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_rpc_error(err: &RpcError) -> FifomsgResult {
    set_error_message(err.to_string());
    match err.status() {
        Status::Ok => FifomsgResult::Ok,
        Status::Failed => FifomsgResult::Failed,
        Status::BadArgument => FifomsgResult::BadArgument,
        Status::Timeout => FifomsgResult::Timeout,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
