use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use fifomsg_rpc::WaitTimeout;

use crate::error;

/// Convert an optional C string argument into UTF-8 `&str`.
///
/// `Ok(None)` means the caller passed NULL (use the default).
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn optional_str_arg<'a>(
    value: *const c_char,
    name: &str,
) -> Result<Option<&'a str>, ()> {
    if value.is_null() {
        return Ok(None);
    }

    let as_cstr = {
        // SAFETY: The caller guarantees `value` points to a valid NUL-terminated C string.
        unsafe { CStr::from_ptr(value) }
    };

    match as_cstr.to_str() {
        Ok(v) => Ok(Some(v)),
        Err(_) => {
            let _ = error::set_bad_argument(format!("{name} must be valid UTF-8"));
            Err(())
        }
    }
}

/// Milliseconds as C passes them: negative waits forever, 0 does not wait.
pub(crate) fn timeout_arg(millis: c_int) -> WaitTimeout {
    WaitTimeout::from_millis(i64::from(millis))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeout_conventions() {
        assert_eq!(timeout_arg(-1), WaitTimeout::Infinite);
        assert_eq!(timeout_arg(0), WaitTimeout::Immediate);
        assert_eq!(
            timeout_arg(6000),
            WaitTimeout::Bounded(Duration::from_millis(6000))
        );
    }

    #[test]
    fn null_name_is_default() {
        // SAFETY: null is explicitly allowed.
        let value = unsafe { optional_str_arg(std::ptr::null(), "name") };
        assert_eq!(value, Ok(None));
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        let raw = [0xFFu8, 0xFE, 0];
        // SAFETY: `raw` is NUL-terminated.
        let value = unsafe { optional_str_arg(raw.as_ptr().cast(), "name") };
        assert_eq!(value, Err(()));
    }
}
