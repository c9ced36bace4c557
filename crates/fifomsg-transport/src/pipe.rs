use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::PathBuf;
use std::ptr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use windows_sys::Win32::Foundation::{
    ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_PIPE_BUSY,
    ERROR_PIPE_CONNECTED, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_FAILED, WAIT_IO_COMPLETION, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileA, FILE_FLAG_OVERLAPPED, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeA, DisconnectNamedPipe, PeekNamedPipe,
    SetNamedPipeHandleState, WaitNamedPipeA, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{CreateEventW, ResetEvent, SetEvent, WaitForSingleObjectEx};

use crate::error::{Result, TransportError};
use crate::limits::MAX_NAME_LEN;
use crate::timeout::WaitTimeout;
use crate::traits::WaitReadable;

/// Poll interval for client-side readiness checks.
const PEEK_INTERVAL: Duration = Duration::from_millis(10);

fn pipe_name(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(TransportError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    CString::new(name).map_err(|_| TransportError::InvalidName(name.to_string()))
}

/// Outcome of starting an overlapped connect on a pipe instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// A client attached before the call; no completion will be signalled.
    Connected,
    /// The connect is in flight; the overlapped event fires on completion.
    Pending,
}

/// One server-side instance of a message-mode named pipe.
#[derive(Debug)]
pub struct PipeInstance {
    handle: OwnedHandle,
    name: String,
}

impl PipeInstance {
    /// Create a duplex, overlapped, message-mode pipe instance.
    ///
    /// `default_timeout` is what `WaitNamedPipe` uses on the client side when
    /// it passes `NMPWAIT_USE_DEFAULT_WAIT`.
    pub fn create(name: &str, buffer_size: u32, default_timeout: WaitTimeout) -> Result<Self> {
        let c_name = pipe_name(name)?;

        // SAFETY: `c_name` is NUL-terminated and outlives the call; a null
        // security descriptor selects the default.
        let raw = unsafe {
            CreateNamedPipeA(
                c_name.as_ptr().cast(),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                buffer_size,
                buffer_size,
                default_timeout.as_win32_millis(),
                ptr::null(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(TransportError::Create {
                path: PathBuf::from(name),
                source: io::Error::last_os_error(),
            });
        }

        trace!(name, "created pipe instance");
        Ok(Self {
            // SAFETY: `raw` is a freshly created, valid handle that nothing else owns.
            handle: unsafe { OwnedHandle::from_raw_handle(raw) },
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> HANDLE {
        self.handle.as_raw_handle()
    }

    /// Begin waiting for a client on this instance.
    ///
    /// # Safety
    ///
    /// `overlapped` must point to a zeroed `OVERLAPPED` with a valid event in
    /// `hEvent`, and must stay valid until the connect completes or the
    /// instance is closed.
    pub unsafe fn connect_overlapped(&self, overlapped: *mut OVERLAPPED) -> Result<ConnectState> {
        // SAFETY: upheld by the caller.
        let ok = unsafe { ConnectNamedPipe(self.raw(), overlapped) };
        if ok != 0 {
            // Overlapped connect always reports zero; treat success as pending.
            return Ok(ConnectState::Pending);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_IO_PENDING as i32 => Ok(ConnectState::Pending),
            Some(code) if code == ERROR_PIPE_CONNECTED as i32 => Ok(ConnectState::Connected),
            _ => Err(TransportError::Connect {
                path: PathBuf::from(&self.name),
                source: err,
            }),
        }
    }

    /// Drop the current client, leaving the instance reusable.
    pub fn disconnect(&self) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        if unsafe { DisconnectNamedPipe(self.raw()) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Give up the instance wrapper and keep only the handle.
    pub fn into_handle(self) -> OwnedHandle {
        self.handle
    }
}

/// A manual-reset Win32 event.
#[derive(Debug)]
pub struct Event {
    handle: OwnedHandle,
}

impl Event {
    pub fn new_manual_reset(initially_signaled: bool) -> Result<Self> {
        // SAFETY: all pointer arguments are null, which requests defaults.
        let raw = unsafe {
            CreateEventW(ptr::null(), 1, i32::from(initially_signaled), ptr::null())
        };
        if raw.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            // SAFETY: `raw` is a freshly created, valid handle that nothing else owns.
            handle: unsafe { OwnedHandle::from_raw_handle(raw) },
        })
    }

    pub fn raw(&self) -> HANDLE {
        self.handle.as_raw_handle()
    }

    pub fn set(&self) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        if unsafe { SetEvent(self.raw()) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        if unsafe { ResetEvent(self.raw()) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

/// Result of an alertable wait on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertableWait {
    /// The event was signalled.
    Signaled,
    /// One or more I/O completion routines ran on this thread.
    IoCompletion,
    /// The bound elapsed.
    TimedOut,
}

/// Wait on `event` in an alertable state so queued completion routines run.
pub fn wait_alertable(event: &Event, timeout: WaitTimeout) -> Result<AlertableWait> {
    // SAFETY: the event handle is valid for the duration of the call.
    let rc = unsafe { WaitForSingleObjectEx(event.raw(), timeout.as_win32_millis(), 1) };
    match rc {
        WAIT_OBJECT_0 => Ok(AlertableWait::Signaled),
        WAIT_IO_COMPLETION => Ok(AlertableWait::IoCompletion),
        WAIT_TIMEOUT => Ok(AlertableWait::TimedOut),
        WAIT_FAILED => Err(io::Error::last_os_error().into()),
        other => Err(io::Error::other(format!("unexpected wait result {other:#x}")).into()),
    }
}

/// Connect to a named pipe server, waiting up to `timeout` for a free instance.
///
/// The returned handle is switched to message read mode.
pub fn connect_client(name: &str, timeout: WaitTimeout) -> Result<File> {
    let c_name = pipe_name(name)?;
    let deadline = timeout.deadline_from(Instant::now());
    let connect_err = |source: io::Error| TransportError::Connect {
        path: PathBuf::from(name),
        source,
    };

    loop {
        // SAFETY: `c_name` is NUL-terminated and outlives the call.
        let raw = unsafe {
            CreateFileA(
                c_name.as_ptr().cast(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };

        if raw != INVALID_HANDLE_VALUE {
            // SAFETY: `raw` is a freshly opened, valid handle that nothing else owns.
            let file = unsafe { File::from_raw_handle(raw) };
            let mode = PIPE_READMODE_MESSAGE;
            // SAFETY: `mode` outlives the call; the other parameters are left unchanged.
            let ok = unsafe {
                SetNamedPipeHandleState(file.as_raw_handle(), &mode, ptr::null(), ptr::null())
            };
            if ok == 0 {
                return Err(connect_err(io::Error::last_os_error()));
            }
            debug!(name, "connected to pipe server");
            return Ok(file);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_PIPE_BUSY as i32 => {
                let wait_ms = match deadline {
                    None => u32::MAX,
                    Some(deadline) => {
                        let left = WaitTimeout::remaining_millis(Some(deadline));
                        if left <= 0 {
                            return Err(TransportError::Timeout(timeout));
                        }
                        left as u32
                    }
                };
                trace!(name, wait_ms, "all pipe instances busy; waiting");
                // SAFETY: `c_name` is NUL-terminated and outlives the call.
                if unsafe { WaitNamedPipeA(c_name.as_ptr().cast(), wait_ms) } == 0
                    && deadline.is_some_and(|deadline| Instant::now() >= deadline)
                {
                    return Err(TransportError::Timeout(timeout));
                }
            }
            _ => return Err(connect_err(err)),
        }
    }
}

/// Bytes queued on a pipe, or `None` once the other end is gone.
pub fn peek_available(file: &File) -> Result<Option<u32>> {
    let mut available = 0u32;
    // SAFETY: a null buffer with zero length only queries counts; `available`
    // is a valid out-pointer for the duration of the call.
    let ok = unsafe {
        PeekNamedPipe(
            file.as_raw_handle(),
            ptr::null_mut(),
            0,
            ptr::null_mut(),
            &mut available,
            ptr::null_mut(),
        )
    };
    if ok == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
            return Ok(None);
        }
        return Err(err.into());
    }
    Ok(Some(available))
}

impl WaitReadable for File {
    fn wait_readable(&self, timeout: WaitTimeout) -> Result<bool> {
        // A blocking read on a message pipe already waits forever.
        if timeout.is_infinite() {
            return Ok(true);
        }
        let deadline = timeout.deadline_from(Instant::now());

        loop {
            match peek_available(self)? {
                None => return Ok(true),
                Some(n) if n > 0 => return Ok(true),
                Some(_) => {}
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            std::thread::sleep(PEEK_INTERVAL);
        }
    }
}
