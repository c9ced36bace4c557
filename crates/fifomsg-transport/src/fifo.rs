use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::limits::MAX_NAME_LEN;
use crate::timeout::WaitTimeout;
use crate::traits::WaitReadable;

/// How often a rendezvous open re-checks for the peer's read side.
const RENDEZVOUS_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A FIFO special file owned by this process.
///
/// Created with `mkfifo(3)` and removed again on drop, unless the path was
/// replaced by something else in the meantime.
#[derive(Debug)]
pub struct FifoFile {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    cleanup_on_drop: bool,
}

impl FifoFile {
    /// Owner read/write, group and others read.
    pub const DEFAULT_MODE: u32 = 0o644;

    /// Create (or adopt an existing) FIFO at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_mode(path, Self::DEFAULT_MODE)
    }

    /// Create a FIFO with an explicit permission mode.
    ///
    /// An existing FIFO at `path` is adopted. Any other kind of file is
    /// left untouched and reported as an error.
    pub fn create_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len > MAX_NAME_LEN {
            return Err(TransportError::NameTooLong {
                name: path.display().to_string(),
                len,
                max: MAX_NAME_LEN,
            });
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| TransportError::InvalidName(path.display().to_string()))?;
        let create_err = |source: io::Error| TransportError::Create {
            path: path.clone(),
            source,
        };

        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::AlreadyExists {
                return Err(create_err(err));
            }
            let metadata = std::fs::symlink_metadata(&path).map_err(create_err)?;
            if !metadata.file_type().is_fifo() {
                return Err(create_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a fifo",
                )));
            }
            debug!(?path, "adopting existing fifo");
        } else {
            // mkfifo honours the umask; apply the requested mode explicitly.
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .map_err(create_err)?;
            debug!(?path, "created fifo");
        }

        let metadata = std::fs::symlink_metadata(&path).map_err(create_err)?;
        let created_inode = Some((metadata.dev(), metadata.ino()));

        Ok(Self {
            path,
            created_inode,
            cleanup_on_drop: true,
        })
    }

    /// The filesystem path of this FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FifoFile {
    fn drop(&mut self) {
        if !self.cleanup_on_drop {
            return;
        }
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_fifo()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing fifo");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "fifo path identity changed; skipping cleanup");
            }
        }
    }
}

/// Open the read side of a FIFO without blocking.
///
/// The descriptor is opened read/write, so it holds a writer reference of
/// its own: the open never waits for a peer and reads never see
/// end-of-channel when peers come and go.
pub fn open_read_nonblocking(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Open the write side of a FIFO that must already have a reader.
///
/// Fails with `ENXIO` instead of blocking when nobody has the FIFO open for
/// reading. The returned descriptor is switched back to blocking writes.
pub fn open_write_connected(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    let file = try_open_write(path).map_err(|source| TransportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    set_blocking(&file)?;
    Ok(file)
}

/// Open the write side of a FIFO, waiting up to `timeout` for a reader.
///
/// This is the last step of the rendezvous: the call completes once the
/// peer has opened the matching read side.
pub fn open_write_rendezvous(path: impl AsRef<Path>, timeout: WaitTimeout) -> Result<File> {
    let path = path.as_ref();
    let deadline = timeout.deadline_from(Instant::now());

    loop {
        match try_open_write(path) {
            Ok(file) => {
                set_blocking(&file)?;
                trace!(?path, "rendezvous write side open");
                return Ok(file);
            }
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(TransportError::Timeout(timeout));
                }
                std::thread::sleep(RENDEZVOUS_POLL_INTERVAL);
            }
            Err(source) => {
                return Err(TransportError::Open {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

fn try_open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Clear `O_NONBLOCK` on an open descriptor.
pub fn set_blocking(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: `fd` is an open descriptor owned by `file` for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }

    // SAFETY: as above; only the status flags of the descriptor change.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// Wait until `fd` is readable, the peer hung up, or `timeout` elapses.
pub fn wait_fd_readable(fd: BorrowedFd<'_>, timeout: WaitTimeout) -> Result<bool> {
    let deadline = timeout.deadline_from(Instant::now());

    loop {
        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let wait_ms = WaitTimeout::remaining_millis(deadline);

        // SAFETY: `pollfd` is a valid, writable array of one element and `fd` is
        // borrowed for the duration of the call.
        let rc = unsafe { libc::poll(&mut pollfd, 1, wait_ms) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if rc == 0 {
            if deadline.is_some_and(|deadline| Instant::now() < deadline) {
                // poll(2) may wake marginally early; honour the full bound.
                continue;
            }
            return Ok(false);
        }
        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        }
        return Ok(true);
    }
}

impl WaitReadable for File {
    fn wait_readable(&self, timeout: WaitTimeout) -> Result<bool> {
        wait_fd_readable(self.as_fd(), timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fifomsg-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_create_and_cleanup() {
        let dir = temp_dir("create");
        let path = dir.join("chan");

        let fifo = FifoFile::create(&path).unwrap();
        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(metadata.file_type().is_fifo());
        assert_eq!(metadata.permissions().mode() & 0o777, FifoFile::DEFAULT_MODE);

        drop(fifo);
        assert!(!path.exists(), "fifo should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_adopts_existing_fifo() {
        let dir = temp_dir("adopt");
        let path = dir.join("chan");

        let first = FifoFile::create(&path).unwrap();
        let second = FifoFile::create(&path).unwrap();
        assert_eq!(first.path(), second.path());

        drop(second);
        drop(first);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rejects_existing_regular_file() {
        let dir = temp_dir("regular");
        let path = dir.join("not-a-fifo");
        std::fs::write(&path, b"regular-file").unwrap();

        let result = FifoFile::create(&path);
        assert!(matches!(result, Err(TransportError::Create { .. })));
        assert!(path.exists(), "regular file must be left alone");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_name_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(300);
        let result = FifoFile::create(&long_path);
        assert!(matches!(
            result,
            Err(TransportError::NameTooLong { max: MAX_NAME_LEN, .. })
        ));
    }

    #[test]
    fn test_drop_does_not_remove_replaced_path() {
        let dir = temp_dir("replaced");
        let path = dir.join("chan");

        let fifo = FifoFile::create(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement").unwrap();

        drop(fifo);
        assert!(path.exists(), "drop must not remove a replaced path");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_write_without_reader_fails() {
        let dir = temp_dir("noreader");
        let fifo = FifoFile::create(dir.join("chan")).unwrap();

        let err = open_write_connected(fifo.path()).unwrap_err();
        match err {
            TransportError::Open { source, .. } => {
                assert_eq!(source.raw_os_error(), Some(libc::ENXIO));
            }
            other => panic!("unexpected error: {other}"),
        }

        drop(fifo);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_wait_readable_times_out_then_sees_data() {
        let dir = temp_dir("wait");
        let fifo = FifoFile::create(dir.join("chan")).unwrap();
        let mut reader = open_read_nonblocking(fifo.path()).unwrap();

        let start = Instant::now();
        let ready = reader
            .wait_readable(WaitTimeout::from_millis(50))
            .unwrap();
        assert!(!ready);
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert!(!reader.wait_readable(WaitTimeout::Immediate).unwrap());

        let mut writer = open_write_connected(fifo.path()).unwrap();
        writer.write_all(b"ping").unwrap();

        assert!(reader.wait_readable(WaitTimeout::Infinite).unwrap());
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        drop(fifo);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rendezvous_open_times_out_without_reader() {
        let dir = temp_dir("rdv-timeout");
        let fifo = FifoFile::create(dir.join("chan")).unwrap();

        let start = Instant::now();
        let result = open_write_rendezvous(fifo.path(), WaitTimeout::from_millis(40));
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(40));

        drop(fifo);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rendezvous_open_completes_when_reader_arrives() {
        let dir = temp_dir("rdv");
        let fifo = FifoFile::create(dir.join("chan")).unwrap();
        let path = fifo.path().to_path_buf();

        let reader_thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let mut reader = open_read_nonblocking(&path).unwrap();
            assert!(reader
                .wait_readable(WaitTimeout::from_millis(2000))
                .unwrap());
            let mut buf = [0u8; 5];
            reader.read_exact(&mut buf).unwrap();
            buf
        });

        let mut writer = open_write_rendezvous(fifo.path(), WaitTimeout::from_millis(2000)).unwrap();
        writer.write_all(b"hello").unwrap();

        assert_eq!(&reader_thread.join().unwrap(), b"hello");
        drop(fifo);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
