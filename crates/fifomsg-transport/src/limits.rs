//! Platform limits shared by every layer.

/// Largest write the platform guarantees to deliver atomically on a pipe.
///
/// This is `PIPE_BUF` from `<limits.h>` on Unix and the fixed message buffer
/// size used for Windows pipe instances.
#[cfg(any(target_os = "linux", target_os = "android", windows))]
pub const ATOMIC_WRITE_LIMIT: usize = 4096;

/// Largest write the platform guarantees to deliver atomically on a pipe.
///
/// POSIX only promises 512 bytes; Darwin and the BSDs stay at that minimum.
#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
pub const ATOMIC_WRITE_LIMIT: usize = 512;

/// Maximum length of an endpoint name, in bytes.
pub const MAX_NAME_LEN: usize = 255;
