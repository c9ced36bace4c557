use crate::error::Result;
use crate::timeout::WaitTimeout;

/// A channel end whose readiness can be awaited with a bounded wait.
///
/// On Unix this is a `poll(2)` on the descriptor. On Windows it peeks the
/// pipe for queued message bytes.
pub trait WaitReadable {
    /// Wait until a read would not block.
    ///
    /// Returns `Ok(true)` when data (or end-of-channel) is ready and
    /// `Ok(false)` when the bound elapsed first.
    fn wait_readable(&self, timeout: WaitTimeout) -> Result<bool>;
}
