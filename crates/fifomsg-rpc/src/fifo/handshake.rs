use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use fifomsg_frame::MessageFrame;
use fifomsg_transport::{TransportError, MAX_NAME_LEN};

use crate::error::{Result, RpcError};

/// Longest suffix a client may announce.
pub const SUFFIX_MAX_LEN: usize = 19;

/// Appended to the request path to name the reply FIFO.
pub const REPLY_SUFFIX: &str = "-read";

/// Room a base name must leave for `.<suffix>-read`.
pub const SUFFIX_RESERVE: usize = 1 + SUFFIX_MAX_LEN + REPLY_SUFFIX.len();

/// Longest server base name.
pub const MAX_BASE_LEN: usize = MAX_NAME_LEN - SUFFIX_RESERVE;

static NEXT_SUFFIX: AtomicU32 = AtomicU32::new(0);

/// The two per-client FIFOs derived from a base name and a suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousPaths {
    /// `<base>.<suffix>`: client writes, server reads.
    pub request: PathBuf,
    /// `<base>.<suffix>-read`: server writes, client reads.
    pub reply: PathBuf,
}

/// Check a server base name leaves room for any client suffix.
pub fn validate_base_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(TransportError::InvalidName(name.to_string()).into());
    }
    if name.len() > MAX_BASE_LEN {
        return Err(TransportError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
            max: MAX_BASE_LEN,
        }
        .into());
    }
    Ok(())
}

/// Suffixes are 1..=19 characters from `[A-Za-z0-9_-]`.
pub fn validate_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() || suffix.len() > SUFFIX_MAX_LEN {
        return Err(RpcError::Handshake(format!(
            "suffix must be 1..={SUFFIX_MAX_LEN} characters, got {}",
            suffix.len()
        )));
    }
    if let Some(bad) = suffix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(RpcError::Handshake(format!(
            "suffix contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// A suffix unique within this process: `<pid>-<sequence>`.
pub fn default_suffix() -> String {
    let seq = NEXT_SUFFIX.fetch_add(1, Ordering::Relaxed) % 100_000_000;
    format!("{}-{seq}", std::process::id())
}

pub fn derive_paths(base: &str, suffix: &str) -> RendezvousPaths {
    let request = format!("{base}.{suffix}");
    let reply = format!("{request}{REPLY_SUFFIX}");
    RendezvousPaths {
        request: PathBuf::from(request),
        reply: PathBuf::from(reply),
    }
}

/// The control frame a client sends on the well-known FIFO: `.<suffix>\0`.
pub fn encode_request(suffix: &str) -> MessageFrame {
    let mut body = Vec::with_capacity(suffix.len() + 2);
    body.push(b'.');
    body.extend_from_slice(suffix.as_bytes());
    body.push(0);
    MessageFrame::new(body)
}

/// Extract and validate the suffix from a control frame.
///
/// Accepts the body with or without the leading `.` and trailing NULs.
pub fn decode_request(frame: &MessageFrame) -> Result<String> {
    let mut body = frame.body();
    while let [rest @ .., 0] = body {
        body = rest;
    }
    let body = body.strip_prefix(b".").unwrap_or(body);

    let suffix = std::str::from_utf8(body)
        .map_err(|_| RpcError::Handshake("suffix is not valid UTF-8".to_string()))?;
    validate_suffix(suffix)?;
    Ok(suffix.to_string())
}
