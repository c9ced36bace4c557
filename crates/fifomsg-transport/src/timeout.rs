use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Bound on a blocking wait.
///
/// Mirrors the millisecond encoding used throughout the public API:
/// negative means wait forever, zero means poll once, positive is a bound
/// in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitTimeout {
    /// Block until the channel is ready.
    #[default]
    Infinite,
    /// Check readiness once and return immediately.
    Immediate,
    /// Block for at most this long.
    Bounded(Duration),
}

impl WaitTimeout {
    /// Decode the shared millisecond encoding.
    pub const fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self::Infinite
        } else if millis == 0 {
            Self::Immediate
        } else {
            Self::Bounded(Duration::from_millis(millis as u64))
        }
    }

    /// Encode back into milliseconds (`-1` for infinite).
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Infinite => -1,
            Self::Immediate => 0,
            Self::Bounded(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_infinite(self) -> bool {
        matches!(self, Self::Infinite)
    }

    /// Absolute deadline for a wait starting at `start`, `None` if unbounded.
    pub fn deadline_from(self, start: Instant) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Immediate => Some(start),
            Self::Bounded(d) => Some(start + d),
        }
    }

    /// Time left until `deadline`, rounded up to whole milliseconds so a
    /// bounded wait never returns before its bound.
    ///
    /// Returns `-1` for no deadline, which is also `poll(2)`'s "forever".
    pub fn remaining_millis(deadline: Option<Instant>) -> i32 {
        let Some(deadline) = deadline else {
            return -1;
        };
        let left = deadline.saturating_duration_since(Instant::now());
        let mut millis = left.as_millis();
        if left > Duration::from_millis(millis as u64) {
            millis += 1;
        }
        i32::try_from(millis).unwrap_or(i32::MAX)
    }

    /// Milliseconds for Win32 wait functions (`INFINITE` is `u32::MAX`).
    pub fn as_win32_millis(self) -> u32 {
        match self {
            Self::Infinite => u32::MAX,
            Self::Immediate => 0,
            Self::Bounded(d) => u32::try_from(d.as_millis()).unwrap_or(u32::MAX - 1),
        }
    }
}

impl From<Duration> for WaitTimeout {
    fn from(value: Duration) -> Self {
        if value.is_zero() {
            Self::Immediate
        } else {
            Self::Bounded(value)
        }
    }
}

impl fmt::Display for WaitTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => f.write_str("infinite"),
            Self::Immediate => f.write_str("0ms"),
            Self::Bounded(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

/// Error returned when a timeout string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timeout {input:?}: expected -1, infinite, or a duration like 500ms or 5s")]
pub struct ParseTimeoutError {
    input: String,
}

impl FromStr for WaitTimeout {
    type Err = ParseTimeoutError;

    /// Accepts `-1`/`infinite`, `0`, bare milliseconds, `<n>ms` and `<n>s`.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = input.trim();
        let err = || ParseTimeoutError {
            input: input.to_string(),
        };

        if trimmed.eq_ignore_ascii_case("infinite") || trimmed.eq_ignore_ascii_case("forever") {
            return Ok(Self::Infinite);
        }

        if let Some(secs) = trimmed.strip_suffix("ms") {
            let millis: u64 = secs.trim().parse().map_err(|_| err())?;
            return Ok(Duration::from_millis(millis).into());
        }
        if let Some(secs) = trimmed.strip_suffix('s') {
            let secs: u64 = secs.trim().parse().map_err(|_| err())?;
            return Ok(Duration::from_secs(secs).into());
        }

        let millis: i64 = trimmed.parse().map_err(|_| err())?;
        Ok(Self::from_millis(millis))
    }
}
