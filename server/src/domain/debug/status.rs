//! Debug request lifecycle
//!
//! ```text
//! Init ──span seen──▶ Success
//!  │ └──timeout─────▶ Fail
//!  └──stop──────────▶ Stop      (stop is accepted from any state)
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::core::constants::DEBUG_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DebugStatus {
    Init = 0,
    Success = 1,
    Fail = 2,
    Stop = 3,
}

impl DebugStatus {
    /// Unknown codes read from storage are `None`
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Init),
            1 => Some(Self::Success),
            2 => Some(Self::Fail),
            3 => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Stop => "stop",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Init)
    }

    /// Next state after a poll
    ///
    /// `elapsed` is the time since the record was last updated.
    pub fn poll(self, span_seen: bool, elapsed: Duration) -> Self {
        match self {
            Self::Init if span_seen => Self::Success,
            Self::Init if elapsed > Duration::from_secs(DEBUG_TIMEOUT_SECS) => Self::Fail,
            other => other,
        }
    }

    pub fn stop(self) -> Self {
        Self::Stop
    }
}

impl fmt::Display for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_codes_round_trip() {
        for status in [
            DebugStatus::Init,
            DebugStatus::Success,
            DebugStatus::Fail,
            DebugStatus::Stop,
        ] {
            assert_eq!(DebugStatus::from_i32(status.code()), Some(status));
        }
        assert_eq!(DebugStatus::from_i32(7), None);
    }

    #[test]
    fn test_init_succeeds_when_span_seen() {
        assert_eq!(DebugStatus::Init.poll(true, MINUTE), DebugStatus::Success);
        // Span arrival wins even past the timeout
        assert_eq!(DebugStatus::Init.poll(true, 30 * MINUTE), DebugStatus::Success);
    }

    #[test]
    fn test_init_fails_after_timeout() {
        assert_eq!(DebugStatus::Init.poll(false, 19 * MINUTE), DebugStatus::Init);
        assert_eq!(DebugStatus::Init.poll(false, 20 * MINUTE), DebugStatus::Init);
        assert_eq!(
            DebugStatus::Init.poll(false, 20 * MINUTE + Duration::from_secs(1)),
            DebugStatus::Fail
        );
    }

    #[test]
    fn test_terminal_states_are_stable() {
        for status in [DebugStatus::Success, DebugStatus::Fail, DebugStatus::Stop] {
            assert!(status.is_terminal());
            assert_eq!(status.poll(true, 60 * MINUTE), status);
        }
        assert!(!DebugStatus::Init.is_terminal());
    }

    #[test]
    fn test_stop_from_any_state() {
        assert_eq!(DebugStatus::Init.stop(), DebugStatus::Stop);
        assert_eq!(DebugStatus::Success.stop(), DebugStatus::Stop);
    }
}
