//! Thread lifecycle status
//!
//! A unit moves through a closed set of states:
//!
//! ```text
//! ┌──────┐  configure  ┌───────┐  start()  ┌────────┐  settle  ┌─────────┐
//! │ Init │ ──────────► │ Ready │ ────────► │ Active │ ───────► │ Success │
//! └──────┘             └───────┘           └────────┘    │     └─────────┘
//!                                                        │     ┌─────────┐
//!                                                        └───► │  Error  │
//!                                                              └─────────┘
//! ```
//!
//! `Completed` (success or error) and `Started` (active or completed) are
//! derived from the current state, never stored.

use serde::{Deserialize, Serialize};

/// Bit values of each state, for callers that want the flag view.
pub mod flags {
    pub const INIT: u8 = 1;
    pub const READY: u8 = 1 << 1;
    pub const ACTIVE: u8 = 1 << 2;
    pub const SUCCESS: u8 = 1 << 3;
    pub const ERROR: u8 = 1 << 4;
    pub const COMPLETED: u8 = SUCCESS | ERROR;
    pub const STARTED: u8 = ACTIVE | COMPLETED;
}

/// Current lifecycle state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Constructed, not yet configured
    #[default]
    Init,
    /// Configured and waiting to be started
    Ready,
    /// Work is running
    Active,
    /// Work settled with a result
    Success,
    /// Work settled with an error
    Error,
}

impl ThreadStatus {
    /// Flag value of this state
    pub fn bits(self) -> u8 {
        match self {
            Self::Init => flags::INIT,
            Self::Ready => flags::READY,
            Self::Active => flags::ACTIVE,
            Self::Success => flags::SUCCESS,
            Self::Error => flags::ERROR,
        }
    }

    /// True if the state intersects `mask`
    pub fn matches(self, mask: u8) -> bool {
        self.bits() & mask != 0
    }

    pub fn is_init(self) -> bool {
        self == Self::Init
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    /// Settled, either way
    pub fn is_completed(self) -> bool {
        self.matches(flags::COMPLETED)
    }

    /// Left the ready state at some point
    pub fn is_started(self) -> bool {
        self.matches(flags::STARTED)
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Ready => write!(f, "ready"),
            Self::Active => write!(f, "active"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_predicates() {
        assert!(!ThreadStatus::Ready.is_started());
        assert!(!ThreadStatus::Ready.is_completed());

        assert!(ThreadStatus::Active.is_started());
        assert!(!ThreadStatus::Active.is_completed());

        for status in [ThreadStatus::Success, ThreadStatus::Error] {
            assert!(status.is_started());
            assert!(status.is_completed());
        }
    }

    #[test]
    fn test_flag_view() {
        assert_eq!(flags::COMPLETED, flags::SUCCESS | flags::ERROR);
        assert!(ThreadStatus::Error.matches(flags::COMPLETED));
        assert!(ThreadStatus::Active.matches(flags::STARTED));
        assert!(!ThreadStatus::Init.matches(flags::STARTED));
    }

    #[test]
    fn test_default_and_display() {
        assert_eq!(ThreadStatus::default(), ThreadStatus::Init);
        assert_eq!(ThreadStatus::Success.to_string(), "success");
        assert_eq!(
            serde_json::to_string(&ThreadStatus::Active).unwrap(),
            "\"active\""
        );
    }
}
