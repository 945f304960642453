//! Supervisor state machine states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a supervised guest thread
///
/// `ForceYield` is transient: it is set by the budget hook right before it yields the
/// guest, and the resume loop turns it back into `Running`. It is never observed
/// after `run()` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    /// Created, not run yet
    #[default]
    Idle,
    /// Inside the resume loop
    Running,
    /// Budget hook requested a yield
    ForceYield,
    /// Budget hook aborted the guest (terminal)
    ForceTerminate,
    /// Guest yielded a plain value back to the caller
    Yield,
    /// Guest returned normally (terminal)
    Completed,
    /// Guest raised an uncaught error (terminal)
    Error,
}

impl ThreadState {
    /// Stable numeric code for this state
    pub fn code(self) -> u8 {
        match self {
            ThreadState::Idle => 0,
            ThreadState::Running => 1,
            ThreadState::ForceYield => 2,
            ThreadState::ForceTerminate => 3,
            ThreadState::Yield => 4,
            ThreadState::Completed => 6,
            ThreadState::Error => 7,
        }
    }

    /// Terminal states close the guest thread and release the script's name
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ThreadState::Completed | ThreadState::Error | ThreadState::ForceTerminate
        )
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThreadState::Idle => "idle",
            ThreadState::Running => "running",
            ThreadState::ForceYield => "force_yield",
            ThreadState::ForceTerminate => "force_terminate",
            ThreadState::Yield => "yield",
            ThreadState::Completed => "completed",
            ThreadState::Error => "error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ThreadState::Completed.is_terminal());
        assert!(ThreadState::Error.is_terminal());
        assert!(ThreadState::ForceTerminate.is_terminal());

        assert!(!ThreadState::Idle.is_terminal());
        assert!(!ThreadState::Running.is_terminal());
        assert!(!ThreadState::ForceYield.is_terminal());
        assert!(!ThreadState::Yield.is_terminal());
    }

    #[test]
    fn test_codes_skip_five() {
        assert_eq!(ThreadState::Yield.code(), 4);
        assert_eq!(ThreadState::Completed.code(), 6);
        assert_eq!(ThreadState::Error.code(), 7);
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&ThreadState::ForceTerminate).unwrap();
        assert_eq!(json, "\"force_terminate\"");
    }
}
