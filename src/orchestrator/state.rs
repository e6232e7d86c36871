use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

/// Where a run is. Runs only move forward, and may jump to `Done` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Resolving,
    Verifying,
    Invalidating,
    Building,
    Starting,
    PollingReady,
    Done(Verdict),
}

impl RunState {
    fn rank(self) -> u8 {
        match self {
            RunState::Resolving => 0,
            RunState::Verifying => 1,
            RunState::Invalidating => 2,
            RunState::Building => 3,
            RunState::Starting => 4,
            RunState::PollingReady => 5,
            RunState::Done(_) => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done(_))
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunState::Done(_) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Resolving => write!(f, "resolving"),
            RunState::Verifying => write!(f, "verifying"),
            RunState::Invalidating => write!(f, "invalidating"),
            RunState::Building => write!(f, "building"),
            RunState::Starting => write!(f, "starting"),
            RunState::PollingReady => write!(f, "polling-ready"),
            RunState::Done(Verdict::Success) => write!(f, "done (success)"),
            RunState::Done(Verdict::Failure) => write!(f, "done (failure)"),
        }
    }
}
