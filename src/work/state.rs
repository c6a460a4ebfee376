//! Job state machine.
//!
//! ```text
//! Created --> Active|Executing --> Active|Finished
//!    |               |
//!    +---------------+----------> Error | Aborted
//! ```
//!
//! States only move forward; terminal states never change.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobPhase {
    Created,
    Executing,
    Finished,
    Error,
    Aborted,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Finished | JobPhase::Error | JobPhase::Aborted)
    }

    fn rank(self) -> u8 {
        match self {
            JobPhase::Created => 0,
            JobPhase::Executing => 1,
            JobPhase::Finished | JobPhase::Error | JobPhase::Aborted => 2,
        }
    }
}

/// A phase plus whether the job is (or was, at that marker) running.
/// Only the combinations offered by the constructors are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobState {
    phase: JobPhase,
    active: bool,
}

impl JobState {
    pub const CREATED: JobState = JobState {
        phase: JobPhase::Created,
        active: false,
    };
    pub const EXECUTING: JobState = JobState {
        phase: JobPhase::Executing,
        active: true,
    };
    pub const FINISHED: JobState = JobState {
        phase: JobPhase::Finished,
        active: true,
    };
    pub const ERROR: JobState = JobState {
        phase: JobPhase::Error,
        active: false,
    };
    pub const ABORTED: JobState = JobState {
        phase: JobPhase::Aborted,
        active: false,
    };

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_error(&self) -> bool {
        self.phase == JobPhase::Error
    }

    /// Forward moves only, and never out of a terminal state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.phase.rank() > self.phase.rank()
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::CREATED
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.active {
            write!(f, "Active|{:?}", self.phase)
        } else {
            write!(f, "{:?}", self.phase)
        }
    }
}
