/// Lifecycle states of crawl tasks
use std::fmt;
use std::str::FromStr;

use super::UnknownState;

/// Represents the lifecycle of one task (one job against one site)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Seeded and not yet owned by any worker
    Free,

    /// Owned by a worker; may carry a progress blob
    Progress,

    /// Frontier exhausted; the progress blob has been cleared
    Complete,

    /// Stopped by an unrecoverable worker failure; the progress blob is kept
    Aborted,
}

impl TaskState {
    /// Returns true if the task will not be picked up again by a normal claim
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "progress" => Some(Self::Progress),
            "complete" => Some(Self::Complete),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn all_states() -> [Self; 4] {
        [Self::Free, Self::Progress, Self::Complete, Self::Aborted]
    }
}

impl FromStr for TaskState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(s).ok_or_else(|| UnknownState(s.to_string()))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
