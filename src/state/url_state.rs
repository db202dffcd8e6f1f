/// Lifecycle states of URL rows in the frontier
use std::fmt;
use std::str::FromStr;

use super::UnknownState;

/// Represents the current state of one URL row (one repetition of one target)
///
/// Repetition 1 rows are inserted `Free`; repetitions 2..N are inserted
/// `Waiting` and only leave that state when explicitly claimed for the
/// matching URL, depth and repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlState {
    /// Claimable by the frontier's repetition-1 selection
    Free,

    /// Repetition > 1 not yet requested by the worker
    Waiting,

    /// Claimed by the worker owning the task
    Progress,

    /// Result recorded; immutable from here on
    Complete,
}

impl UrlState {
    /// Returns true if no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns true if the row may still be claimed
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Free | Self::Waiting)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Waiting => "waiting",
            Self::Progress => "progress",
            Self::Complete => "complete",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "waiting" => Some(Self::Waiting),
            "progress" => Some(Self::Progress),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    /// Returns all possible URL states
    pub fn all_states() -> [Self; 4] {
        [Self::Free, Self::Waiting, Self::Progress, Self::Complete]
    }
}

impl FromStr for UrlState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(s).ok_or_else(|| UnknownState(s.to_string()))
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
