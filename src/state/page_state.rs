/// Page state definitions for frontier entries
use std::fmt;

/// Represents the current state of a URL in one crawl run's frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// Discovered and waiting for a worker
    Pending,

    /// Claimed by exactly one worker
    InFlight,

    /// Fetched and handed to the parser
    Done,

    /// Gave up on this page (fatal error, retries exhausted, parse failure)
    Failed,
}

impl PageState {
    /// Returns true if no further transition will happen in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the page still keeps the frontier from quiescing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns all possible page states
    pub fn all_states() -> [Self; 4] {
        [Self::Pending, Self::InFlight, Self::Done, Self::Failed]
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
