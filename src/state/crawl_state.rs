//! Interaction states of one postal-code session
//!
//! The session moves forward through these in declaration order; `Failed`
//! can be entered from any non-terminal state and ends the session.

use std::fmt;

/// Represents how far a session got on its page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlState {
    /// Page opened, nothing done yet
    Init,

    /// Consent banner dismissed, or none was found
    CookiesHandled,

    /// Postal code entered into the search input
    ZipFilled,

    /// Radius chosen, or the selector was missing
    RadiusSelected,

    /// Search submitted through every trigger mechanism
    SearchTriggered,

    /// Result view detected, or the readiness budget ran out
    ResultsReady,

    /// Records extracted; terminal success
    Extracted,

    /// Session aborted; terminal
    Failed,
}

impl CrawlState {
    /// Returns true if the session cannot move any further
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Extracted | Self::Failed)
    }

    /// The state that follows on the happy path
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::CookiesHandled),
            Self::CookiesHandled => Some(Self::ZipFilled),
            Self::ZipFilled => Some(Self::RadiusSelected),
            Self::RadiusSelected => Some(Self::SearchTriggered),
            Self::SearchTriggered => Some(Self::ResultsReady),
            Self::ResultsReady => Some(Self::Extracted),
            Self::Extracted | Self::Failed => None,
        }
    }

    /// Checks whether moving from `self` to `to` is allowed
    ///
    /// Only the single forward step and the jump to `Failed` are legal.
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CookiesHandled => "cookies_handled",
            Self::ZipFilled => "zip_filled",
            Self::RadiusSelected => "radius_selected",
            Self::SearchTriggered => "search_triggered",
            Self::ResultsReady => "results_ready",
            Self::Extracted => "extracted",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "cookies_handled" => Some(Self::CookiesHandled),
            "zip_filled" => Some(Self::ZipFilled),
            "radius_selected" => Some(Self::RadiusSelected),
            "search_triggered" => Some(Self::SearchTriggered),
            "results_ready" => Some(Self::ResultsReady),
            "extracted" => Some(Self::Extracted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Init,
            Self::CookiesHandled,
            Self::ZipFilled,
            Self::RadiusSelected,
            Self::SearchTriggered,
            Self::ResultsReady,
            Self::Extracted,
            Self::Failed,
        ]
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
