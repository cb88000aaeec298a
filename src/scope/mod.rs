//! Poll visibility rules and listing filters.
//!
//! Scope comparisons are exact and case-sensitive. A near-miss such as
//! `"engineering"` vs `"Engineering"` hides the poll rather than guessing.

use crate::models::{Poll, PollStatus, Scope, Voter};
use serde::{Deserialize, Serialize};

/// Whether `voter` may see (and therefore vote on) `poll`.
pub fn is_visible(poll: &Poll, voter: &Voter) -> bool {
    allows(&poll.scope, voter)
}

/// Whether a voter belongs to `scope`. Shared by polls and surveys.
pub fn allows(scope: &Scope, voter: &Voter) -> bool {
    match scope {
        Scope::University => true,
        Scope::Faculty(faculty) => voter.faculty.as_deref() == Some(faculty.as_str()),
        Scope::Course(course) => voter.course.as_deref() == Some(course.as_str()),
    }
}

/// Roster attribute a turnout breakdown groups voters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Course,
    Faculty,
}

/// Course polls break down by course; faculty and university-wide polls
/// break down by faculty.
pub fn turnout_dimension(scope: &Scope) -> GroupBy {
    match scope {
        Scope::Course(_) => GroupBy::Course,
        Scope::Faculty(_) | Scope::University => GroupBy::Faculty,
    }
}

/// The group a voter falls into along `dimension`, if any.
pub fn group_of(voter: &Voter, dimension: GroupBy) -> Option<&str> {
    match dimension {
        GroupBy::Course => voter.course.as_deref(),
        GroupBy::Faculty => voter.faculty.as_deref(),
    }
}

/// Listing filter over the catalog. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    pub status: Option<PollStatus>,
}

impl PollFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn status(mut self, status: PollStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, poll: &Poll) -> bool {
        if let Some(category) = &self.category {
            if poll.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if poll.status != status {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => poll
                .title
                .to_lowercase()
                .contains(&term.to_lowercase()),
            _ => true,
        }
    }
}
