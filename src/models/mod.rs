use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod survey;

pub use survey::{
    Answer, QuestionDefinition, Survey, SurveyDefinition, SurveyQuestion, SurveyResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Course,
    Faculty,
    University,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Course => "course",
            ScopeKind::Faculty => "faculty",
            ScopeKind::University => "university",
        }
    }
}

impl FromStr for ScopeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "course" => Ok(ScopeKind::Course),
            "faculty" => Ok(ScopeKind::Faculty),
            "university" => Ok(ScopeKind::University),
            other => Err(EngineError::Validation(format!("unknown scope: {}", other))),
        }
    }
}

/// Visibility tier of a poll. Course and faculty scopes carry the exact group
/// name they are restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "scopeValue", rename_all = "lowercase")]
pub enum Scope {
    Course(String),
    Faculty(String),
    University,
}

impl Scope {
    /// Builds a scope from the separate kind/value pair used by poll
    /// definitions. The value is ignored for university-wide polls.
    pub fn from_parts(kind: ScopeKind, value: Option<&str>) -> Result<Self> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match (kind, value) {
            (ScopeKind::University, _) => Ok(Scope::University),
            (ScopeKind::Course, Some(v)) => Ok(Scope::Course(v.to_string())),
            (ScopeKind::Faculty, Some(v)) => Ok(Scope::Faculty(v.to_string())),
            (kind, None) => Err(EngineError::Validation(format!(
                "scope value is required for {} polls",
                kind.as_str()
            ))),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Course(_) => ScopeKind::Course,
            Scope::Faculty(_) => ScopeKind::Faculty,
            Scope::University => ScopeKind::University,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Scope::Course(v) | Scope::Faculty(v) => Some(v),
            Scope::University => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{}:{}", self.kind().as_str(), v),
            None => f.write_str(self.kind().as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Draft,
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PollStatus::Draft => 0,
            PollStatus::Active => 1,
            PollStatus::Closed => 2,
        }
    }

    /// The only legal moves are one step forward: draft -> active -> closed.
    pub fn can_advance_to(&self, next: PollStatus) -> bool {
        next.rank() == self.rank() + 1
    }

    /// True when this status is `target` or already past it.
    pub fn has_reached(&self, target: PollStatus) -> bool {
        self.rank() >= target.rank()
    }
}

impl FromStr for PollStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PollStatus::Draft),
            "active" => Ok(PollStatus::Active),
            "closed" => Ok(PollStatus::Closed),
            other => Err(EngineError::Validation(format!("unknown poll status: {}", other))),
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When tallies become visible to voters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "at", rename_all = "camelCase")]
pub enum ResultDisclosure {
    /// Live results as soon as the poll is active.
    Live,
    /// Results once the poll is closed.
    #[default]
    OnClose,
    /// Results from a fixed moment, provided the poll has left draft.
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub vote_count: u64,
}

impl PollOption {
    pub fn new(text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.trim().to_string(),
            vote_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub scope: Scope,
    pub category: Option<String>,
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub max_selections: Option<u32>,
    pub is_anonymous: bool,
    pub status: PollStatus,
    pub disclosure: ResultDisclosure,
    pub created_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// When the scheduler announced the results. Set once.
    pub disclosed_at: Option<DateTime<Utc>>,
    /// Bumped by every change to the definition or status. Votes only touch
    /// the option counters and leave it alone.
    pub version: u64,
}

impl Poll {
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn option_mut(&mut self, option_id: &str) -> Option<&mut PollOption> {
        self.options.iter_mut().find(|o| o.id == option_id)
    }

    /// Sum of per-option counters. Equals the ballot count for single-select
    /// polls.
    pub fn total_selections(&self) -> u64 {
        self.options.iter().map(|o| o.vote_count).sum()
    }

    /// Voting stops at `end_at` even before the scheduler closes the poll.
    pub fn accepts_votes_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PollStatus::Active && self.end_at.is_none_or(|end| end > now)
    }

    /// Largest number of options one ballot may select.
    pub fn selection_limit(&self) -> usize {
        if !self.allow_multiple {
            return 1;
        }
        match self.max_selections {
            Some(max) => (max as usize).min(self.options.len()),
            None => self.options.len(),
        }
    }
}

/// A voter as supplied by the identity provider. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: String,
    pub course: Option<String>,
    pub faculty: Option<String>,
}

impl Voter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            course: None,
            faculty: None,
        }
    }

    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course = Some(course.into());
        self
    }

    pub fn with_faculty(mut self, faculty: impl Into<String>) -> Self {
        self.faculty = Some(faculty.into());
        self
    }
}

/// Immutable proof that a voter voted on a poll. Unique per (poll, voter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub poll_id: String,
    pub voter_id: String,
    pub option_ids: Vec<String>,
    pub cast_at: DateTime<Utc>,
}

/// Admin input for creating a poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDefinition {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub scope: ScopeKind,
    #[serde(default)]
    pub scope_value: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub max_selections: Option<u32>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disclosure: ResultDisclosure,
    #[serde(default)]
    pub save_as_draft: bool,
}

impl PollDefinition {
    pub fn new(title: impl Into<String>, scope: ScopeKind, options: &[&str]) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            scope,
            scope_value: None,
            category: None,
            options: options.iter().map(|o| o.to_string()).collect(),
            allow_multiple: false,
            max_selections: None,
            is_anonymous: false,
            start_at: None,
            end_at: None,
            disclosure: ResultDisclosure::default(),
            save_as_draft: false,
        }
    }
}

/// Partial update for `PollCatalog::edit_poll`. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Option<String>>,
    pub scope: Option<Scope>,
    pub options: Option<Vec<String>>,
    pub allow_multiple: Option<bool>,
    pub max_selections: Option<Option<u32>>,
    pub is_anonymous: Option<bool>,
    pub start_at: Option<Option<DateTime<Utc>>>,
    pub end_at: Option<Option<DateTime<Utc>>>,
    pub disclosure: Option<ResultDisclosure>,
}

impl PollPatch {
    /// Fields that change how ballots are counted. Only editable in draft.
    pub fn touches_structure(&self) -> bool {
        self.title.is_some()
            || self.scope.is_some()
            || self.options.is_some()
            || self.allow_multiple.is_some()
            || self.max_selections.is_some()
            || self.is_anonymous.is_some()
            || self.start_at.is_some()
    }
}

/// One audit entry: who changed which field of which poll, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub poll_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEventKind {
    Activated,
    Closed,
    ResultsDisclosed,
}

/// Published whenever a poll changes lifecycle state or its results become
/// visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub poll_id: String,
    pub kind: LifecycleEventKind,
    pub actor: String,
    pub at: DateTime<Utc>,
}
