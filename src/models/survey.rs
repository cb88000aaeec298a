use super::{PollOption, PollStatus, Scope, ScopeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One multiple-choice question inside a survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyQuestion {
    pub id: String,
    pub prompt: String,
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub required: bool,
    /// Responses that answered this question. Optional questions may be
    /// skipped, so this can be lower than the survey's response count.
    pub answer_count: u64,
}

impl SurveyQuestion {
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn option_mut(&mut self, option_id: &str) -> Option<&mut PollOption> {
        self.options.iter_mut().find(|o| o.id == option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub scope: Scope,
    pub category: Option<String>,
    pub questions: Vec<SurveyQuestion>,
    pub is_anonymous: bool,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub response_count: u64,
    pub version: u64,
}

impl Survey {
    pub fn question(&self, question_id: &str) -> Option<&SurveyQuestion> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn question_mut(&mut self, question_id: &str) -> Option<&mut SurveyQuestion> {
        self.questions.iter_mut().find(|q| q.id == question_id)
    }

    pub fn accepts_responses_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PollStatus::Active && self.end_at.is_none_or(|end| end > now)
    }
}

/// The options picked for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub option_ids: Vec<String>,
}

impl Answer {
    pub fn new(question_id: impl Into<String>, option_ids: &[&str]) -> Self {
        Self {
            question_id: question_id.into(),
            option_ids: option_ids.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// A voter's single, final submission to a survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub survey_id: String,
    pub voter_id: String,
    pub answers: Vec<Answer>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDefinition {
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

impl QuestionDefinition {
    pub fn new(prompt: impl Into<String>, options: &[&str]) -> Self {
        Self {
            prompt: prompt.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            allow_multiple: false,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }
}

/// Admin input for creating a survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDefinition {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub scope: ScopeKind,
    #[serde(default)]
    pub scope_value: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub questions: Vec<QuestionDefinition>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub save_as_draft: bool,
}

impl SurveyDefinition {
    pub fn new(title: impl Into<String>, scope: ScopeKind, questions: Vec<QuestionDefinition>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            scope,
            scope_value: None,
            category: None,
            questions,
            is_anonymous: false,
            start_at: None,
            end_at: None,
            save_as_draft: false,
        }
    }
}
