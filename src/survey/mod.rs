//! Multi-question surveys.
//!
//! A survey groups several choice questions under one scope and schedule.
//! Each voter submits a single response covering every required question;
//! the response and all its counters are written as one unit, the same way a
//! poll ballot is.

use crate::catalog::{build_options, normalize_category};
use crate::db::PollStore;
use crate::error::{EngineError, Result};
use crate::models::{
    Answer, PollStatus, Scope, Survey, SurveyDefinition, SurveyQuestion, SurveyResponse, Voter,
};
use crate::scope;
use crate::voting::{OptionTally, percent};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Results for one question. Percentages are of the responses that answered
/// it, so skipped optional questions do not dilute them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTally {
    pub question_id: String,
    pub prompt: String,
    pub answered: u64,
    pub options: Vec<OptionTally>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyTally {
    pub survey_id: String,
    pub status: PollStatus,
    pub response_count: u64,
    pub questions: Vec<QuestionTally>,
}

/// Owns survey definitions, their lifecycle and responses.
pub struct SurveyCatalog {
    store: Arc<dyn PollStore>,
    max_options: usize,
    conflict_retries: u32,
}

impl SurveyCatalog {
    pub fn new(store: Arc<dyn PollStore>, max_options: usize, conflict_retries: u32) -> Self {
        Self {
            store,
            max_options,
            conflict_retries: conflict_retries.max(1),
        }
    }

    pub async fn create_survey(&self, definition: SurveyDefinition, actor: &str) -> Result<Survey> {
        let now = Utc::now();

        let title = definition.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        let scope = Scope::from_parts(definition.scope, definition.scope_value.as_deref())?;
        if definition.questions.is_empty() {
            return Err(EngineError::Validation(
                "a survey needs at least one question".to_string(),
            ));
        }

        let mut questions = Vec::with_capacity(definition.questions.len());
        for (i, question) in definition.questions.iter().enumerate() {
            let prompt = question.prompt.trim();
            if prompt.is_empty() {
                return Err(EngineError::Validation(format!(
                    "question {} has no prompt",
                    i + 1
                )));
            }
            if question.options.len() < 2 {
                return Err(EngineError::Validation(format!(
                    "question {} needs at least 2 options",
                    i + 1
                )));
            }
            if question.options.len() > self.max_options {
                return Err(EngineError::Validation(format!(
                    "question {} may have at most {} options",
                    i + 1,
                    self.max_options
                )));
            }
            questions.push(SurveyQuestion {
                id: Uuid::new_v4().to_string(),
                prompt: prompt.to_string(),
                options: build_options(&question.options)?,
                allow_multiple: question.allow_multiple,
                required: question.required,
                answer_count: 0,
            });
        }

        if let (Some(start), Some(end)) = (definition.start_at, definition.end_at) {
            if end <= start {
                return Err(EngineError::Validation("end time must be after start time".to_string()));
            }
        }
        let status = match definition.start_at {
            _ if definition.save_as_draft => PollStatus::Draft,
            Some(start) if start > now => PollStatus::Draft,
            _ => PollStatus::Active,
        };
        if status == PollStatus::Active && definition.end_at.is_some_and(|end| end <= now) {
            return Err(EngineError::Validation(
                "end time must be in the future for an active survey".to_string(),
            ));
        }

        let survey = Survey {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: definition.description.trim().to_string(),
            scope,
            category: normalize_category(definition.category),
            questions,
            is_anonymous: definition.is_anonymous,
            status,
            created_at: now,
            start_at: definition.start_at,
            end_at: definition.end_at,
            response_count: 0,
            version: 0,
        };
        self.store.insert_survey(&survey).await?;
        info!(
            "Survey {} '{}' created by {} ({}, {} questions, status {})",
            survey.id,
            survey.title,
            actor,
            survey.scope,
            survey.questions.len(),
            survey.status
        );
        Ok(survey)
    }

    pub async fn get_survey(&self, survey_id: &str) -> Result<Survey> {
        self.store.load_survey(survey_id).await
    }

    pub async fn list_surveys(&self) -> Result<Vec<Survey>> {
        self.store.list_surveys().await
    }

    /// Surveys this voter may see. Drafts are never shown to voters.
    pub async fn visible_surveys(&self, voter: &Voter) -> Result<Vec<Survey>> {
        let surveys = self.store.list_surveys().await?;
        Ok(surveys
            .into_iter()
            .filter(|s| s.status != PollStatus::Draft && scope::allows(&s.scope, voter))
            .collect())
    }

    /// Explicit admin transition, with the same one-step rule as polls.
    pub async fn set_status(&self, survey_id: &str, status: PollStatus, actor: &str) -> Result<Survey> {
        match self.advance(survey_id, status).await? {
            Ok((from, survey)) => {
                info!("Survey {} moved {} -> {} by {}", survey_id, from, survey.status, actor);
                Ok(survey)
            }
            Err(current) => {
                let msg = format!("cannot move survey {} from {} to {}", survey_id, current, status);
                warn!("Rejected status change by {}: {}", actor, msg);
                Err(EngineError::InvalidState(msg))
            }
        }
    }

    /// Scheduler-driven transition; `None` when the survey already reached
    /// `target`.
    pub async fn apply_scheduled(
        &self,
        survey_id: &str,
        target: PollStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Survey>> {
        match self.advance(survey_id, target).await? {
            Ok((from, survey)) => {
                info!(
                    "Survey {} moved {} -> {} on schedule by {} at {}",
                    survey_id,
                    from,
                    survey.status,
                    actor,
                    now.to_rfc3339()
                );
                Ok(Some(survey))
            }
            Err(current) if current.has_reached(target) => {
                debug!("Survey {} already {}; skipping scheduled transition", survey_id, current);
                Ok(None)
            }
            Err(current) => Err(EngineError::InvalidState(format!(
                "cannot schedule survey {} from {} to {}",
                survey_id, current, target
            ))),
        }
    }

    /// Submits `voter_id`'s response.
    ///
    /// Checks run in the same order as for votes: unknown survey, question or
    /// option (`NotFound`), survey not active or past its end time
    /// (`InvalidState`), malformed answers (`Validation`), existing response
    /// (`AlreadyResponded`). The last check and the write are atomic in the
    /// store.
    pub async fn submit_response(
        &self,
        survey_id: &str,
        voter_id: &str,
        answers: Vec<Answer>,
    ) -> Result<SurveyResponse> {
        if voter_id.trim().is_empty() {
            return Err(EngineError::Validation("voter id must not be empty".to_string()));
        }

        let now = Utc::now();
        let survey = self.store.load_survey(survey_id).await?;
        check_answers(&survey, &answers, now)?;

        let response = SurveyResponse {
            survey_id: survey_id.to_string(),
            voter_id: voter_id.to_string(),
            answers,
            submitted_at: now,
        };

        for attempt in 1..=self.conflict_retries {
            match self.store.record_response(&response).await {
                Ok(()) => {
                    info!(
                        "Recorded response to survey {} ({} answer(s)) for voter {}",
                        survey_id,
                        response.answers.len(),
                        voter_id
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        "Response to survey {} hit a conflict (attempt {}): {}",
                        survey_id, attempt, e
                    );
                }
                Err(e) => {
                    if let EngineError::Storage(_) = &e {
                        error!("Failed to store response to survey {}: {}", survey_id, e);
                    }
                    return Err(e);
                }
            }
        }

        error!(
            "Giving up on response to survey {} after {} conflicts",
            survey_id, self.conflict_retries
        );
        Err(EngineError::Storage(format!(
            "survey {} is under heavy contention; response not recorded",
            survey_id
        )))
    }

    /// Like `submit_response`, but a survey outside the voter's scope is
    /// reported as not found.
    pub async fn submit_response_as(
        &self,
        survey_id: &str,
        voter: &Voter,
        answers: Vec<Answer>,
    ) -> Result<SurveyResponse> {
        let survey = self.store.load_survey(survey_id).await?;
        if !scope::allows(&survey.scope, voter) {
            warn!("Voter {} tried to answer survey {} outside their scope", voter.id, survey_id);
            return Err(EngineError::survey_not_found(survey_id));
        }
        self.submit_response(survey_id, &voter.id, answers).await
    }

    pub async fn has_responded(&self, survey_id: &str, voter_id: &str) -> Result<bool> {
        self.store.has_responded(survey_id, voter_id).await
    }

    pub async fn tally(&self, survey_id: &str) -> Result<SurveyTally> {
        let survey = self.store.load_survey(survey_id).await?;
        Ok(build_survey_tally(&survey))
    }

    // Ok((from, survey)) when moved, Err(current) when `target` is not the
    // next step from the current status.
    async fn advance(
        &self,
        survey_id: &str,
        target: PollStatus,
    ) -> Result<std::result::Result<(PollStatus, Survey), PollStatus>> {
        let mut conflicts = 0;
        loop {
            let current = self.store.load_survey(survey_id).await?.status;
            if !current.can_advance_to(target) {
                return Ok(Err(current));
            }
            match self.store.transition_survey(survey_id, current, target).await {
                Ok(Some(survey)) => return Ok(Ok((current, survey))),
                Ok(None) => {}
                Err(e) if e.is_retryable() && conflicts < self.conflict_retries => conflicts += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

fn check_answers(survey: &Survey, answers: &[Answer], now: DateTime<Utc>) -> Result<()> {
    for answer in answers {
        let question = survey.question(&answer.question_id).ok_or_else(|| {
            EngineError::NotFound(format!(
                "question {} in survey {}",
                answer.question_id, survey.id
            ))
        })?;
        if let Some(unknown) = answer.option_ids.iter().find(|id| question.option(id).is_none()) {
            return Err(EngineError::NotFound(format!(
                "option {} in question {}",
                unknown, question.id
            )));
        }
    }

    if survey.status != PollStatus::Active {
        return Err(EngineError::InvalidState(format!(
            "survey {} is {}, not active",
            survey.id, survey.status
        )));
    }
    if !survey.accepts_responses_at(now) {
        return Err(EngineError::InvalidState(format!(
            "survey {} has passed its end time",
            survey.id
        )));
    }

    let mut answered = HashSet::new();
    for answer in answers {
        if !answered.insert(answer.question_id.as_str()) {
            return Err(EngineError::Validation(format!(
                "question {} answered twice",
                answer.question_id
            )));
        }
        if answer.option_ids.is_empty() {
            return Err(EngineError::Validation(format!(
                "select at least one option for question {}",
                answer.question_id
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = answer.option_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(EngineError::Validation(format!("option {} selected twice", dup)));
        }
        let single = survey
            .question(&answer.question_id)
            .is_some_and(|q| !q.allow_multiple);
        if single && answer.option_ids.len() > 1 {
            return Err(EngineError::Validation(format!(
                "question {} accepts a single selection",
                answer.question_id
            )));
        }
    }

    if let Some(missing) = survey
        .questions
        .iter()
        .find(|q| q.required && !answered.contains(q.id.as_str()))
    {
        return Err(EngineError::Validation(format!(
            "question '{}' is required",
            missing.prompt
        )));
    }
    Ok(())
}

fn build_survey_tally(survey: &Survey) -> SurveyTally {
    let questions = survey
        .questions
        .iter()
        .map(|question| QuestionTally {
            question_id: question.id.clone(),
            prompt: question.prompt.clone(),
            answered: question.answer_count,
            options: question
                .options
                .iter()
                .map(|option| OptionTally {
                    option_id: option.id.clone(),
                    text: option.text.clone(),
                    votes: option.vote_count,
                    percent: percent(option.vote_count, question.answer_count),
                })
                .collect(),
        })
        .collect();

    SurveyTally {
        survey_id: survey.id.clone(),
        status: survey.status,
        response_count: survey.response_count,
        questions,
    }
}
