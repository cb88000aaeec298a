use super::{PollSnapshot, PollStore};
use crate::error::{EngineError, Result};
use crate::models::{ChangeLogEntry, Poll, PollStatus, Survey, SurveyResponse, VoteRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    polls: HashMap<String, Poll>,
    // Insertion order for listings.
    order: Vec<String>,
    // poll id -> voter id -> record
    votes: HashMap<String, HashMap<String, VoteRecord>>,
    changes: Vec<ChangeLogEntry>,
    surveys: HashMap<String, Survey>,
    survey_order: Vec<String>,
    // survey id -> voter id -> response
    responses: HashMap<String, HashMap<String, SurveyResponse>>,
}

/// In-process store. The write lock is held across the whole vote check and
/// insert, so a vote is applied as one unit and readers never see half of it.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn closed_for_votes(poll: &Poll) -> EngineError {
    if poll.status == PollStatus::Active {
        EngineError::InvalidState(format!("poll {} has passed its end time", poll.id))
    } else {
        EngineError::InvalidState(format!("poll {} is {}, not active", poll.id, poll.status))
    }
}

fn closed_for_responses(survey: &Survey) -> EngineError {
    if survey.status == PollStatus::Active {
        EngineError::InvalidState(format!("survey {} has passed its end time", survey.id))
    } else {
        EngineError::InvalidState(format!(
            "survey {} is {}, not active",
            survey.id, survey.status
        ))
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: &Poll) -> Result<()> {
        let mut state = self.state.write().await;
        if state.polls.contains_key(&poll.id) {
            return Err(EngineError::Validation(format!(
                "poll {} already exists",
                poll.id
            )));
        }
        state.order.push(poll.id.clone());
        state.polls.insert(poll.id.clone(), poll.clone());
        Ok(())
    }

    async fn load_poll(&self, poll_id: &str) -> Result<Poll> {
        let state = self.state.read().await;
        state
            .polls
            .get(poll_id)
            .cloned()
            .ok_or_else(|| EngineError::poll_not_found(poll_id))
    }

    async fn list_polls(&self) -> Result<Vec<Poll>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.polls.get(id).cloned())
            .collect())
    }

    async fn update_poll(&self, poll: &Poll, expected_version: u64) -> Result<Poll> {
        let mut state = self.state.write().await;
        let stored = state
            .polls
            .get_mut(&poll.id)
            .ok_or_else(|| EngineError::poll_not_found(&poll.id))?;
        if stored.version != expected_version {
            return Err(EngineError::ConcurrencyConflict(format!(
                "poll {} is at version {}, expected {}",
                poll.id, stored.version, expected_version
            )));
        }
        if let Some(voted) = stored
            .options
            .iter()
            .find(|o| o.vote_count > 0 && poll.option(&o.id).is_none())
        {
            return Err(EngineError::ConcurrencyConflict(format!(
                "option {} received votes before it could be removed",
                voted.id
            )));
        }

        let mut updated = poll.clone();
        for option in &mut updated.options {
            option.vote_count = stored.option(&option.id).map(|o| o.vote_count).unwrap_or(0);
        }
        updated.disclosed_at = stored.disclosed_at;
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn transition_status(
        &self,
        poll_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Poll>> {
        let mut state = self.state.write().await;
        let stored = state
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| EngineError::poll_not_found(poll_id))?;
        if stored.status != from {
            return Ok(None);
        }
        stored.status = to;
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn mark_disclosed(&self, poll_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let stored = state
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| EngineError::poll_not_found(poll_id))?;
        if stored.disclosed_at.is_some() {
            return Ok(false);
        }
        stored.disclosed_at = Some(at);
        Ok(true)
    }

    async fn record_vote(&self, record: &VoteRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let State { polls, votes, .. } = &mut *state;

        let poll = polls
            .get_mut(&record.poll_id)
            .ok_or_else(|| EngineError::poll_not_found(&record.poll_id))?;
        if !poll.accepts_votes_at(record.cast_at) {
            return Err(closed_for_votes(poll));
        }
        if let Some(missing) = record.option_ids.iter().find(|id| poll.option(id).is_none()) {
            return Err(EngineError::NotFound(format!(
                "option {} in poll {}",
                missing, poll.id
            )));
        }

        let ballots = votes.entry(record.poll_id.clone()).or_default();
        if ballots.contains_key(&record.voter_id) {
            return Err(EngineError::AlreadyVoted {
                poll_id: record.poll_id.clone(),
                voter_id: record.voter_id.clone(),
            });
        }
        ballots.insert(record.voter_id.clone(), record.clone());

        for option_id in &record.option_ids {
            if let Some(option) = poll.option_mut(option_id) {
                option.vote_count += 1;
            }
        }
        Ok(())
    }

    async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .votes
            .get(poll_id)
            .map(|ballots| ballots.contains_key(voter_id))
            .unwrap_or(false))
    }

    async fn vote_records(&self, poll_id: &str) -> Result<Vec<VoteRecord>> {
        let state = self.state.read().await;
        if !state.polls.contains_key(poll_id) {
            return Err(EngineError::poll_not_found(poll_id));
        }
        let mut records: Vec<VoteRecord> = state
            .votes
            .get(poll_id)
            .map(|ballots| ballots.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then(a.voter_id.cmp(&b.voter_id)));
        Ok(records)
    }

    async fn snapshot(&self, poll_id: &str) -> Result<PollSnapshot> {
        let state = self.state.read().await;
        let poll = state
            .polls
            .get(poll_id)
            .cloned()
            .ok_or_else(|| EngineError::poll_not_found(poll_id))?;
        let voters = state
            .votes
            .get(poll_id)
            .map(|ballots| ballots.keys().cloned().collect())
            .unwrap_or_default();
        Ok(PollSnapshot { poll, voters })
    }

    async fn append_change(&self, entry: &ChangeLogEntry) -> Result<()> {
        self.state.write().await.changes.push(entry.clone());
        Ok(())
    }

    async fn changes(&self, poll_id: &str) -> Result<Vec<ChangeLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .iter()
            .filter(|c| c.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn insert_survey(&self, survey: &Survey) -> Result<()> {
        let mut state = self.state.write().await;
        if state.surveys.contains_key(&survey.id) {
            return Err(EngineError::Validation(format!(
                "survey {} already exists",
                survey.id
            )));
        }
        state.survey_order.push(survey.id.clone());
        state.surveys.insert(survey.id.clone(), survey.clone());
        Ok(())
    }

    async fn load_survey(&self, survey_id: &str) -> Result<Survey> {
        let state = self.state.read().await;
        state
            .surveys
            .get(survey_id)
            .cloned()
            .ok_or_else(|| EngineError::survey_not_found(survey_id))
    }

    async fn list_surveys(&self) -> Result<Vec<Survey>> {
        let state = self.state.read().await;
        Ok(state
            .survey_order
            .iter()
            .filter_map(|id| state.surveys.get(id).cloned())
            .collect())
    }

    async fn transition_survey(
        &self,
        survey_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Survey>> {
        let mut state = self.state.write().await;
        let stored = state
            .surveys
            .get_mut(survey_id)
            .ok_or_else(|| EngineError::survey_not_found(survey_id))?;
        if stored.status != from {
            return Ok(None);
        }
        stored.status = to;
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn record_response(&self, response: &SurveyResponse) -> Result<()> {
        let mut state = self.state.write().await;
        let State {
            surveys, responses, ..
        } = &mut *state;

        let survey = surveys
            .get_mut(&response.survey_id)
            .ok_or_else(|| EngineError::survey_not_found(&response.survey_id))?;
        if !survey.accepts_responses_at(response.submitted_at) {
            return Err(closed_for_responses(survey));
        }
        for answer in &response.answers {
            let question = survey.question(&answer.question_id).ok_or_else(|| {
                EngineError::NotFound(format!(
                    "question {} in survey {}",
                    answer.question_id, survey.id
                ))
            })?;
            if let Some(missing) = answer.option_ids.iter().find(|id| question.option(id).is_none()) {
                return Err(EngineError::NotFound(format!(
                    "option {} in question {}",
                    missing, question.id
                )));
            }
        }

        let submitted = responses.entry(response.survey_id.clone()).or_default();
        if submitted.contains_key(&response.voter_id) {
            return Err(EngineError::AlreadyResponded {
                survey_id: response.survey_id.clone(),
                voter_id: response.voter_id.clone(),
            });
        }
        submitted.insert(response.voter_id.clone(), response.clone());

        for answer in &response.answers {
            if let Some(question) = survey.question_mut(&answer.question_id) {
                question.answer_count += 1;
                for option_id in &answer.option_ids {
                    if let Some(option) = question.option_mut(option_id) {
                        option.vote_count += 1;
                    }
                }
            }
        }
        survey.response_count += 1;
        Ok(())
    }

    async fn has_responded(&self, survey_id: &str, voter_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .responses
            .get(survey_id)
            .map(|submitted| submitted.contains_key(voter_id))
            .unwrap_or(false))
    }
}
