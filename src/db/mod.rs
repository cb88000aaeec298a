mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{ChangeLogEntry, Poll, PollStatus, Survey, SurveyResponse, VoteRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashSet;
use std::sync::Arc;

/// A poll together with the voters who have a record for it, read as one
/// consistent unit.
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub poll: Poll,
    pub voters: HashSet<String>,
}

impl PollSnapshot {
    pub fn ballots(&self) -> u64 {
        self.voters.len() as u64
    }
}

/// Persistence for polls, surveys, vote records and the change log.
///
/// `record_vote` and `record_response` are the engine's serialization points:
/// implementations must check the poll or survey is active and not past its
/// end time, reject a second record for the same voter, insert the record and
/// bump the counters as one atomic unit. Neither touches `version`, so voting
/// never holds up admin writes.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn insert_poll(&self, poll: &Poll) -> Result<()>;

    /// Fails with `NotFound` for an unknown id.
    async fn load_poll(&self, poll_id: &str) -> Result<Poll>;

    /// All polls, oldest first.
    async fn list_polls(&self) -> Result<Vec<Poll>>;

    /// Replaces the poll's definition if its version is still
    /// `expected_version`, returning the stored copy with the bumped version.
    /// Vote counters are never written from `poll`; dropping an option that
    /// holds votes fails with `ConcurrencyConflict`, as does a stale version.
    async fn update_poll(&self, poll: &Poll, expected_version: u64) -> Result<Poll>;

    /// Moves the poll from `from` to `to`, guarded on the status alone.
    /// `None` when the poll is no longer in `from`.
    async fn transition_status(
        &self,
        poll_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Poll>>;

    /// Stamps `disclosed_at` unless already set. True when this call set it.
    async fn mark_disclosed(&self, poll_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn record_vote(&self, record: &VoteRecord) -> Result<()>;

    async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool>;

    async fn vote_records(&self, poll_id: &str) -> Result<Vec<VoteRecord>>;

    async fn snapshot(&self, poll_id: &str) -> Result<PollSnapshot>;

    async fn append_change(&self, entry: &ChangeLogEntry) -> Result<()>;

    async fn changes(&self, poll_id: &str) -> Result<Vec<ChangeLogEntry>>;

    async fn insert_survey(&self, survey: &Survey) -> Result<()>;

    /// The survey with its counters, read as one consistent unit.
    async fn load_survey(&self, survey_id: &str) -> Result<Survey>;

    async fn list_surveys(&self) -> Result<Vec<Survey>>;

    async fn transition_survey(
        &self,
        survey_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<Option<Survey>>;

    async fn record_response(&self, response: &SurveyResponse) -> Result<()>;

    async fn has_responded(&self, survey_id: &str, voter_id: &str) -> Result<bool>;
}

/// Opens the backend selected by `DATABASE_URL`.
pub async fn open_store(config: &EngineConfig) -> Result<Arc<dyn PollStore>> {
    if config.uses_memory_store() {
        info!("Using in-memory poll store; data will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(&config.database_url, config.max_connections).await?;
    info!("Connected to poll database at {}", config.database_url);
    Ok(Arc::new(store))
}
