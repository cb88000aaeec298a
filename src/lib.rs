//! Poll and election engine for a campus voting platform.
//!
//! Polls are scoped to a course, a faculty or the whole university. Voters cast
//! at most one ballot per poll; results are tallied from the stored ballots and
//! disclosed according to each poll's policy while a scheduler opens and
//! closes polls on time. Surveys bundle several questions under the same
//! rules, with one response per voter.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scope;
pub mod survey;
pub mod tasks;
pub mod voting;

use catalog::PollCatalog;
use config::EngineConfig;
use db::PollStore;
use std::sync::Arc;
use survey::SurveyCatalog;
use tasks::LifecycleScheduler;
use voting::{ResultAggregator, VoteLedger};

pub use error::{EngineError, Result};

/// All engine components wired to one store.
pub struct Engine {
    pub catalog: Arc<PollCatalog>,
    pub surveys: Arc<SurveyCatalog>,
    pub ledger: VoteLedger,
    pub results: ResultAggregator,
    pub scheduler: Arc<LifecycleScheduler>,
}

impl Engine {
    pub fn new(store: Arc<dyn PollStore>, config: &EngineConfig) -> Self {
        let catalog = Arc::new(PollCatalog::new(
            Arc::clone(&store),
            config.max_options,
            config.conflict_retries,
        ));
        let surveys = Arc::new(SurveyCatalog::new(
            Arc::clone(&store),
            config.max_options,
            config.conflict_retries,
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(
            Arc::clone(&catalog),
            Arc::clone(&surveys),
            config.tick_interval,
        ));
        Self {
            ledger: VoteLedger::new(Arc::clone(&store), config.conflict_retries),
            results: ResultAggregator::new(store),
            catalog,
            surveys,
            scheduler,
        }
    }

    /// Opens the store named in `config` and builds the engine on it.
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let store = db::open_store(config).await?;
        Ok(Self::new(store, config))
    }
}
