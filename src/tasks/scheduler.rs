use super::lifecycle::{due_survey_transition, due_transition, results_visible};
use crate::catalog::PollCatalog;
use crate::error::Result;
use crate::models::{LifecycleEvent, LifecycleEventKind, PollStatus};
use crate::scope::PollFilter;
use crate::survey::SurveyCatalog;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Applies start/end times and result disclosure as wall-clock time passes.
pub struct LifecycleScheduler {
    catalog: Arc<PollCatalog>,
    surveys: Arc<SurveyCatalog>,
    tick_interval: StdDuration,
}

impl LifecycleScheduler {
    pub fn new(
        catalog: Arc<PollCatalog>,
        surveys: Arc<SurveyCatalog>,
        tick_interval: StdDuration,
    ) -> Self {
        Self {
            catalog,
            surveys,
            tick_interval,
        }
    }

    /// Evaluates every poll and survey once; the returned events cover polls.
    /// Transitions are applied through the catalogs and are idempotent, so a
    /// repeated tick changes nothing. Results are announced once per poll,
    /// stamped on the poll itself, so a restart does not announce them again.
    /// A failure on one poll is logged and does not stop the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<LifecycleEvent>> {
        let polls = self.catalog.list_polls(&PollFilter::default()).await?;
        let mut events = Vec::new();

        for mut poll in polls {
            while let Some(target) = due_transition(&poll, now) {
                match self
                    .catalog
                    .apply_scheduled(&poll.id, target, SCHEDULER_ACTOR, now)
                    .await
                {
                    Ok(Some(updated)) => {
                        events.push(LifecycleEvent {
                            poll_id: updated.id.clone(),
                            kind: match target {
                                PollStatus::Closed => LifecycleEventKind::Closed,
                                _ => LifecycleEventKind::Activated,
                            },
                            actor: SCHEDULER_ACTOR.to_string(),
                            at: now,
                        });
                        poll = updated;
                    }
                    Ok(None) => {
                        // Someone else got there first; pick up the current state.
                        match self.catalog.get_poll(&poll.id).await {
                            Ok(current) if current.status != poll.status => poll = current,
                            Ok(_) => break,
                            Err(e) => {
                                error!("Failed to reload poll {}: {}", poll.id, e);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Scheduled transition of poll {} to {} failed: {}", poll.id, target, e);
                        break;
                    }
                }
            }

            if poll.disclosed_at.is_none() && results_visible(&poll, now) {
                match self.catalog.announce_results(&poll.id, SCHEDULER_ACTOR, now).await {
                    Ok(true) => events.push(LifecycleEvent {
                        poll_id: poll.id.clone(),
                        kind: LifecycleEventKind::ResultsDisclosed,
                        actor: SCHEDULER_ACTOR.to_string(),
                        at: now,
                    }),
                    Ok(false) => {}
                    Err(e) => error!("Failed to disclose results of poll {}: {}", poll.id, e),
                }
            }
        }

        self.tick_surveys(now).await?;
        Ok(events)
    }

    async fn tick_surveys(&self, now: DateTime<Utc>) -> Result<()> {
        for mut survey in self.surveys.list_surveys().await? {
            while let Some(target) = due_survey_transition(&survey, now) {
                match self
                    .surveys
                    .apply_scheduled(&survey.id, target, SCHEDULER_ACTOR, now)
                    .await
                {
                    Ok(Some(updated)) => survey = updated,
                    Ok(None) => match self.surveys.get_survey(&survey.id).await {
                        Ok(current) if current.status != survey.status => survey = current,
                        Ok(_) => break,
                        Err(e) => {
                            error!("Failed to reload survey {}: {}", survey.id, e);
                            break;
                        }
                    },
                    Err(e) => {
                        error!(
                            "Scheduled transition of survey {} to {} failed: {}",
                            survey.id, target, e
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Ticks until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting lifecycle scheduler (every {}s)",
            self.tick_interval.as_secs()
        );
        let mut interval = interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Lifecycle scheduler stopping");
                        return;
                    }
                    continue;
                }
            }

            let now = Utc::now();
            debug!("Checking poll schedules at {}", now.to_rfc3339());
            match self.tick(now).await {
                Ok(events) if !events.is_empty() => {
                    info!("Scheduler applied {} lifecycle change(s)", events.len());
                }
                Ok(_) => {}
                Err(e) => error!("Failed to list polls for scheduling: {}", e),
            }
        }
    }
}
