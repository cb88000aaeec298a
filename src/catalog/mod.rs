use crate::db::PollStore;
use crate::error::{EngineError, Result};
use crate::models::{
    ChangeLogEntry, LifecycleEvent, LifecycleEventKind, Poll, PollDefinition, PollOption,
    PollPatch, PollStatus, Scope, Voter,
};
use crate::scope::{self, PollFilter};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns poll definitions and their lifecycle.
pub struct PollCatalog {
    store: Arc<dyn PollStore>,
    max_options: usize,
    conflict_retries: u32,
    events: broadcast::Sender<LifecycleEvent>,
}

impl PollCatalog {
    pub fn new(store: Arc<dyn PollStore>, max_options: usize, conflict_retries: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            max_options,
            conflict_retries: conflict_retries.max(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn publish(&self, poll_id: &str, kind: LifecycleEventKind, actor: &str, at: DateTime<Utc>) {
        // No subscribers is fine.
        let _ = self.events.send(LifecycleEvent {
            poll_id: poll_id.to_string(),
            kind,
            actor: actor.to_string(),
            at,
        });
    }

    pub async fn create_poll(&self, definition: PollDefinition, actor: &str) -> Result<Poll> {
        let now = Utc::now();

        let title = definition.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        let scope = Scope::from_parts(definition.scope, definition.scope_value.as_deref())?;

        let status = match definition.start_at {
            _ if definition.save_as_draft => PollStatus::Draft,
            Some(start) if start > now => PollStatus::Draft,
            _ => PollStatus::Active,
        };

        let poll = Poll {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: definition.description.trim().to_string(),
            scope,
            category: normalize_category(definition.category),
            options: build_options(&definition.options)?,
            allow_multiple: definition.allow_multiple,
            max_selections: definition.max_selections,
            is_anonymous: definition.is_anonymous,
            status,
            disclosure: definition.disclosure,
            created_at: now,
            start_at: definition.start_at,
            end_at: definition.end_at,
            disclosed_at: None,
            version: 0,
        };
        self.validate(&poll)?;
        if poll.status == PollStatus::Active {
            if let Some(end) = poll.end_at {
                if end <= now {
                    return Err(EngineError::Validation(
                        "end time must be in the future for an active poll".to_string(),
                    ));
                }
            }
        }

        self.store.insert_poll(&poll).await?;
        info!(
            "Poll {} '{}' created by {} ({}, {} options, status {})",
            poll.id,
            poll.title,
            actor,
            poll.scope,
            poll.options.len(),
            poll.status
        );
        self.log_change(&poll.id, "created", None, Some(poll.status.to_string()), actor, now)
            .await;
        if poll.status == PollStatus::Active {
            self.publish(&poll.id, LifecycleEventKind::Activated, actor, now);
        }
        Ok(poll)
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll> {
        self.store.load_poll(poll_id).await
    }

    pub async fn list_polls(&self, filter: &PollFilter) -> Result<Vec<Poll>> {
        let polls = self.store.list_polls().await?;
        Ok(polls.into_iter().filter(|p| filter.matches(p)).collect())
    }

    /// Polls this voter may see. Drafts are never shown to voters.
    pub async fn visible_polls(&self, voter: &Voter, filter: &PollFilter) -> Result<Vec<Poll>> {
        let polls = self.list_polls(filter).await?;
        Ok(polls
            .into_iter()
            .filter(|p| p.status != PollStatus::Draft && scope::is_visible(p, voter))
            .collect())
    }

    pub async fn edit_poll(&self, poll_id: &str, patch: PollPatch, actor: &str) -> Result<Poll> {
        let max_options = self.max_options;
        let (before, after) = self
            .mutate(poll_id, |poll| {
                match poll.status {
                    PollStatus::Closed => {
                        return Err(EngineError::InvalidState(format!(
                            "poll {} is closed and can no longer be edited",
                            poll.id
                        )));
                    }
                    PollStatus::Active if patch.touches_structure() => {
                        return Err(EngineError::InvalidState(format!(
                            "poll {} is active; only description, category, end time and \
                             disclosure can change",
                            poll.id
                        )));
                    }
                    _ => {}
                }
                apply_patch(poll, &patch)?;
                validate_poll(poll, max_options)
            })
            .await?;

        self.log_diff(&before, &after, actor).await;
        Ok(after)
    }

    /// Explicit admin transition. Only `draft -> active -> closed`, one step at
    /// a time; anything else is `InvalidState`.
    pub async fn set_status(&self, poll_id: &str, status: PollStatus, actor: &str) -> Result<Poll> {
        match self.advance(poll_id, status).await? {
            Advance::Moved { from, poll } => {
                info!("Poll {} moved {} -> {} by {}", poll_id, from, poll.status, actor);
                self.record_transition(from, &poll, actor, Utc::now()).await;
                Ok(poll)
            }
            Advance::Blocked(current) => {
                let msg = format!("cannot move poll {} from {} to {}", poll_id, current, status);
                warn!("Rejected status change by {}: {}", actor, msg);
                Err(EngineError::InvalidState(msg))
            }
        }
    }

    /// Scheduler-driven transition. Reaching a status the poll already has (or
    /// has passed) is a no-op and returns `None`, so duplicate ticks are
    /// harmless.
    pub async fn apply_scheduled(
        &self,
        poll_id: &str,
        target: PollStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Poll>> {
        match self.advance(poll_id, target).await? {
            Advance::Moved { from, poll } => {
                info!("Poll {} moved {} -> {} on schedule", poll_id, from, poll.status);
                self.record_transition(from, &poll, actor, now).await;
                Ok(Some(poll))
            }
            Advance::Blocked(current) if current.has_reached(target) => {
                debug!("Poll {} already {}; skipping scheduled transition", poll_id, current);
                Ok(None)
            }
            Advance::Blocked(current) => Err(EngineError::InvalidState(format!(
                "cannot schedule poll {} from {} to {}",
                poll_id, current, target
            ))),
        }
    }

    /// Marks the poll's results as announced and publishes `ResultsDisclosed`.
    /// False when they were announced before, by this process or another.
    pub(crate) async fn announce_results(
        &self,
        poll_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !self.store.mark_disclosed(poll_id, now).await? {
            return Ok(false);
        }
        info!("Results of poll {} are now visible", poll_id);
        self.publish(poll_id, LifecycleEventKind::ResultsDisclosed, actor, now);
        Ok(true)
    }

    pub async fn add_option(&self, poll_id: &str, text: &str, actor: &str) -> Result<Poll> {
        let max_options = self.max_options;
        let (before, after) = self
            .mutate(poll_id, |poll| {
                if poll.status == PollStatus::Closed {
                    return Err(EngineError::InvalidState(format!(
                        "poll {} is closed; options are frozen",
                        poll.id
                    )));
                }
                if poll.options.len() >= max_options {
                    return Err(EngineError::Validation(format!(
                        "a poll may have at most {} options",
                        max_options
                    )));
                }
                if text.trim().is_empty() {
                    return Err(EngineError::Validation("option text must not be empty".to_string()));
                }
                poll.options.push(PollOption::new(text));
                Ok(())
            })
            .await?;

        self.log_diff(&before, &after, actor).await;
        Ok(after)
    }

    /// Removes an option. Once a poll is active, an option that already holds
    /// votes cannot be removed.
    pub async fn remove_option(&self, poll_id: &str, option_id: &str, actor: &str) -> Result<Poll> {
        let (before, after) = self
            .mutate(poll_id, |poll| {
                if poll.status == PollStatus::Closed {
                    return Err(EngineError::InvalidState(format!(
                        "poll {} is closed; options are frozen",
                        poll.id
                    )));
                }
                let option = poll.option(option_id).ok_or_else(|| {
                    EngineError::NotFound(format!("option {} in poll {}", option_id, poll.id))
                })?;
                if poll.status == PollStatus::Active && option.vote_count > 0 {
                    return Err(EngineError::InvalidState(format!(
                        "option {} already has {} vote(s)",
                        option_id, option.vote_count
                    )));
                }
                if poll.options.len() <= 2 {
                    return Err(EngineError::Validation(
                        "a poll needs at least 2 options".to_string(),
                    ));
                }
                poll.options.retain(|o| o.id != option_id);
                if let Some(max) = poll.max_selections {
                    poll.max_selections = Some(max.min(poll.options.len() as u32));
                }
                Ok(())
            })
            .await?;

        self.log_diff(&before, &after, actor).await;
        Ok(after)
    }

    pub async fn changes(&self, poll_id: &str) -> Result<Vec<ChangeLogEntry>> {
        self.store.load_poll(poll_id).await?;
        self.store.changes(poll_id).await
    }

    fn validate(&self, poll: &Poll) -> Result<()> {
        validate_poll(poll, self.max_options)
    }

    /// Load, modify and write back under optimistic concurrency, retrying
    /// when another edit or a status change bumped the version in between.
    async fn mutate<F>(&self, poll_id: &str, apply: F) -> Result<(Poll, Poll)>
    where
        F: Fn(&mut Poll) -> Result<()>,
    {
        for attempt in 1..=self.conflict_retries {
            let before = self.store.load_poll(poll_id).await?;
            let mut poll = before.clone();
            apply(&mut poll)?;
            match self.store.update_poll(&poll, before.version).await {
                Ok(stored) => return Ok((before, stored)),
                Err(e) if e.is_retryable() => {
                    debug!("Poll {} update conflict (attempt {}): {}", poll_id, attempt, e);
                }
                Err(e) => return Err(e),
            }
        }
        error!("Giving up on poll {} update after {} conflicts", poll_id, self.conflict_retries);
        Err(EngineError::Storage(format!(
            "poll {} is under heavy contention; update not applied",
            poll_id
        )))
    }

    /// Status-guarded move to `target`. Only the status is compared, so votes
    /// and definition edits landing in between never force a retry.
    async fn advance(&self, poll_id: &str, target: PollStatus) -> Result<Advance> {
        // Status only moves forward, so a lost race settles within three
        // reads; lock contention gets the usual retry budget.
        let mut conflicts = 0;
        loop {
            let current = self.store.load_poll(poll_id).await?.status;
            if !current.can_advance_to(target) {
                return Ok(Advance::Blocked(current));
            }
            match self.store.transition_status(poll_id, current, target).await {
                Ok(Some(poll)) => {
                    return Ok(Advance::Moved {
                        from: current,
                        poll,
                    });
                }
                Ok(None) => {
                    debug!("Poll {} left {} before it could move to {}", poll_id, current, target);
                }
                Err(e) if e.is_retryable() && conflicts < self.conflict_retries => {
                    conflicts += 1;
                    debug!("Poll {} status change conflict (attempt {}): {}", poll_id, conflicts, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record_transition(&self, from: PollStatus, poll: &Poll, actor: &str, at: DateTime<Utc>) {
        self.log_change(
            &poll.id,
            "status",
            Some(from.to_string()),
            Some(poll.status.to_string()),
            actor,
            at,
        )
        .await;
        let kind = match poll.status {
            PollStatus::Active => LifecycleEventKind::Activated,
            PollStatus::Closed => LifecycleEventKind::Closed,
            PollStatus::Draft => return,
        };
        self.publish(&poll.id, kind, actor, at);
    }

    async fn log_diff(&self, before: &Poll, after: &Poll, actor: &str) {
        let now = Utc::now();
        for (field, old, new) in diff_polls(before, after) {
            self.log_change(&after.id, field, Some(old), Some(new), actor, now).await;
        }
    }

    async fn log_change(
        &self,
        poll_id: &str,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        let entry = ChangeLogEntry {
            poll_id: poll_id.to_string(),
            field: field.to_string(),
            old_value,
            new_value,
            actor: actor.to_string(),
            at,
        };
        // The change itself is already stored; a lost audit line is logged,
        // not turned into a failed operation.
        if let Err(e) = self.store.append_change(&entry).await {
            error!("Failed to record change to poll {} ({}): {}", poll_id, field, e);
        }
    }
}

enum Advance {
    Moved { from: PollStatus, poll: Poll },
    /// The poll's current status does not lead to the target.
    Blocked(PollStatus),
}

pub(crate) fn normalize_category(category: Option<String>) -> Option<String> {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

pub(crate) fn build_options(texts: &[String]) -> Result<Vec<PollOption>> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            if text.trim().is_empty() {
                Err(EngineError::Validation(format!("option {} is empty", i + 1)))
            } else {
                Ok(PollOption::new(text))
            }
        })
        .collect()
}

fn validate_poll(poll: &Poll, max_options: usize) -> Result<()> {
    if poll.title.trim().is_empty() {
        return Err(EngineError::Validation("title must not be empty".to_string()));
    }
    if poll.options.len() < 2 {
        return Err(EngineError::Validation("a poll needs at least 2 options".to_string()));
    }
    if poll.options.len() > max_options {
        return Err(EngineError::Validation(format!(
            "a poll may have at most {} options",
            max_options
        )));
    }
    if poll.scope.value().is_some_and(|v| v.trim().is_empty()) {
        return Err(EngineError::Validation(format!(
            "scope value is required for {} polls",
            poll.scope.kind().as_str()
        )));
    }
    if let Some(max) = poll.max_selections {
        if !poll.allow_multiple {
            return Err(EngineError::Validation(
                "max selections only applies to multi-select polls".to_string(),
            ));
        }
        if max == 0 || max as usize > poll.options.len() {
            return Err(EngineError::Validation(format!(
                "max selections must be between 1 and {}",
                poll.options.len()
            )));
        }
    }
    if let (Some(start), Some(end)) = (poll.start_at, poll.end_at) {
        if end <= start {
            return Err(EngineError::Validation("end time must be after start time".to_string()));
        }
    }
    Ok(())
}

fn apply_patch(poll: &mut Poll, patch: &PollPatch) -> Result<()> {
    if let Some(title) = &patch.title {
        poll.title = title.trim().to_string();
    }
    if let Some(description) = &patch.description {
        poll.description = description.trim().to_string();
    }
    if let Some(category) = &patch.category {
        poll.category = normalize_category(category.clone());
    }
    if let Some(scope) = &patch.scope {
        poll.scope = Scope::from_parts(scope.kind(), scope.value())?;
    }
    if let Some(options) = &patch.options {
        poll.options = build_options(options)?;
    }
    if let Some(allow_multiple) = patch.allow_multiple {
        poll.allow_multiple = allow_multiple;
        if !allow_multiple && patch.max_selections.is_none() {
            poll.max_selections = None;
        }
    }
    if let Some(max_selections) = patch.max_selections {
        poll.max_selections = max_selections;
    }
    if let Some(is_anonymous) = patch.is_anonymous {
        poll.is_anonymous = is_anonymous;
    }
    if let Some(start_at) = patch.start_at {
        poll.start_at = start_at;
    }
    if let Some(end_at) = patch.end_at {
        poll.end_at = end_at;
    }
    if let Some(disclosure) = patch.disclosure {
        poll.disclosure = disclosure;
    }
    Ok(())
}

fn render<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Field-level differences between two versions of a poll, rendered as JSON.
fn diff_polls(before: &Poll, after: &Poll) -> Vec<(&'static str, String, String)> {
    let mut out = Vec::new();
    let mut check = |field: &'static str, old: String, new: String| {
        if old != new {
            out.push((field, old, new));
        }
    };
    check("title", render(&before.title), render(&after.title));
    check("description", render(&before.description), render(&after.description));
    check("category", render(&before.category), render(&after.category));
    check("scope", render(&before.scope), render(&after.scope));
    let texts = |p: &Poll| p.options.iter().map(|o| o.text.clone()).collect::<Vec<_>>();
    check("options", render(&texts(before)), render(&texts(after)));
    check("allowMultiple", render(&before.allow_multiple), render(&after.allow_multiple));
    check("maxSelections", render(&before.max_selections), render(&after.max_selections));
    check("isAnonymous", render(&before.is_anonymous), render(&after.is_anonymous));
    check("startAt", render(&before.start_at), render(&after.start_at));
    check("endAt", render(&before.end_at), render(&after.end_at));
    check("disclosure", render(&before.disclosure), render(&after.disclosure));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::ScopeKind;
    use chrono::Duration;

    fn catalog() -> PollCatalog {
        PollCatalog::new(Arc::new(MemoryStore::new()), 10, 3)
    }

    fn lunch() -> PollDefinition {
        PollDefinition::new("Lunch", ScopeKind::University, &["Pizza", "Sushi"])
    }

    #[tokio::test]
    async fn create_defaults_to_active() {
        let catalog = catalog();
        let poll = catalog.create_poll(lunch(), "admin").await.unwrap();
        assert_eq!(poll.status, PollStatus::Active);
        assert_eq!(poll.options.len(), 2);
        assert_ne!(poll.options[0].id, poll.options[1].id);
    }

    #[tokio::test]
    async fn create_reports_first_violated_rule() {
        let catalog = catalog();

        let mut def = lunch();
        def.title = "   ".into();
        def.options = vec!["only".into()];
        let err = catalog.create_poll(def, "admin").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("title")));

        let mut def = lunch();
        def.options = vec!["only".into()];
        let err = catalog.create_poll(def, "admin").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("at least 2")));

        let mut def = lunch();
        def.options = vec!["Pizza".into(), "  ".into()];
        assert!(matches!(
            catalog.create_poll(def, "admin").await,
            Err(EngineError::Validation(_))
        ));

        let mut def = lunch();
        def.scope = ScopeKind::Faculty;
        assert!(matches!(
            catalog.create_poll(def, "admin").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_option_text_gets_distinct_ids() {
        let catalog = catalog();
        let mut def = lunch();
        def.options = vec!["Same".into(), "Same".into()];
        let poll = catalog.create_poll(def, "admin").await.unwrap();
        assert_eq!(poll.options[0].text, poll.options[1].text);
        assert_ne!(poll.options[0].id, poll.options[1].id);
    }

    #[tokio::test]
    async fn future_start_keeps_poll_in_draft() {
        let catalog = catalog();
        let mut def = lunch();
        def.start_at = Some(Utc::now() + Duration::hours(1));
        let poll = catalog.create_poll(def, "admin").await.unwrap();
        assert_eq!(poll.status, PollStatus::Draft);
    }

    #[tokio::test]
    async fn structural_edits_rejected_once_active() {
        let catalog = catalog();
        let poll = catalog.create_poll(lunch(), "admin").await.unwrap();

        let patch = PollPatch {
            allow_multiple: Some(true),
            ..PollPatch::default()
        };
        let err = catalog.edit_poll(&poll.id, patch, "admin").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let patch = PollPatch {
            description: Some("Friday lunch order".into()),
            ..PollPatch::default()
        };
        let edited = catalog.edit_poll(&poll.id, patch, "admin").await.unwrap();
        assert_eq!(edited.description, "Friday lunch order");
    }

    #[tokio::test]
    async fn draft_accepts_option_replacement() {
        let catalog = catalog();
        let mut def = lunch();
        def.save_as_draft = true;
        let poll = catalog.create_poll(def, "admin").await.unwrap();

        let patch = PollPatch {
            options: Some(vec!["Pizza".into(), "Sushi".into(), "Tacos".into()]),
            allow_multiple: Some(true),
            ..PollPatch::default()
        };
        let edited = catalog.edit_poll(&poll.id, patch, "admin").await.unwrap();
        assert_eq!(edited.options.len(), 3);
        assert!(edited.allow_multiple);
    }

    #[tokio::test]
    async fn status_transitions_are_monotonic() {
        let catalog = catalog();
        let mut def = lunch();
        def.save_as_draft = true;
        let poll = catalog.create_poll(def, "admin").await.unwrap();

        let err = catalog
            .set_status(&poll.id, PollStatus::Closed, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        catalog.set_status(&poll.id, PollStatus::Active, "admin").await.unwrap();
        let err = catalog
            .set_status(&poll.id, PollStatus::Draft, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        catalog.set_status(&poll.id, PollStatus::Closed, "admin").await.unwrap();
        let err = catalog
            .set_status(&poll.id, PollStatus::Closed, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn scheduled_close_is_idempotent() {
        let catalog = catalog();
        let poll = catalog.create_poll(lunch(), "admin").await.unwrap();
        let now = Utc::now();

        let first = catalog
            .apply_scheduled(&poll.id, PollStatus::Closed, "scheduler", now)
            .await
            .unwrap();
        assert_eq!(first.map(|p| p.status), Some(PollStatus::Closed));

        let second = catalog
            .apply_scheduled(&poll.id, PollStatus::Closed, "scheduler", now)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn option_count_stays_within_bounds() {
        let catalog = PollCatalog::new(Arc::new(MemoryStore::new()), 3, 3);
        let poll = catalog.create_poll(lunch(), "admin").await.unwrap();

        let poll = catalog.add_option(&poll.id, "Tacos", "admin").await.unwrap();
        assert_eq!(poll.options.len(), 3);
        assert!(matches!(
            catalog.add_option(&poll.id, "Curry", "admin").await,
            Err(EngineError::Validation(_))
        ));

        let tacos = poll.options[2].id.clone();
        let poll = catalog.remove_option(&poll.id, &tacos, "admin").await.unwrap();
        let pizza = poll.options[0].id.clone();
        assert!(matches!(
            catalog.remove_option(&poll.id, &pizza, "admin").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            catalog.remove_option(&poll.id, "nope", "admin").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn edits_are_written_to_change_log() {
        let catalog = catalog();
        let poll = catalog.create_poll(lunch(), "admin").await.unwrap();
        catalog
            .edit_poll(
                &poll.id,
                PollPatch {
                    description: Some("new".into()),
                    ..PollPatch::default()
                },
                "editor",
            )
            .await
            .unwrap();
        catalog.set_status(&poll.id, PollStatus::Closed, "admin").await.unwrap();

        let changes = catalog.changes(&poll.id).await.unwrap();
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["created", "description", "status"]);
        assert_eq!(changes[1].actor, "editor");
        assert_eq!(changes[2].old_value.as_deref(), Some("active"));
        assert_eq!(changes[2].new_value.as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn visible_polls_hide_drafts_and_other_faculties() {
        let catalog = catalog();
        let mut eng = lunch();
        eng.scope = ScopeKind::Faculty;
        eng.scope_value = Some("Engineering".into());
        let eng = catalog.create_poll(eng, "admin").await.unwrap();

        let mut draft = lunch();
        draft.save_as_draft = true;
        catalog.create_poll(draft, "admin").await.unwrap();

        let arts_voter = Voter::new("a").with_faculty("Arts");
        let eng_voter = Voter::new("e").with_faculty("Engineering");

        assert!(
            catalog
                .visible_polls(&arts_voter, &PollFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
        let visible = catalog
            .visible_polls(&eng_voter, &PollFilter::default())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, eng.id);
    }
}
