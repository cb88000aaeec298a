use crate::db::PollStore;
use crate::error::{EngineError, Result};
use crate::models::{Poll, PollStatus, VoteRecord, Voter};
use crate::scope;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Records ballots. The only writer of vote counters.
pub struct VoteLedger {
    store: Arc<dyn PollStore>,
    conflict_retries: u32,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn PollStore>, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries: conflict_retries.max(1),
        }
    }

    /// Casts `voter_id`'s ballot on `poll_id`.
    ///
    /// Checks run in this order: unknown poll or option (`NotFound`), poll not
    /// active or past its end time (`InvalidState`), malformed selection (`Validation`), existing
    /// ballot (`AlreadyVoted`). The last check and the write happen atomically
    /// in the store, so of many concurrent calls for the same pair exactly one
    /// succeeds.
    ///
    /// A caller that timed out should not blindly retry: a later
    /// `AlreadyVoted` means the first attempt was recorded.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        voter_id: &str,
        option_ids: Vec<String>,
    ) -> Result<VoteRecord> {
        if voter_id.trim().is_empty() {
            return Err(EngineError::Validation("voter id must not be empty".to_string()));
        }

        let now = Utc::now();
        let poll = self.store.load_poll(poll_id).await?;
        check_selection(&poll, &option_ids, now)?;

        // The store repeats the status and end time check against `cast_at`
        // inside the write, so a close landing after this point still wins.
        let record = VoteRecord {
            poll_id: poll_id.to_string(),
            voter_id: voter_id.to_string(),
            option_ids,
            cast_at: now,
        };

        for attempt in 1..=self.conflict_retries {
            match self.store.record_vote(&record).await {
                Ok(()) => {
                    info!(
                        "Recorded vote on poll {} ({} option(s)) for voter {}",
                        poll_id,
                        record.option_ids.len(),
                        voter_id
                    );
                    return Ok(record);
                }
                Err(e) if e.is_retryable() => {
                    debug!("Vote on poll {} hit a conflict (attempt {}): {}", poll_id, attempt, e);
                }
                Err(e @ EngineError::AlreadyVoted { .. }) => {
                    info!("Voter {} already has a vote on poll {}", voter_id, poll_id);
                    return Err(e);
                }
                Err(e) => {
                    if let EngineError::Storage(_) = &e {
                        error!("Failed to store vote on poll {}: {}", poll_id, e);
                    }
                    return Err(e);
                }
            }
        }

        error!(
            "Giving up on vote for poll {} after {} conflicts",
            poll_id, self.conflict_retries
        );
        Err(EngineError::Storage(format!(
            "poll {} is under heavy contention; vote not recorded",
            poll_id
        )))
    }

    /// Like `cast_vote`, but first applies scope visibility. A poll the voter
    /// cannot see is reported as not found.
    pub async fn cast_vote_as(
        &self,
        poll_id: &str,
        voter: &Voter,
        option_ids: Vec<String>,
    ) -> Result<VoteRecord> {
        let poll = self.store.load_poll(poll_id).await?;
        if !scope::is_visible(&poll, voter) {
            warn!("Voter {} tried to vote on poll {} outside their scope", voter.id, poll_id);
            return Err(EngineError::poll_not_found(poll_id));
        }
        self.cast_vote(poll_id, &voter.id, option_ids).await
    }

    /// May lag a vote being written concurrently.
    pub async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool> {
        self.store.has_voted(poll_id, voter_id).await
    }
}

fn check_selection(poll: &Poll, option_ids: &[String], now: DateTime<Utc>) -> Result<()> {
    if let Some(unknown) = option_ids.iter().find(|id| poll.option(id).is_none()) {
        return Err(EngineError::NotFound(format!(
            "option {} in poll {}",
            unknown, poll.id
        )));
    }
    if poll.status != PollStatus::Active {
        return Err(EngineError::InvalidState(format!(
            "poll {} is {}, not active",
            poll.id, poll.status
        )));
    }
    if !poll.accepts_votes_at(now) {
        return Err(EngineError::InvalidState(format!(
            "poll {} has passed its end time",
            poll.id
        )));
    }
    if option_ids.is_empty() {
        return Err(EngineError::Validation("select at least one option".to_string()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = option_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(EngineError::Validation(format!("option {} selected twice", dup)));
    }
    if !poll.allow_multiple && option_ids.len() > 1 {
        return Err(EngineError::Validation(
            "this poll accepts a single selection".to_string(),
        ));
    }
    let limit = poll.selection_limit();
    if option_ids.len() > limit {
        return Err(EngineError::Validation(format!(
            "at most {} option(s) may be selected",
            limit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PollOption, ResultDisclosure, Scope};

    fn poll(allow_multiple: bool, max_selections: Option<u32>, status: PollStatus) -> Poll {
        Poll {
            id: "p".into(),
            title: "t".into(),
            description: String::new(),
            scope: Scope::University,
            category: None,
            options: vec![
                PollOption { id: "a".into(), text: "A".into(), vote_count: 0 },
                PollOption { id: "b".into(), text: "B".into(), vote_count: 0 },
                PollOption { id: "c".into(), text: "C".into(), vote_count: 0 },
            ],
            allow_multiple,
            max_selections,
            is_anonymous: false,
            status,
            disclosure: ResultDisclosure::OnClose,
            created_at: Utc::now(),
            start_at: None,
            end_at: None,
            disclosed_at: None,
            version: 0,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn check(poll: &Poll, option_ids: &[String]) -> Result<()> {
        check_selection(poll, option_ids, Utc::now())
    }

    #[test]
    fn unknown_option_reported_before_state() {
        let p = poll(false, None, PollStatus::Closed);
        assert!(matches!(check(&p, &ids(&["zzz"])), Err(EngineError::NotFound(_))));
        assert!(matches!(check(&p, &ids(&["a"])), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn selection_shape_rules() {
        let single = poll(false, None, PollStatus::Active);
        assert!(check(&single, &ids(&["a"])).is_ok());
        assert!(matches!(check(&single, &[]), Err(EngineError::Validation(_))));
        assert!(matches!(
            check(&single, &ids(&["a", "b"])),
            Err(EngineError::Validation(_))
        ));

        let multi = poll(true, None, PollStatus::Active);
        assert!(check(&multi, &ids(&["a", "b", "c"])).is_ok());
        assert!(matches!(
            check(&multi, &ids(&["a", "a"])),
            Err(EngineError::Validation(_))
        ));

        let capped = poll(true, Some(2), PollStatus::Active);
        assert!(check(&capped, &ids(&["a", "c"])).is_ok());
        assert!(matches!(
            check(&capped, &ids(&["a", "b", "c"])),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn past_end_time_closes_voting_before_scheduler() {
        let mut p = poll(false, None, PollStatus::Active);
        let now = Utc::now();
        p.end_at = Some(now);
        let err = check_selection(&p, &ids(&["a"]), now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(msg) if msg.contains("end time")));

        p.end_at = Some(now + chrono::Duration::minutes(1));
        assert!(check_selection(&p, &ids(&["a"]), now).is_ok());
    }
}
