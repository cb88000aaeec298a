use super::turnout::{self, eligible_roster};
use super::{GroupTurnout, OptionTally, TallySnapshot, TurnoutSummary, Winner, percent};
use crate::db::{PollSnapshot, PollStore};
use crate::error::{EngineError, Result};
use crate::models::{Poll, VoteRecord, Voter};
use crate::tasks::lifecycle;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A stored ballot as exposed for auditing. The voter is hidden on anonymous
/// polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub voter_id: Option<String>,
    pub option_ids: Vec<String>,
    pub cast_at: DateTime<Utc>,
}

/// Read-only result queries. Never mutates polls or vote records.
pub struct ResultAggregator {
    store: Arc<dyn PollStore>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self { store }
    }

    /// Per-option votes and percentages. Counts and the ballot total come from
    /// one consistent store read.
    pub async fn tally(&self, poll_id: &str) -> Result<TallySnapshot> {
        let snapshot = self.store.snapshot(poll_id).await?;
        Ok(build_tally(&snapshot))
    }

    /// `tally` plus voter-roll statistics over the eligible part of `roster`.
    /// Counters and the set of voters come from the same snapshot, so every
    /// counted ballot belongs to a voter the turnout sees.
    pub async fn tally_with_roster(&self, poll_id: &str, roster: &[Voter]) -> Result<TallySnapshot> {
        let snapshot = self.store.snapshot(poll_id).await?;
        let mut tally = build_tally(&snapshot);
        tally.turnout = Some(turnout::summarize(
            &eligible_roster(&snapshot.poll, roster),
            &snapshot.voters,
        ));
        Ok(tally)
    }

    /// The tally as a voter may see it at `now`; `InvalidState` while the
    /// poll's disclosure policy still hides results.
    pub async fn disclosed_tally(&self, poll_id: &str, now: DateTime<Utc>) -> Result<TallySnapshot> {
        let snapshot = self.store.snapshot(poll_id).await?;
        if !lifecycle::results_visible(&snapshot.poll, now) {
            return Err(EngineError::InvalidState(format!(
                "results for poll {} are not disclosed yet",
                poll_id
            )));
        }
        Ok(build_tally(&snapshot))
    }

    pub async fn winning_option(&self, poll_id: &str) -> Result<Winner> {
        let tally = self.tally(poll_id).await?;
        Ok(leaders(&tally))
    }

    pub async fn turnout(&self, poll_id: &str, roster: &[Voter]) -> Result<TurnoutSummary> {
        let snapshot = self.store.snapshot(poll_id).await?;
        Ok(turnout::summarize(
            &eligible_roster(&snapshot.poll, roster),
            &snapshot.voters,
        ))
    }

    /// Turnout per course (course polls) or per faculty (faculty and
    /// university-wide polls), limited to roster members who can see the
    /// poll.
    pub async fn scoped_turnout(
        &self,
        poll_id: &str,
        roster: &[Voter],
    ) -> Result<BTreeMap<String, GroupTurnout>> {
        let snapshot = self.store.snapshot(poll_id).await?;
        let groups = turnout::by_group(&snapshot.poll, roster, &snapshot.voters);
        debug!("Computed turnout for {} group(s) on poll {}", groups.len(), poll_id);
        Ok(groups)
    }

    pub async fn ballots(&self, poll_id: &str) -> Result<Vec<Ballot>> {
        let poll = self.store.load_poll(poll_id).await?;
        let records = self.store.vote_records(poll_id).await?;
        Ok(records
            .into_iter()
            .map(|r| redact(&poll, r))
            .collect())
    }
}

fn redact(poll: &Poll, record: VoteRecord) -> Ballot {
    Ballot {
        voter_id: if poll.is_anonymous {
            None
        } else {
            Some(record.voter_id)
        },
        option_ids: record.option_ids,
        cast_at: record.cast_at,
    }
}

pub(crate) fn build_tally(snapshot: &PollSnapshot) -> TallySnapshot {
    let poll = &snapshot.poll;
    let total_votes = snapshot.ballots();
    let options = poll
        .options
        .iter()
        .map(|option| OptionTally {
            option_id: option.id.clone(),
            text: option.text.clone(),
            votes: option.vote_count,
            percent: percent(option.vote_count, total_votes),
        })
        .collect();

    TallySnapshot {
        poll_id: poll.id.clone(),
        status: poll.status,
        total_votes,
        options,
        turnout: None,
    }
}

fn leaders(tally: &TallySnapshot) -> Winner {
    let top = tally.options.iter().map(|o| o.votes).max().unwrap_or(0);
    if tally.total_votes == 0 || top == 0 {
        return Winner::NoVotes;
    }
    let mut best: Vec<OptionTally> = tally
        .options
        .iter()
        .filter(|o| o.votes == top)
        .cloned()
        .collect();
    if best.len() == 1 {
        Winner::Single(best.remove(0))
    } else {
        Winner::Tie(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PollOption, PollStatus, ResultDisclosure, Scope};

    fn snapshot(counts: &[u64], ballots: u64) -> PollSnapshot {
        let voters = (0..ballots).map(|i| format!("v{}", i)).collect();
        let options = counts
            .iter()
            .enumerate()
            .map(|(i, c)| PollOption {
                id: format!("o{}", i),
                text: format!("Option {}", i),
                vote_count: *c,
            })
            .collect();
        PollSnapshot {
            poll: Poll {
                id: "p".into(),
                title: "t".into(),
                description: String::new(),
                scope: Scope::University,
                category: None,
                options,
                allow_multiple: false,
                max_selections: None,
                is_anonymous: false,
                status: PollStatus::Active,
                disclosure: ResultDisclosure::OnClose,
                created_at: Utc::now(),
                start_at: None,
                end_at: None,
                disclosed_at: None,
                version: 0,
            },
            voters,
        }
    }

    #[test]
    fn one_and_two_votes_give_33_and_67() {
        let tally = build_tally(&snapshot(&[1, 2], 3));
        let percents: Vec<u32> = tally.options.iter().map(|o| o.percent).collect();
        assert_eq!(percents, vec![33, 67]);
        assert_eq!(tally.total_votes, 3);
    }

    #[test]
    fn empty_poll_has_zero_percentages() {
        let tally = build_tally(&snapshot(&[0, 0, 0], 0));
        assert!(tally.options.iter().all(|o| o.percent == 0));
        assert_eq!(leaders(&tally), Winner::NoVotes);
    }

    #[test]
    fn ties_are_reported_not_broken() {
        let tally = build_tally(&snapshot(&[2, 2, 1], 5));
        match leaders(&tally) {
            Winner::Tie(options) => {
                let ids: Vec<&str> = options.iter().map(|o| o.option_id.as_str()).collect();
                assert_eq!(ids, vec!["o0", "o1"]);
            }
            other => panic!("expected a tie, got {:?}", other),
        }
    }

    #[test]
    fn single_leader() {
        let tally = build_tally(&snapshot(&[1, 4], 5));
        match leaders(&tally) {
            Winner::Single(option) => assert_eq!(option.option_id, "o1"),
            other => panic!("expected a single winner, got {:?}", other),
        }
    }
}
