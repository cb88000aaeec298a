pub mod ledger;
pub mod tally;
pub mod turnout;

pub use ledger::VoteLedger;
pub use tally::ResultAggregator;

use crate::models::PollStatus;
use serde::{Deserialize, Serialize};

/// Per-option line of a tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub option_id: String,
    pub text: String,
    pub votes: u64,
    pub percent: u32,
}

/// Derived view of a poll's results. Recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySnapshot {
    pub poll_id: String,
    pub status: PollStatus,
    /// Number of ballots (vote records) cast.
    pub total_votes: u64,
    pub options: Vec<OptionTally>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnout: Option<TurnoutSummary>,
}

/// Voter-roll statistics for the whole eligible roster of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnoutSummary {
    pub voter_roll: u64,
    pub voted_count: u64,
    pub not_voted_count: u64,
    pub voted_percent: u32,
    pub not_voted_percent: u32,
}

/// Turnout within one course or faculty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTurnout {
    pub total_voters: u64,
    pub voted_count: u64,
    pub turnout_percent: u32,
}

/// Leading option(s). Ties are reported, never broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "options", rename_all = "camelCase")]
pub enum Winner {
    NoVotes,
    Single(OptionTally),
    Tie(Vec<OptionTally>),
}

/// Whole-number percentage of `part` in `whole`, rounding halves up.
/// Zero when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    // floor(part * 100 / whole + 1/2) in integer arithmetic.
    let scaled = (part as u128 * 200 + whole as u128) / (whole as u128 * 2);
    scaled as u32
}
