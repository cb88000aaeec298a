//! Lifecycle state derived from a poll and the current time.

use crate::models::{Poll, PollStatus, ResultDisclosure, Survey};
use chrono::{DateTime, Duration, Utc};

/// The scheduled transition that is due at `now`, if any.
pub fn due_transition(poll: &Poll, now: DateTime<Utc>) -> Option<PollStatus> {
    due_step(poll.status, poll.start_at, poll.end_at, now)
}

pub fn due_survey_transition(survey: &Survey, now: DateTime<Utc>) -> Option<PollStatus> {
    due_step(survey.status, survey.start_at, survey.end_at, now)
}

fn due_step(
    status: PollStatus,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<PollStatus> {
    match status {
        PollStatus::Draft => start_at.filter(|s| *s <= now).map(|_| PollStatus::Active),
        PollStatus::Active => end_at.filter(|e| *e <= now).map(|_| PollStatus::Closed),
        PollStatus::Closed => None,
    }
}

pub fn results_visible(poll: &Poll, now: DateTime<Utc>) -> bool {
    match poll.disclosure {
        ResultDisclosure::Live => poll.status != PollStatus::Draft,
        ResultDisclosure::OnClose => poll.status == PollStatus::Closed,
        ResultDisclosure::At(at) => poll.status != PollStatus::Draft && at <= now,
    }
}

/// Time left until the poll's end. Zero once the end has passed; `None` for
/// polls without an end time.
pub fn time_remaining(poll: &Poll, now: DateTime<Utc>) -> Option<Duration> {
    poll.end_at.map(|end| (end - now).max(Duration::zero()))
}
