use super::{GroupTurnout, TurnoutSummary, percent};
use crate::models::{Poll, Voter};
use crate::scope;
use std::collections::{BTreeMap, HashSet};

/// Roster members who can see `poll`, each counted once.
pub fn eligible_roster<'a>(poll: &Poll, roster: &'a [Voter]) -> Vec<&'a Voter> {
    let mut seen = HashSet::new();
    roster
        .iter()
        .filter(|v| scope::is_visible(poll, v))
        .filter(|v| seen.insert(v.id.as_str()))
        .collect()
}

pub fn summarize(eligible: &[&Voter], voted: &HashSet<String>) -> TurnoutSummary {
    let voter_roll = eligible.len() as u64;
    let voted_count = eligible.iter().filter(|v| voted.contains(&v.id)).count() as u64;
    let not_voted_count = voter_roll - voted_count;
    TurnoutSummary {
        voter_roll,
        voted_count,
        not_voted_count,
        voted_percent: percent(voted_count, voter_roll),
        not_voted_percent: percent(not_voted_count, voter_roll),
    }
}

/// Groups eligible voters by the poll's turnout dimension. Voters without
/// that attribute are left out of the breakdown.
pub fn by_group(poll: &Poll, roster: &[Voter], voted: &HashSet<String>) -> BTreeMap<String, GroupTurnout> {
    let dimension = scope::turnout_dimension(&poll.scope);
    let mut groups: BTreeMap<String, GroupTurnout> = BTreeMap::new();

    for voter in eligible_roster(poll, roster) {
        let Some(group) = scope::group_of(voter, dimension) else {
            continue;
        };
        let entry = groups.entry(group.to_string()).or_insert(GroupTurnout {
            total_voters: 0,
            voted_count: 0,
            turnout_percent: 0,
        });
        entry.total_voters += 1;
        if voted.contains(&voter.id) {
            entry.voted_count += 1;
        }
    }

    for entry in groups.values_mut() {
        entry.turnout_percent = percent(entry.voted_count, entry.total_voters);
    }
    groups
}
