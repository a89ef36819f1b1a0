//! Generic last-writer-wins fold over an ordered attempt history.

use std::collections::{BTreeMap, BTreeSet};

use crate::rules::{MergePolicy, Rule};
use crate::types::{Attempt, AttemptResult, TriState};

/// What one rule concluded from the history.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    /// Latest qualifying attempt; `None` keeps the stored value.
    Latest(Option<&'a Attempt>),
    /// Sub-keys whose latest qualifying attempt succeeded.
    Members(BTreeSet<String>),
    TriState(TriState),
}

/// Most recent qualifying attempt per sub-key.
///
/// `ordered` must already be newest first; the first attempt seen for a
/// sub-key wins and older ones are ignored.
pub fn latest_by_key<'a>(rule: &Rule, ordered: &[&'a Attempt]) -> BTreeMap<String, &'a Attempt> {
    let mut winners = BTreeMap::new();
    for attempt in ordered {
        if rule.decisive_required && !attempt.is_decisive() {
            continue;
        }
        if let Some(key) = rule.probe.key(attempt) {
            winners.entry(key).or_insert(*attempt);
        }
    }
    winners
}

/// Run one rule over a newest-first history.
pub fn resolve<'a>(rule: &Rule, ordered: &[&'a Attempt]) -> Resolution<'a> {
    let winners = latest_by_key(rule, ordered);
    match rule.policy {
        MergePolicy::Preserve => Resolution::Latest(winners.into_values().next()),
        MergePolicy::ResetToEmpty => Resolution::Members(
            winners
                .into_iter()
                .filter(|(_, attempt)| attempt.result == AttemptResult::Success)
                .map(|(key, _)| key)
                .collect(),
        ),
        MergePolicy::UnknownOnAbsent => {
            let state = match winners.into_values().next().map(|a| a.result) {
                Some(AttemptResult::Success) => TriState::Supported,
                Some(AttemptResult::Failure) => TriState::Unsupported,
                Some(AttemptResult::Unknown) | None => TriState::Unknown,
            };
            Resolution::TriState(state)
        }
    }
}
