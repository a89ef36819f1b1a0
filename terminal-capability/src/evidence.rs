//! Decisiveness and ordering of attempts.
//!
//! Only decisive attempts may update capability flags, sets and verification
//! state. Every resolver reads attempts newest first by effective time.

use std::cmp::Ordering;

use crate::types::{Attempt, AttemptResult};

/// Whether an attempt is conclusive evidence.
///
/// A success is always decisive. A failure is decisive only when the observer
/// marked it conclusive. `Unknown` never is.
pub fn is_decisive(attempt: &Attempt) -> bool {
    match attempt.result {
        AttemptResult::Success => true,
        AttemptResult::Failure => attempt.is_conclusive_failure,
        AttemptResult::Unknown => false,
    }
}

/// Ordering used by every resolver: latest effective time first.
///
/// Ties fall back to sequence number then id, both descending, so the order
/// never depends on how the attempts were handed in.
pub fn recency(a: &Attempt, b: &Attempt) -> Ordering {
    b.effective_time()
        .cmp(&a.effective_time())
        .then_with(|| b.sequence_number.cmp(&a.sequence_number))
        .then_with(|| b.id.cmp(&a.id))
}

/// Collect attempts newest first.
pub fn newest_first<'a, I>(attempts: I) -> Vec<&'a Attempt>
where
    I: IntoIterator<Item = &'a Attempt>,
{
    let mut ordered: Vec<&Attempt> = attempts.into_iter().collect();
    ordered.sort_by(|a, b| recency(a, b));
    ordered
}
