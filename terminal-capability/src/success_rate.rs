//! Aggregate success-rate policy.
//!
//! Independent of the per-field resolvers: a terminal whose attempts mostly
//! fail is demoted from `active` to `inactive`. The policy only ever demotes;
//! bringing a terminal back is an editorial decision.

use serde::{Deserialize, Serialize};

use crate::types::{Attempt, AttemptResult, DeviceStatus};

/// Thresholds for the success-rate policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessRatePolicy {
    /// Apply the policy at all
    pub enabled: bool,
    /// Minimum number of attempts before the rate is trusted
    pub min_attempts: usize,
    /// Terminals strictly below this rate are demoted (0.0 - 1.0)
    pub min_success_rate: f64,
}

impl Default for SuccessRatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_attempts: 5,
            min_success_rate: 0.5,
        }
    }
}

/// Success-rate verdict for one terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SuccessRateAssessment {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    /// `successful / total`, 0 when there are no attempts
    pub success_rate: f64,
    /// Whether the terminal should move to `inactive`
    pub demote: bool,
}

/// Count attempts and successes.
pub fn success_rate<'a, I>(attempts: I) -> SuccessRateAssessment
where
    I: IntoIterator<Item = &'a Attempt>,
{
    let (total, successful) = attempts.into_iter().fold((0usize, 0usize), |(t, s), a| {
        (t + 1, s + usize::from(a.result == AttemptResult::Success))
    });
    let rate = if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    };
    SuccessRateAssessment {
        total_attempts: total,
        successful_attempts: successful,
        success_rate: rate,
        demote: false,
    }
}

/// Evaluate the policy for a terminal whose current status is `current`.
pub fn evaluate_success_rate<'a, I>(
    current: DeviceStatus,
    attempts: I,
    policy: &SuccessRatePolicy,
) -> SuccessRateAssessment
where
    I: IntoIterator<Item = &'a Attempt>,
{
    let mut assessment = success_rate(attempts);
    let below_threshold = (assessment.successful_attempts as f64)
        < policy.min_success_rate * assessment.total_attempts as f64;
    assessment.demote = policy.enabled
        && current == DeviceStatus::Active
        && assessment.total_attempts >= policy.min_attempts
        && below_threshold;
    assessment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(successes: usize, failures: usize) -> Vec<Attempt> {
        let mut attempts: Vec<Attempt> = (0..successes).map(|_| Attempt::success("t")).collect();
        attempts.extend((0..failures).map(|_| Attempt::conclusive_failure("t")));
        attempts
    }

    #[test]
    fn test_empty_history_has_zero_rate() {
        let assessment = success_rate(&Vec::<Attempt>::new());
        assert_eq!(assessment.total_attempts, 0);
        assert_eq!(assessment.success_rate, 0.0);
    }

    #[test]
    fn test_exactly_half_is_not_demoted() {
        let policy = SuccessRatePolicy::default();
        let assessment = evaluate_success_rate(DeviceStatus::Active, &history(3, 3), &policy);
        assert_eq!(assessment.success_rate, 0.5);
        assert!(!assessment.demote);
    }

    #[test]
    fn test_two_of_five_demotes_only_active_terminals() {
        let policy = SuccessRatePolicy::default();
        let attempts = history(2, 3);

        assert!(evaluate_success_rate(DeviceStatus::Active, &attempts, &policy).demote);
        assert!(!evaluate_success_rate(DeviceStatus::Inactive, &attempts, &policy).demote);
        assert!(!evaluate_success_rate(DeviceStatus::Maintenance, &attempts, &policy).demote);
    }

    #[test]
    fn test_too_few_attempts_are_not_trusted() {
        let policy = SuccessRatePolicy::default();
        let assessment = evaluate_success_rate(DeviceStatus::Active, &history(0, 4), &policy);
        assert!(!assessment.demote);
    }

    #[test]
    fn test_unknown_results_count_toward_total() {
        let mut attempts = history(3, 0);
        attempts.extend((0..3).map(|_| Attempt::new("t", AttemptResult::Unknown)));
        attempts.push(Attempt::new("t", AttemptResult::Failure));

        let assessment =
            evaluate_success_rate(DeviceStatus::Active, &attempts, &SuccessRatePolicy::default());
        assert_eq!(assessment.total_attempts, 7);
        assert!(assessment.demote);
    }

    #[test]
    fn test_disabled_policy_never_demotes() {
        let policy = SuccessRatePolicy {
            enabled: false,
            ..Default::default()
        };
        assert!(!evaluate_success_rate(DeviceStatus::Active, &history(0, 10), &policy).demote);
    }
}
