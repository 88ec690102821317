//! Retry policy: bounded attempts with jittered exponential backoff.
//!
//! Validate steps retry by default; any other step opts in with an explicit
//! `retry` block. The delay doubles per attempt, is capped at
//! `max_delay_s`, and is scaled by a jitter factor in
//! [`DEFAULTS.retry_jitter_min`, 1.0) so simultaneous retries spread out.

use std::time::Duration;

use maverick_types::workflow::{RetrySpec, StepKind, StepRecord};
use rand::Rng;

use super::config::DEFAULTS;

/// Resolved retry policy for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_s: f64,
    pub max_delay_s: f64,
}

impl RetryPolicy {
    /// The policy for a step: its explicit `retry` block, the default for
    /// validate steps, or `None` (single attempt).
    pub fn resolve(step: &StepRecord) -> Option<Self> {
        if let Some(spec) = &step.retry {
            return Some(Self::from_spec(spec));
        }
        if matches!(step.kind, StepKind::Validate { .. }) {
            return Some(Self {
                attempts: DEFAULTS.retry_attempts,
                delay_s: DEFAULTS.retry_delay_s,
                max_delay_s: DEFAULTS.retry_backoff_max_s,
            });
        }
        None
    }

    pub fn from_spec(spec: &RetrySpec) -> Self {
        Self {
            attempts: spec.attempts.max(1),
            delay_s: spec.delay_s,
            max_delay_s: spec.max_delay_s,
        }
    }

    /// Backoff delay before retrying after the given 1-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(24);
        let base = self.delay_s * f64::powi(2.0, exponent as i32);
        let capped = base.min(self.max_delay_s);
        let jitter = rand::thread_rng().gen_range(DEFAULTS.retry_jitter_min..1.0);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn python_step(retry: Option<RetrySpec>) -> StepRecord {
        StepRecord {
            name: "step".to_string(),
            condition: None,
            rollback: None,
            continue_on_error: false,
            retry,
            kind: StepKind::Python {
                action: "noop".to_string(),
                args: vec![],
                kwargs: serde_json::Map::new(),
            },
        }
    }

    fn validate_step() -> StepRecord {
        StepRecord {
            name: "check".to_string(),
            condition: None,
            rollback: None,
            continue_on_error: false,
            retry: None,
            kind: StepKind::Validate {
                stages: maverick_types::workflow::StagesSpec::List(vec!["lint".to_string()]),
            },
        }
    }

    #[test]
    fn plain_steps_have_no_policy() {
        assert!(RetryPolicy::resolve(&python_step(None)).is_none());
    }

    #[test]
    fn validate_steps_retry_by_default() {
        let policy = RetryPolicy::resolve(&validate_step()).unwrap();
        assert_eq!(policy.attempts, DEFAULTS.retry_attempts);
        assert_eq!(policy.delay_s, DEFAULTS.retry_delay_s);
    }

    #[test]
    fn explicit_retry_overrides_default() {
        let policy = RetryPolicy::resolve(&python_step(Some(RetrySpec {
            attempts: 5,
            delay_s: 0.5,
            max_delay_s: 10.0,
        })))
        .unwrap();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay_s, 0.5);
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        let policy = RetryPolicy::from_spec(&RetrySpec {
            attempts: 0,
            delay_s: 1.0,
            max_delay_s: 60.0,
        });
        assert_eq!(policy.attempts, 1);
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            delay_s: 1.0,
            max_delay_s: 8.0,
        };

        // With jitter in [0.5, 1.0), the delay after attempt N is within
        // [cap/2, cap) of the uncapped exponential.
        let d1 = policy.delay_after(1).as_secs_f64();
        assert!((0.5..1.0).contains(&d1), "attempt 1 delay: {d1}");

        let d3 = policy.delay_after(3).as_secs_f64();
        assert!((2.0..4.0).contains(&d3), "attempt 3 delay: {d3}");

        // Far past the cap: never exceeds max_delay_s
        let d9 = policy.delay_after(9).as_secs_f64();
        assert!(d9 < 8.0, "attempt 9 delay exceeds cap: {d9}");
    }
}
