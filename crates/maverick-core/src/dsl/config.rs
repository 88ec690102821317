//! Engine defaults and tunable constants.
//!
//! All magic values for execution, retry, and checkpointing live here so
//! behaviour is tuned in one place.

/// Default values for workflow execution.
#[derive(Debug, Clone, Copy)]
pub struct DslDefaults {
    /// Retry attempts applied to validate steps without an explicit policy.
    pub retry_attempts: u32,
    /// Base backoff delay in seconds (doubles per attempt).
    pub retry_delay_s: f64,
    /// Cap on the backoff delay in seconds.
    pub retry_backoff_max_s: f64,
    /// Lower bound of the jitter factor applied to each delay.
    pub retry_jitter_min: f64,
    /// Item count above which a step output logs a size warning.
    pub max_output_items: usize,
    /// Checkpoint root, relative to the project directory.
    pub checkpoint_dir: &'static str,
    /// Iteration cap applied to loops that do not declare one.
    pub max_loop_iterations: u32,
}

/// Engine-wide defaults.
pub const DEFAULTS: DslDefaults = DslDefaults {
    retry_attempts: 3,
    retry_delay_s: 1.0,
    retry_backoff_max_s: 60.0,
    retry_jitter_min: 0.5,
    max_output_items: 10_000,
    checkpoint_dir: ".maverick/checkpoints",
    max_loop_iterations: 30,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert_eq!(DEFAULTS.retry_attempts, 3);
        assert!(DEFAULTS.retry_jitter_min > 0.0 && DEFAULTS.retry_jitter_min < 1.0);
        assert!(DEFAULTS.retry_delay_s <= DEFAULTS.retry_backoff_max_s);
        assert_eq!(DEFAULTS.checkpoint_dir, ".maverick/checkpoints");
        assert_eq!(DEFAULTS.max_loop_iterations, 30);
    }
}
