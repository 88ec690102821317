//! Branch step handler: evaluate option predicates in order and execute
//! the first match.
//!
//! A predicate that errors is treated as unmatched and the next option is
//! tried. When no predicate matches, the step fails.

use maverick_types::workflow::{BranchOption, StepRecord};
use serde_json::json;

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::{prefix_callback, EventCallback};

impl WorkflowExecutor {
    pub(crate) async fn run_branch_step(
        &self,
        step: &StepRecord,
        options: &[BranchOption],
        ctx: &mut WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        for (index, option) in options.iter().enumerate() {
            let matched = match ExpressionEvaluator::new(ctx).evaluate_condition(&option.when) {
                Ok(matched) => matched,
                Err(error) => {
                    tracing::debug!(
                        step = step.name.as_str(),
                        option = index,
                        %error,
                        "branch predicate errored; trying next option"
                    );
                    false
                }
            };
            if !matched {
                continue;
            }

            tracing::debug!(
                step = step.name.as_str(),
                option = index,
                selected = option.step.name.as_str(),
                "branch option selected"
            );

            // The selected step's events are rooted under this branch
            let child_callback = prefix_callback(step.name.clone(), callback.clone());
            let inner = self.run_step(&option.step, ctx, &child_callback).await;

            return match inner {
                Some(result) if result.success => Ok(StepOutcome::new(json!({
                    "selected_index": index,
                    "selected_step": option.step.name,
                    "output": result.output,
                }))),
                Some(result) => Err(StepError::Execution(format!(
                    "branch option '{}' failed: {}",
                    option.step.name,
                    result.error.unwrap_or_default()
                ))),
                // Guard on the selected step skipped it
                None => Ok(StepOutcome::new(json!({
                    "selected_index": index,
                    "selected_step": option.step.name,
                    "output": null,
                }))),
            };
        }

        Err(StepError::NoBranchMatched)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
