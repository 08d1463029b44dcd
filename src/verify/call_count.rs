use super::{StrategyReport, VerificationStrategy};
use crate::trace::ExecutionTrace;
use serde::Serialize;
use std::collections::BTreeMap;

/// Exact invocation counts per step.
pub struct CallCountCheck<'a> {
    expected: &'a BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallCountResult {
    pub expected: u64,
    pub actual: u64,
    pub passed: bool,
}

impl CallCountResult {
    /// Positive when the step ran more often than expected; saturates at the
    /// `i64` bounds.
    pub fn delta(&self) -> i64 {
        let delta = i128::from(self.actual) - i128::from(self.expected);
        i64::try_from(delta).unwrap_or(if delta > 0 { i64::MAX } else { i64::MIN })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallCountReport {
    pub overall_pass: bool,
    pub steps: BTreeMap<String, CallCountResult>,
}

impl<'a> CallCountCheck<'a> {
    pub fn new(expected: &'a BTreeMap<String, u64>) -> Self {
        Self { expected }
    }

    pub fn check(&self, trace: &ExecutionTrace) -> CallCountReport {
        let steps: BTreeMap<String, CallCountResult> = self
            .expected
            .iter()
            .map(|(step, &expected)| {
                let actual = trace.call_count(step);
                let result = CallCountResult {
                    expected,
                    actual,
                    passed: expected == actual,
                };
                (step.clone(), result)
            })
            .collect();
        CallCountReport {
            overall_pass: steps.values().all(|result| result.passed),
            steps,
        }
    }
}

impl VerificationStrategy for CallCountCheck<'_> {
    fn name(&self) -> &'static str {
        "expected_calls"
    }

    fn verify(&self, trace: &ExecutionTrace) -> StrategyReport {
        StrategyReport::CallCounts(self.check(trace))
    }
}
