use super::{StrategyReport, VerificationStrategy};
use crate::trace::ExecutionTrace;
use crate::util::coerced_eq_trimmed;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Expected parameters for the n-th invocation of each step.
pub struct ParameterValidation<'a> {
    expected: &'a BTreeMap<String, Vec<Map<String, Value>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterReport {
    pub overall_pass: bool,
    pub steps: BTreeMap<String, StepParameterResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepParameterResult {
    pub passed: bool,
    pub details: Vec<CallCheck>,
}

/// Outcome for one expected invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallCheck {
    /// The step ran fewer times than there are expectations.
    Missing {
        call_index: usize,
        expected: Map<String, Value>,
    },
    Passed {
        call_index: usize,
    },
    Failed {
        call_index: usize,
        failures: Vec<ParamFailure>,
    },
}

impl CallCheck {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamFailure {
    pub param: String,
    pub expected: Value,
    /// `None` when the invocation did not carry the parameter at all.
    #[serde(serialize_with = "actual_or_missing")]
    pub actual: Option<Value>,
}

fn actual_or_missing<S: Serializer>(actual: &Option<Value>, serializer: S) -> Result<S::Ok, S::Error> {
    match actual {
        Some(value) => value.serialize(serializer),
        None => serializer.serialize_str("missing"),
    }
}

impl<'a> ParameterValidation<'a> {
    pub fn new(expected: &'a BTreeMap<String, Vec<Map<String, Value>>>) -> Self {
        Self { expected }
    }

    pub fn check(&self, trace: &ExecutionTrace) -> ParameterReport {
        let steps: BTreeMap<String, StepParameterResult> = self
            .expected
            .iter()
            .filter(|(_, calls)| !calls.is_empty())
            .map(|(step, calls)| (step.clone(), check_step(calls, trace, step)))
            .collect();
        ParameterReport {
            overall_pass: steps.values().all(|result| result.passed),
            steps,
        }
    }
}

fn check_step(expected_calls: &[Map<String, Value>], trace: &ExecutionTrace, step: &str) -> StepParameterResult {
    let actual_calls = trace.calls_for(step);
    let details: Vec<CallCheck> = expected_calls
        .iter()
        .enumerate()
        .map(|(call_index, expected)| match actual_calls.get(call_index) {
            None => CallCheck::Missing {
                call_index,
                expected: expected.clone(),
            },
            Some(actual) => {
                let failures = compare_params(expected, &actual.params);
                if failures.is_empty() {
                    CallCheck::Passed { call_index }
                } else {
                    CallCheck::Failed {
                        call_index,
                        failures,
                    }
                }
            }
        })
        .collect();
    StepParameterResult {
        passed: details.iter().all(CallCheck::passed),
        details,
    }
}

fn compare_params(expected: &Map<String, Value>, actual: &Map<String, Value>) -> Vec<ParamFailure> {
    let mut failures = Vec::new();
    for (param, expected_value) in expected {
        match actual.get(param) {
            None => failures.push(ParamFailure {
                param: param.clone(),
                expected: expected_value.clone(),
                actual: None,
            }),
            Some(actual_value) if !coerced_eq_trimmed(actual_value, expected_value) => {
                failures.push(ParamFailure {
                    param: param.clone(),
                    expected: expected_value.clone(),
                    actual: Some(actual_value.clone()),
                })
            }
            Some(_) => {}
        }
    }
    failures
}

impl VerificationStrategy for ParameterValidation<'_> {
    fn name(&self) -> &'static str {
        "parameter_validation"
    }

    fn verify(&self, trace: &ExecutionTrace) -> StrategyReport {
        StrategyReport::Parameters(self.check(trace))
    }
}
