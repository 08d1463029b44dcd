use super::{StrategyReport, VerificationStrategy};
use crate::scenario::ExpectedError;
use crate::trace::{ErrorRecord, ExecutionTrace};
use serde::Serialize;

/// Expected errors, plus agreement between expected and observed process failure.
pub struct ErrorVerification<'a> {
    expected: &'a [ExpectedError],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub overall_pass: bool,
    pub error_checks: Vec<ErrorCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_failure: Option<ProcessFailureCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCheck {
    pub expected_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_task: Option<String>,
    pub found: bool,
    /// Only populated when the expected error was not found.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actual_errors: Vec<ActualError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActualError {
    pub module: String,
    pub task: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessFailureCheck {
    pub expected: bool,
    pub actual: bool,
    pub passed: bool,
}

impl<'a> ErrorVerification<'a> {
    pub fn new(expected: &'a [ExpectedError]) -> Self {
        Self { expected }
    }

    pub fn check(&self, trace: &ExecutionTrace) -> ErrorReport {
        if self.expected.is_empty() {
            return ErrorReport {
                overall_pass: true,
                error_checks: Vec::new(),
                process_failure: None,
            };
        }
        let error_checks: Vec<ErrorCheck> = self
            .expected
            .iter()
            .map(|expected| check_expected(expected, &trace.errors))
            .collect();
        let expected_failure = self
            .expected
            .iter()
            .any(|expected| expected.expect_process_failure);
        let actual_failure = trace.process_failed();
        let process_failure = ProcessFailureCheck {
            expected: expected_failure,
            actual: actual_failure,
            passed: expected_failure == actual_failure,
        };
        ErrorReport {
            overall_pass: error_checks.iter().all(|check| check.found) && process_failure.passed,
            error_checks,
            process_failure: Some(process_failure),
        }
    }
}

fn check_expected(expected: &ExpectedError, actual: &[ErrorRecord]) -> ErrorCheck {
    let expected_task = expected
        .task
        .as_deref()
        .filter(|task| !task.is_empty());
    let found = actual
        .iter()
        .any(|record| record_matches(record, &expected.message, expected_task));
    let actual_errors = if found {
        Vec::new()
    } else {
        actual
            .iter()
            .map(|record| ActualError {
                module: record.module.clone(),
                task: record.task.clone(),
                message: record.message.clone(),
            })
            .collect()
    };
    ErrorCheck {
        expected_message: expected.message.clone(),
        expected_task: expected_task.map(str::to_string),
        found,
        actual_errors,
    }
}

/// Substring match on the message; a task filter may hit the task label or step id.
fn record_matches(record: &ErrorRecord, message: &str, task: Option<&str>) -> bool {
    if !record.message.contains(message) {
        return false;
    }
    match task {
        Some(task) => record.task.contains(task) || record.module.contains(task),
        None => true,
    }
}

impl VerificationStrategy for ErrorVerification<'_> {
    fn name(&self) -> &'static str {
        "expected_errors"
    }

    fn verify(&self, trace: &ExecutionTrace) -> StrategyReport {
        StrategyReport::Errors(self.check(trace))
    }
}
