//! Verification of an execution trace against a scenario's `verify` block.
//!
//! Each assertion key maps to one strategy. Keys that are absent produce no
//! strategy and therefore pass vacuously; the combined verdict is the AND
//! of every strategy that ran.
mod call_count;
mod errors;
mod parameters;
mod sequence;

pub use call_count::{CallCountCheck, CallCountReport, CallCountResult};
pub use errors::{ActualError, ErrorCheck, ErrorReport, ErrorVerification, ProcessFailureCheck};
pub use parameters::{CallCheck, ParamFailure, ParameterReport, ParameterValidation, StepParameterResult};
pub use sequence::{CallSequenceCheck, SequenceReport};

use crate::scenario::{Scenario, VerifySpec};
use crate::trace::ExecutionTrace;
use serde::Serialize;

/// Result of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StrategyReport {
    CallCounts(CallCountReport),
    Parameters(ParameterReport),
    Sequence(SequenceReport),
    Errors(ErrorReport),
}

impl StrategyReport {
    pub fn passed(&self) -> bool {
        match self {
            Self::CallCounts(report) => report.overall_pass,
            Self::Parameters(report) => report.overall_pass,
            Self::Sequence(report) => report.overall_pass,
            Self::Errors(report) => report.overall_pass,
        }
    }
}

pub trait VerificationStrategy {
    fn name(&self) -> &'static str;
    fn verify(&self, trace: &ExecutionTrace) -> StrategyReport;
}

/// Strategies for the assertion keys present in `spec`, in a fixed order.
pub fn strategies_for(spec: &VerifySpec) -> Vec<Box<dyn VerificationStrategy + '_>> {
    let mut strategies: Vec<Box<dyn VerificationStrategy + '_>> = Vec::new();
    if let Some(expected) = &spec.expected_calls {
        strategies.push(Box::new(CallCountCheck::new(expected)));
    }
    if let Some(expected) = &spec.parameter_validation {
        strategies.push(Box::new(ParameterValidation::new(expected)));
    }
    if let Some(expected) = &spec.call_sequence {
        strategies.push(Box::new(CallSequenceCheck::new(expected)));
    }
    if let Some(expected) = &spec.expected_errors {
        strategies.push(Box::new(ErrorVerification::new(expected)));
    }
    strategies
}

/// Combined diagnostics of every strategy that ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub overall_pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_counts: Option<CallCountReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sequence: Option<SequenceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorReport>,
}

impl Default for VerificationReport {
    fn default() -> Self {
        Self {
            overall_pass: true,
            call_counts: None,
            parameters: None,
            call_sequence: None,
            errors: None,
        }
    }
}

impl VerificationReport {
    fn absorb(&mut self, report: StrategyReport) {
        self.overall_pass &= report.passed();
        match report {
            StrategyReport::CallCounts(report) => self.call_counts = Some(report),
            StrategyReport::Parameters(report) => self.parameters = Some(report),
            StrategyReport::Sequence(report) => self.call_sequence = Some(report),
            StrategyReport::Errors(report) => self.errors = Some(report),
        }
    }
}

pub fn verify_trace(scenario: &Scenario, trace: &ExecutionTrace) -> VerificationReport {
    let mut combined = VerificationReport::default();
    let Some(spec) = scenario.verify.as_ref() else {
        tracing::info!("no verify block, verification passes vacuously");
        return combined;
    };
    for strategy in strategies_for(spec) {
        let report = strategy.verify(trace);
        tracing::info!(strategy = strategy.name(), passed = report.passed(), "verification strategy finished");
        combined.absorb(report);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceRecorder;
    use chrono::NaiveDate;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;

    fn scenario(text: &str) -> Scenario {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Scenario::from_yaml_str(text, now).unwrap()
    }

    fn trace_of(steps: &[&str]) -> ExecutionTrace {
        let mut recorder = TraceRecorder::new("p");
        for step in steps {
            recorder.record_ok(step, None, Map::new(), json!({}));
        }
        recorder.finish(BTreeMap::new())
    }

    #[test]
    fn missing_verify_block_passes_vacuously() {
        let report = verify_trace(&scenario("name: bare\n"), &trace_of(&["a"]));
        assert!(report.overall_pass);
        assert!(report.call_counts.is_none());
        assert!(report.errors.is_none());
    }

    #[test]
    fn only_present_keys_produce_strategies() {
        let scenario = scenario("name: s\nverify:\n  call_sequence: [a]\n");
        let spec = scenario.verify.as_ref().unwrap();
        let names: Vec<&str> = strategies_for(spec).iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["call_sequence"]);
    }

    #[test]
    fn verdict_is_the_and_of_strategies() {
        let scenario = scenario(
            "name: s\nverify:\n  expected_calls:\n    a: 1\n  call_sequence: [a, b]\n",
        );
        let report = verify_trace(&scenario, &trace_of(&["a"]));
        assert!(!report.overall_pass);
        assert!(report.call_counts.as_ref().unwrap().overall_pass);
        assert!(!report.call_sequence.as_ref().unwrap().overall_pass);
    }

    #[test]
    fn diagnostics_are_kept_on_pass() {
        let scenario = scenario("name: s\nverify:\n  expected_calls:\n    a: 2\n");
        let report = verify_trace(&scenario, &trace_of(&["a", "a"]));
        assert!(report.overall_pass);
        let counts = report.call_counts.unwrap();
        assert_eq!(counts.steps["a"].actual, 2);
    }
}
