use super::{StrategyReport, VerificationStrategy};
use crate::trace::ExecutionTrace;
use serde::Serialize;

/// Expected steps must appear in order; other steps may interleave.
pub struct CallSequenceCheck<'a> {
    expected: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub overall_pass: bool,
    pub expected_sequence: Vec<String>,
    pub actual_sequence: Vec<String>,
    pub errors: Vec<String>,
}

impl<'a> CallSequenceCheck<'a> {
    pub fn new(expected: &'a [String]) -> Self {
        Self { expected }
    }

    pub fn check(&self, trace: &ExecutionTrace) -> SequenceReport {
        let actual = &trace.call_sequence;
        let mut errors = Vec::new();
        let mut next = 0usize;
        let mut last_found: i64 = -1;
        for step in self.expected {
            match actual[next..].iter().position(|called| called == step) {
                Some(offset) => {
                    let index = next + offset;
                    last_found = index as i64;
                    next = index + 1;
                }
                None => errors.push(format!(
                    "Missing expected step: {step} - should appear after position {last_found}"
                )),
            }
        }
        SequenceReport {
            overall_pass: errors.is_empty(),
            expected_sequence: self.expected.to_vec(),
            actual_sequence: actual.clone(),
            errors,
        }
    }
}

impl VerificationStrategy for CallSequenceCheck<'_> {
    fn name(&self) -> &'static str {
        "call_sequence"
    }

    fn verify(&self, trace: &ExecutionTrace) -> StrategyReport {
        StrategyReport::Sequence(self.check(trace))
    }
}
