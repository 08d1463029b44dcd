//! Plain-text rendering of a run report.
use crate::runner::RunDetails;
use crate::util::truncate_string;
use crate::verify::{CallCheck, CallCountReport, ErrorReport, ParameterReport, SequenceReport};
use serde_json::Value;

const PASS: &str = "✓";
const FAIL: &str = "✗";
const MAX_PARAM_FAILURES: usize = 3;
const MAX_VALUE_BYTES: usize = 200;

fn mark(passed: bool) -> &'static str {
    if passed {
        PASS
    } else {
        FAIL
    }
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

fn show_value(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    truncate_string(&text, MAX_VALUE_BYTES)
}

pub fn render_run(details: &RunDetails) -> String {
    let mut out = String::new();
    if let Some(scenario) = &details.scenario {
        out.push_str(&format!("Scenario: {scenario}\n"));
    }
    if let Some(playbook) = &details.playbook {
        out.push_str(&format!("Playbook: {}\n", playbook.display()));
    }
    if let Some(error) = &details.error {
        out.push_str(&format!("{FAIL} Error: {error}\n"));
    }
    if let Some(verification) = &details.verification {
        out.push_str("\nVerification Results:\n");
        if let Some(report) = &verification.call_counts {
            render_call_counts(&mut out, report);
        }
        if let Some(report) = &verification.parameters {
            render_parameters(&mut out, report);
        }
        if let Some(report) = &verification.call_sequence {
            render_sequence(&mut out, report);
        }
        if let Some(report) = &verification.errors {
            render_errors(&mut out, report);
        }
    }
    out.push('\n');
    if let Some(code) = details.returncode {
        out.push_str(&format!(
            "Playbook execution: {} (rc={code})\n",
            if details.playbook_success { "SUCCESS" } else { "FAILED" }
        ));
    }
    out.push_str(&format!(
        "Expected failure: {}\n",
        if details.expected_failure { "YES" } else { "NO" }
    ));
    out.push_str(&format!(
        "Verification result: {}\n",
        if details.verification_passed { "PASS" } else { "FAIL" }
    ));
    if let Some(mock_dir) = &details.mock_dir {
        out.push_str("\nKeeping staged files for debugging:\n");
        out.push_str(&format!("  mock directory: {}\n", mock_dir.display()));
        if let Some(collections) = &details.collections_dir {
            out.push_str(&format!("  collections: {}\n", collections.display()));
        }
        for file in &details.mock_files {
            out.push_str(&format!("  mock config: {}\n", file.display()));
        }
    }
    out.push_str(&format!(
        "Overall test result: {}\n",
        if details.success { "PASS" } else { "FAIL" }
    ));
    out
}

fn render_call_counts(out: &mut String, report: &CallCountReport) {
    out.push_str(&format!("\nCall counts: {}\n", verdict(report.overall_pass)));
    for (step, result) in &report.steps {
        out.push_str(&format!(
            "  {} {step}: expected={}, actual={}",
            mark(result.passed),
            result.expected,
            result.actual
        ));
        let delta = result.delta();
        if delta > 0 {
            out.push_str(&format!(" (called {delta} more times than expected)"));
        } else if delta < 0 {
            out.push_str(&format!(" (called {} fewer times than expected)", -delta));
        }
        out.push('\n');
    }
}

fn render_parameters(out: &mut String, report: &ParameterReport) {
    out.push_str(&format!(
        "\nParameter validation: {}\n",
        verdict(report.overall_pass)
    ));
    for (step, result) in &report.steps {
        out.push_str(&format!(
            "  {} {step}: {}\n",
            mark(result.passed),
            if result.passed { "passed" } else { "failed" }
        ));
        for check in &result.details {
            match check {
                CallCheck::Passed { .. } => {}
                CallCheck::Missing { call_index, .. } => {
                    out.push_str(&format!("    Call {call_index} missing\n"));
                }
                CallCheck::Failed {
                    call_index,
                    failures,
                } => {
                    out.push_str(&format!("    Call {call_index} parameter errors:\n"));
                    for failure in failures.iter().take(MAX_PARAM_FAILURES) {
                        let actual = failure
                            .actual
                            .as_ref()
                            .map(show_value)
                            .unwrap_or_else(|| "missing".to_string());
                        out.push_str(&format!(
                            "      Parameter '{}': expected={}, got={actual}\n",
                            failure.param,
                            show_value(&failure.expected)
                        ));
                    }
                    if failures.len() > MAX_PARAM_FAILURES {
                        out.push_str(&format!(
                            "      ... and {} more parameter errors\n",
                            failures.len() - MAX_PARAM_FAILURES
                        ));
                    }
                }
            }
        }
    }
}

fn render_sequence(out: &mut String, report: &SequenceReport) {
    out.push_str(&format!(
        "\nCall sequence: {}\n",
        verdict(report.overall_pass)
    ));
    if report.overall_pass {
        return;
    }
    for error in &report.errors {
        out.push_str(&format!("  {FAIL} {error}\n"));
    }
    out.push_str("  Expected sequence:\n");
    for (idx, step) in report.expected_sequence.iter().enumerate() {
        out.push_str(&format!("    {idx}: {step}\n"));
    }
    out.push_str("  Actual sequence:\n");
    for (idx, step) in report.actual_sequence.iter().enumerate() {
        out.push_str(&format!("    {idx}: {step}\n"));
    }
}

fn render_errors(out: &mut String, report: &ErrorReport) {
    out.push_str(&format!(
        "\nError verification: {}\n",
        verdict(report.overall_pass)
    ));
    if let Some(process) = &report.process_failure {
        out.push_str(&format!(
            "  {} Process failure: Expected: {}, Actual: {}\n",
            mark(process.passed),
            process.expected,
            process.actual
        ));
    }
    for check in &report.error_checks {
        let task = check
            .expected_task
            .as_deref()
            .map(|task| format!(" in task '{task}'"))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {} Expected error{task}: {}\n",
            mark(check.found),
            check.expected_message
        ));
        if !check.found && !check.actual_errors.is_empty() {
            out.push_str("    Actual errors:\n");
            for actual in &check.actual_errors {
                out.push_str(&format!(
                    "      - Task '{}' ({}): {}\n",
                    actual.task, actual.module, actual.message
                ));
            }
        }
    }
}
