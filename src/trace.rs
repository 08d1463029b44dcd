//! Execution trace: what the runner did, as reported by the trace writer.
//!
//! The trace is a single JSON document persisted under the staging root and
//! read back once for verification. Every field is optional on read so a
//! partially written trace still verifies (and fails) cleanly.
use crate::util::write_json_pretty;
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const TRACE_FILE_NAME: &str = "playbook_statistics.json";
const TRACE_NAME_MARKER: &str = "statistics";
const SKIPPED_SUFFIX: &str = "(skipped)";
const UNNAMED_TASK: &str = "unnamed_task";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExecutionTrace {
    pub playbook_name: String,
    pub timestamp: String,
    pub duration_seconds: f64,
    pub total_module_calls: u64,
    pub module_calls: BTreeMap<String, u64>,
    pub call_details: BTreeMap<String, Vec<CallRecord>>,
    pub call_sequence: Vec<String>,
    pub failed_modules: BTreeMap<String, u64>,
    pub total_failures: u64,
    pub skipped_modules: BTreeMap<String, u64>,
    pub total_skipped: u64,
    pub errors: Vec<ErrorRecord>,
    pub play_recap: PlayRecap,
}

/// One invocation of a step.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CallRecord {
    pub params: Map<String, Value>,
    pub result: Value,
    pub task: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ErrorRecord {
    pub module: String,
    pub task: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PlayRecap {
    pub hosts: BTreeMap<String, HostStats>,
    pub totals: RecapTotals,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostStats {
    pub ok: u64,
    pub changed: u64,
    pub unreachable: u64,
    pub failures: u64,
    pub skipped: u64,
    pub rescued: u64,
    pub ignored: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecapTotals {
    pub ok: u64,
    pub changed: u64,
    pub unreachable: u64,
    pub failed: u64,
    pub skipped: u64,
    pub rescued: u64,
    pub ignored: u64,
}

impl RecapTotals {
    fn from_hosts(hosts: &BTreeMap<String, HostStats>) -> Self {
        hosts.values().fold(Self::default(), |acc, host| Self {
            ok: acc.ok + host.ok,
            changed: acc.changed + host.changed,
            unreachable: acc.unreachable + host.unreachable,
            failed: acc.failed + host.failures,
            skipped: acc.skipped + host.skipped,
            rescued: acc.rescued + host.rescued,
            ignored: acc.ignored + host.ignored,
        })
    }
}

impl ExecutionTrace {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read trace {}", path.display()))?;
        let trace: ExecutionTrace = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse trace {}", path.display()))?;
        Ok(trace)
    }

    /// Failures across the host recap, or the step failure tally when no
    /// host recap was written.
    pub fn host_failure_count(&self) -> u64 {
        if self.play_recap.hosts.is_empty() {
            return self.total_failures;
        }
        self.play_recap.hosts.values().map(|host| host.failures).sum()
    }

    pub fn process_failed(&self) -> bool {
        self.host_failure_count() > 0
    }

    pub fn calls_for(&self, step: &str) -> &[CallRecord] {
        self.call_details
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn call_count(&self, step: &str) -> u64 {
        self.module_calls.get(step).copied().unwrap_or(0)
    }

    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(TRACE_FILE_NAME);
        write_json_pretty(&path, self)?;
        Ok(path)
    }
}

/// Incremental trace writer. `mock-step --record` drives it one call at a
/// time through [`append_call`].
#[derive(Debug)]
pub struct TraceRecorder {
    trace: ExecutionTrace,
    started: Instant,
}

impl TraceRecorder {
    pub fn new(playbook_name: &str) -> Self {
        Self {
            trace: ExecutionTrace {
                playbook_name: playbook_name.to_string(),
                ..ExecutionTrace::default()
            },
            started: Instant::now(),
        }
    }

    /// Continue a trace written by an earlier recorder; its duration keeps
    /// accumulating.
    pub fn resume(trace: ExecutionTrace) -> Self {
        Self {
            trace,
            started: Instant::now(),
        }
    }

    pub fn record_ok(&mut self, step: &str, task: Option<&str>, params: Map<String, Value>, result: Value) {
        self.track_call(step, task, params, result);
    }

    /// Records the call, tallies the failure and keeps the result `msg` as an error record.
    pub fn record_failed(
        &mut self,
        step: &str,
        task: Option<&str>,
        params: Map<String, Value>,
        result: Value,
    ) {
        let message = result
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.track_call(step, task, params, result);
        *self.trace.failed_modules.entry(step.to_string()).or_insert(0) += 1;
        self.trace.errors.push(ErrorRecord {
            module: step.to_string(),
            task: task.unwrap_or(UNNAMED_TASK).to_string(),
            message,
            timestamp: now_timestamp(),
        });
    }

    /// Skips are sequenced but never counted as calls.
    pub fn record_skipped(&mut self, step: &str) {
        *self.trace.skipped_modules.entry(step.to_string()).or_insert(0) += 1;
        self.trace.call_sequence.push(format!("{step}{SKIPPED_SUFFIX}"));
    }

    pub fn finish(mut self, hosts: BTreeMap<String, HostStats>) -> ExecutionTrace {
        let trace = &mut self.trace;
        trace.total_module_calls = trace.module_calls.values().sum();
        trace.total_failures = trace.failed_modules.values().sum();
        trace.total_skipped = trace.skipped_modules.values().sum();
        trace.play_recap.totals = RecapTotals::from_hosts(&hosts);
        trace.play_recap.hosts = hosts;
        trace.timestamp = Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        let elapsed = trace.duration_seconds + self.started.elapsed().as_secs_f64();
        trace.duration_seconds = (elapsed * 100.0).round() / 100.0;
        self.trace
    }

    fn track_call(&mut self, step: &str, task: Option<&str>, params: Map<String, Value>, result: Value) {
        *self.trace.module_calls.entry(step.to_string()).or_insert(0) += 1;
        self.trace.call_sequence.push(step.to_string());
        self.trace
            .call_details
            .entry(step.to_string())
            .or_default()
            .push(CallRecord {
                params,
                result,
                task: task.unwrap_or(UNNAMED_TASK).to_string(),
                timestamp: now_timestamp(),
            });
    }
}

fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// One step invocation as reported by a mocked step.
#[derive(Debug, Clone)]
pub struct StepCall<'a> {
    pub step: &'a str,
    pub task: Option<&'a str>,
    pub host: &'a str,
    pub params: Map<String, Value>,
    pub result: Value,
}

/// Append `call` to the trace in `dir`, starting a trace for `playbook` when
/// none exists yet.
///
/// The file is rewritten whole on every call, so concurrent writers to the
/// same directory lose updates.
pub fn append_call(dir: &Path, playbook: &str, call: StepCall<'_>) -> Result<PathBuf> {
    let path = dir.join(TRACE_FILE_NAME);
    let mut recorder = if path.is_file() {
        TraceRecorder::resume(ExecutionTrace::load(&path)?)
    } else {
        TraceRecorder::new(playbook)
    };
    let mut hosts = recorder.trace.play_recap.hosts.clone();
    let stats = hosts.entry(call.host.to_string()).or_default();
    if result_flag(&call.result, "skipped") {
        stats.skipped += 1;
        recorder.record_skipped(call.step);
    } else if result_flag(&call.result, "failed") {
        stats.failures += 1;
        recorder.record_failed(call.step, call.task, call.params, call.result);
    } else {
        stats.ok += 1;
        if result_flag(&call.result, "changed") {
            stats.changed += 1;
        }
        recorder.record_ok(call.step, call.task, call.params, call.result);
    }
    let trace = recorder.finish(hosts);
    tracing::debug!(
        step = call.step,
        path = %path.display(),
        calls = trace.total_module_calls,
        "step call recorded"
    );
    trace.write_to_dir(dir)
}

fn result_flag(result: &Value, key: &str) -> bool {
    result.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Locate the trace file in the first root that has one.
///
/// The canonical file name wins; otherwise the first `*statistics*.json`
/// in sorted order.
pub fn find_trace_file(roots: &[&Path]) -> Option<PathBuf> {
    roots.iter().find_map(|root| find_in_dir(root))
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    let canonical = dir.join(TRACE_FILE_NAME);
    if canonical.is_file() {
        return Some(canonical);
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && is_trace_name(path))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn is_trace_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(TRACE_NAME_MARKER) && name.ends_with(".json"))
}

/// Load the trace for a run; a missing trace yields an empty one.
pub fn load_trace(roots: &[&Path]) -> Result<(Option<PathBuf>, ExecutionTrace)> {
    match find_trace_file(roots) {
        Some(path) => {
            let trace = ExecutionTrace::load(&path)?;
            tracing::info!(
                path = %path.display(),
                calls = trace.total_module_calls,
                failures = trace.total_failures,
                "trace loaded"
            );
            Ok((Some(path), trace))
        }
        None => {
            tracing::warn!("no execution trace found, verifying against an empty trace");
            Ok((None, ExecutionTrace::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn recorder_tallies_calls_failures_and_skips() {
        let mut recorder = TraceRecorder::new("site");
        recorder.record_ok("a", Some("first"), params(json!({"x": 1})), json!({"changed": true}));
        recorder.record_skipped("b");
        recorder.record_failed("c", None, Map::new(), json!({"failed": true, "msg": "boom"}));
        recorder.record_ok("a", Some("again"), Map::new(), json!({}));
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "localhost".to_string(),
            HostStats {
                ok: 2,
                failures: 1,
                skipped: 1,
                ..HostStats::default()
            },
        );
        let trace = recorder.finish(hosts);

        assert_eq!(trace.call_sequence, vec!["a", "b(skipped)", "c", "a"]);
        assert_eq!(trace.call_count("a"), 2);
        assert_eq!(trace.call_count("b"), 0);
        assert_eq!(trace.total_module_calls, 3);
        assert_eq!(trace.total_failures, 1);
        assert_eq!(trace.total_skipped, 1);
        assert_eq!(trace.errors.len(), 1);
        assert_eq!(trace.errors[0].message, "boom");
        assert_eq!(trace.errors[0].task, "unnamed_task");
        assert_eq!(trace.calls_for("a")[0].params["x"], 1);
        assert_eq!(trace.play_recap.totals.failed, 1);
        assert_eq!(trace.play_recap.totals.ok, 2);
    }

    #[test]
    fn host_failures_prefer_recap_over_tally() {
        let mut trace = ExecutionTrace {
            total_failures: 3,
            ..ExecutionTrace::default()
        };
        assert_eq!(trace.host_failure_count(), 3);
        trace
            .play_recap
            .hosts
            .insert("h1".to_string(), HostStats::default());
        assert_eq!(trace.host_failure_count(), 0);
        assert!(!trace.process_failed());
    }

    #[test]
    fn partial_documents_deserialize_with_defaults() {
        let trace: ExecutionTrace = serde_json::from_value(json!({
            "module_calls": {"a": 1},
            "play_recap": {"hosts": {"h": {"failures": 2}}}
        }))
        .unwrap();
        assert_eq!(trace.call_count("a"), 1);
        assert!(trace.call_sequence.is_empty());
        assert_eq!(trace.host_failure_count(), 2);
    }

    #[test]
    fn write_then_find_prefers_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_statistics.json"), "{}").unwrap();
        let written = TraceRecorder::new("p")
            .finish(BTreeMap::new())
            .write_to_dir(dir.path())
            .unwrap();
        assert_eq!(find_trace_file(&[dir.path()]), Some(written));
    }

    #[test]
    fn find_falls_through_roots_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("notes.json"), "{}").unwrap();
        fs::write(second.path().join("run_statistics.json"), "{}").unwrap();
        let found = find_trace_file(&[first.path(), second.path()]).unwrap();
        assert!(found.ends_with("run_statistics.json"));
    }

    fn call<'a>(step: &'a str, task: Option<&'a str>, result: Value) -> StepCall<'a> {
        StepCall {
            step,
            task,
            host: "localhost",
            params: params(json!({"path": "/"})),
            result,
        }
    }

    #[test]
    fn appended_calls_accumulate_across_recorders() {
        let dir = tempfile::tempdir().unwrap();
        append_call(dir.path(), "site", call("check", Some("Check"), json!({"changed": true}))).unwrap();
        append_call(dir.path(), "ignored", call("cleanup", None, json!({"skipped": true}))).unwrap();
        let path = append_call(
            dir.path(),
            "ignored",
            call("check", Some("Check"), json!({"failed": true, "msg": "full"})),
        )
        .unwrap();

        let trace = ExecutionTrace::load(&path).unwrap();
        assert_eq!(trace.playbook_name, "site");
        assert_eq!(trace.call_sequence, vec!["check", "cleanup(skipped)", "check"]);
        assert_eq!(trace.call_count("check"), 2);
        assert_eq!(trace.total_failures, 1);
        assert_eq!(trace.errors[0].message, "full");
        assert_eq!(trace.errors[0].task, "Check");
        assert_eq!(trace.calls_for("check")[1].params["path"], "/");
        let host = trace.play_recap.hosts["localhost"];
        assert_eq!((host.ok, host.changed, host.failures, host.skipped), (1, 1, 1, 1));
        assert!(trace.process_failed());
    }

    #[test]
    fn appending_to_a_corrupt_trace_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TRACE_FILE_NAME), "{").unwrap();
        assert!(append_call(dir.path(), "site", call("check", None, json!({}))).is_err());
    }

    #[test]
    fn missing_trace_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (path, trace) = load_trace(&[dir.path()]).unwrap();
        assert!(path.is_none());
        assert_eq!(trace, ExecutionTrace::default());
    }
}
