//! Mock response resolution for mocked steps.
//!
//! A step's table entry is either one response or an ordered candidate list.
//! Candidates carrying `task_parameters` are matched against the parameters
//! the step was actually invoked with; the first candidate doubles as the
//! fallback when nothing matches.
use crate::scenario::{MockEntry, Scenario};
use crate::util::{coerce_to_string, coerced_eq, env_token};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const MOCK_ENV_PREFIX: &str = "ANSIBLE_MOCK_";
const SUCCESS_KEY: &str = "success";
const DEFAULT_FAILURE_MESSAGE: &str = "Mock service failure";

/// Response chosen for one step invocation.
///
/// `payload` never carries the `success` or `task_parameters` keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MockResolution {
    pub success: bool,
    pub payload: Map<String, Value>,
}

impl MockResolution {
    /// Module-style result the step reports back to the runner.
    pub fn module_result(&self) -> Value {
        let mut result = self.payload.clone();
        if self.success {
            result
                .entry("changed".to_string())
                .or_insert(Value::Bool(false));
        } else {
            let msg = self
                .payload
                .get("error_message")
                .map(coerce_to_string)
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            result.insert("failed".to_string(), Value::Bool(true));
            result.insert("msg".to_string(), Value::String(msg));
        }
        Value::Object(result)
    }
}

pub fn mock_config_env_var(step: &str) -> String {
    format!("{MOCK_ENV_PREFIX}{}_CONFIG", env_token(step))
}

pub fn mock_enabled_env_var(step: &str) -> String {
    format!("{MOCK_ENV_PREFIX}{}_ENABLED", env_token(step))
}

/// Resolve the response for `step` from the scenario's mock table.
///
/// Steps without a table entry are assumed to succeed with an empty payload.
pub fn resolve(scenario: &Scenario, step: &str, params: &Map<String, Value>) -> Result<MockResolution> {
    match scenario.mock_entry(step) {
        Some(entry) => resolve_entry(entry, params).with_context(|| format!("resolve mock for {step}")),
        None => Ok(assume_success()),
    }
}

pub fn resolve_entry(entry: &MockEntry, params: &Map<String, Value>) -> Result<MockResolution> {
    let response = select_response(entry, params)?;
    Ok(finalize(response))
}

fn assume_success() -> MockResolution {
    let mut response = Map::new();
    response.insert(SUCCESS_KEY.to_string(), Value::Bool(true));
    finalize(response)
}

fn select_response(entry: &MockEntry, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let candidates = match entry {
        MockEntry::Single(response) => return Ok(response.clone()),
        MockEntry::Candidates(candidates) => candidates,
    };
    let default = candidates
        .first()
        .ok_or_else(|| anyhow!("mock entry declares zero candidate responses"))?;
    let matched = candidates.iter().find(|candidate| {
        candidate
            .task_parameters
            .as_ref()
            .is_some_and(|predicate| params_match(predicate, params))
    });
    match matched {
        Some(candidate) => {
            tracing::debug!(response = ?candidate.response, "matched mock response");
            Ok(candidate.response.clone())
        }
        None => {
            tracing::debug!(response = ?default.response, "no matching mock response, using default");
            Ok(default.response.clone())
        }
    }
}

/// Every predicate key must be present with an equal stringified value;
/// booleans match regardless of case.
pub fn params_match(predicate: &Map<String, Value>, params: &Map<String, Value>) -> bool {
    predicate.iter().all(|(key, expected)| {
        params
            .get(key)
            .is_some_and(|actual| coerced_eq(actual, expected))
    })
}

fn finalize(mut response: Map<String, Value>) -> MockResolution {
    let success = response
        .remove(SUCCESS_KEY)
        .map(|flag| truthy(&flag))
        .unwrap_or(true);
    MockResolution {
        success,
        payload: response,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Step-side view: the config file the staging area wired up for a step.
pub fn config_path_from_env(step: &str) -> Option<PathBuf> {
    std::env::var_os(mock_config_env_var(step)).map(PathBuf::from)
}

pub fn load_entry(path: &Path) -> Result<MockEntry> {
    let bytes = fs::read(path).with_context(|| format!("read mock config {}", path.display()))?;
    let entry: MockEntry =
        serde_json::from_slice(&bytes).with_context(|| format!("parse mock config {}", path.display()))?;
    Ok(entry)
}

/// Resolve a step invocation the way a mocked module does at run time.
///
/// Missing or unreadable configuration turns into a failed module result
/// rather than an error so the runner records it as a step failure.
pub fn module_result_for_step(step: &str, params: &Map<String, Value>) -> Value {
    let Some(path) = config_path_from_env(step) else {
        return failure_result(format!(
            "No mock config found, no mock config path found for {step}"
        ));
    };
    let resolution = load_entry(&path).and_then(|entry| resolve_entry(&entry, params));
    match resolution {
        Ok(resolution) => {
            if !resolution.success {
                tracing::warn!(step, "simulating failure for mocked step");
            }
            resolution.module_result()
        }
        Err(err) => failure_result(format!("No mock config found at {}: {err:#}", path.display())),
    }
}

fn failure_result(msg: String) -> Value {
    let mut result = Map::new();
    result.insert("changed".to_string(), Value::Bool(false));
    result.insert("failed".to_string(), Value::Bool(true));
    result.insert("msg".to_string(), Value::String(msg));
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::MockCandidate;
    use chrono::NaiveDate;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn scenario(text: &str) -> Scenario {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Scenario::from_yaml_str(text, now).unwrap()
    }

    const CANDIDATES: &str = r#"
name: uri
service_mocks:
  ansible.builtin.uri:
    - status: 200
    - task_parameters:
        url: https://a.invalid
        timeout: 30
      status: 404
    - task_parameters:
        url: https://a.invalid
      status: 500
"#;

    #[test]
    fn single_response_is_returned_verbatim() {
        let scenario = scenario("name: s\nservice_mocks:\n  step:\n    size: 3\n    path: /x\n");
        let resolved = resolve(&scenario, "step", &Map::new()).unwrap();
        assert!(resolved.success);
        assert_eq!(Value::Object(resolved.payload), json!({"size": 3, "path": "/x"}));
    }

    #[test]
    fn first_matching_candidate_wins_in_declaration_order() {
        let scenario = scenario(CANDIDATES);
        let params = map(json!({"url": "https://a.invalid", "timeout": "30"}));
        let resolved = resolve(&scenario, "ansible.builtin.uri", &params).unwrap();
        assert_eq!(resolved.payload["status"], 404);
        assert!(!resolved.payload.contains_key("task_parameters"));
    }

    #[test]
    fn partial_predicates_match_when_all_their_keys_agree() {
        let scenario = scenario(CANDIDATES);
        let params = map(json!({"url": "https://a.invalid", "timeout": 5}));
        let resolved = resolve(&scenario, "ansible.builtin.uri", &params).unwrap();
        assert_eq!(resolved.payload["status"], 500);
    }

    #[test]
    fn boolean_predicates_match_python_style_casing() {
        let scenario = scenario(
            "name: f\nservice_mocks:\n  step:\n    - size: 0\n    - task_parameters: {force: \"True\"}\n      size: 9\n",
        );
        let params = map(json!({"force": true}));
        let resolved = resolve(&scenario, "step", &params).unwrap();
        assert_eq!(resolved.payload["size"], 9);
        let params = map(json!({"force": false}));
        assert_eq!(resolve(&scenario, "step", &params).unwrap().payload["size"], 0);
    }

    #[test]
    fn falls_back_to_first_candidate() {
        let scenario = scenario(CANDIDATES);
        let params = map(json!({"url": "https://b.invalid"}));
        let resolved = resolve(&scenario, "ansible.builtin.uri", &params).unwrap();
        assert_eq!(Value::Object(resolved.payload), json!({"status": 200}));
    }

    #[test]
    fn missing_step_assumes_success() {
        let scenario = scenario("name: empty\n");
        let resolved = resolve(&scenario, "anything", &Map::new()).unwrap();
        assert!(resolved.success);
        assert!(resolved.payload.is_empty());
    }

    #[test]
    fn empty_candidate_list_fails_loudly() {
        let entry = MockEntry::Candidates(Vec::<MockCandidate>::new());
        assert!(resolve_entry(&entry, &Map::new()).is_err());
    }

    #[test]
    fn success_false_strips_key_and_surfaces_failure() {
        let scenario = scenario(
            "name: boom\nservice_mocks:\n  stepA:\n    success: false\n    error_message: boom\n",
        );
        let resolved = resolve(&scenario, "stepA", &Map::new()).unwrap();
        assert!(!resolved.success);
        assert_eq!(Value::Object(resolved.payload.clone()), json!({"error_message": "boom"}));
        let result = resolved.module_result();
        assert_eq!(result["failed"], true);
        assert_eq!(result["msg"], "boom");
    }

    #[test]
    fn resolution_is_deterministic_and_byte_stable() {
        let scenario = scenario(CANDIDATES);
        let params = map(json!({"url": "https://a.invalid", "timeout": 30}));
        let first = resolve(&scenario, "ansible.builtin.uri", &params).unwrap();
        let second = resolve(&scenario, "ansible.builtin.uri", &params).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn success_result_defaults_changed() {
        let resolution = MockResolution {
            success: true,
            payload: map(json!({"size": 1})),
        };
        assert_eq!(resolution.module_result(), json!({"size": 1, "changed": false}));
    }

    #[test]
    fn env_var_names_follow_step_token() {
        assert_eq!(
            mock_config_env_var("community.general.filesize"),
            "ANSIBLE_MOCK_COMMUNITY_GENERAL_FILESIZE_CONFIG"
        );
        assert_eq!(
            mock_enabled_env_var("community.general.filesize"),
            "ANSIBLE_MOCK_COMMUNITY_GENERAL_FILESIZE_ENABLED"
        );
    }

    #[test]
    fn load_entry_round_trips_staged_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step_mock_config.json");
        fs::write(&path, r#"[{"status": 1}, {"task_parameters": {"a": "b"}, "status": 2}]"#)
            .unwrap();
        let entry = load_entry(&path).unwrap();
        let resolved = resolve_entry(&entry, &map(json!({"a": "b"}))).unwrap();
        assert_eq!(resolved.payload["status"], 2);
    }
}
