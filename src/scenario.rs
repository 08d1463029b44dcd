//! Scenario model: canned step responses plus the assertions a run must satisfy.
//!
//! Scenario files are YAML documents. Date placeholders are resolved once at
//! load time; after that a scenario is treated as read-only for the run.
mod catalog;
mod macros;

pub use catalog::{DiscoveredScenario, ScenarioCatalog};
pub use macros::resolve_date_macros;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const SCENARIO_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

fn default_name() -> String {
    "Unnamed Scenario".to_string()
}

/// Top-level scenario document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    #[serde(default)]
    pub service_mocks: BTreeMap<String, MockEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifySpec>,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Mock table entry for one step.
///
/// A bare mapping is the single-response form; a list holds candidates
/// where the first one doubles as the fallback.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MockEntry {
    Candidates(Vec<MockCandidate>),
    Single(Map<String, Value>),
}

/// One candidate response, optionally guarded by a parameter predicate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MockCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_parameters: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub response: Map<String, Value>,
}

/// Assertion block (`verify:`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_calls: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_validation: Option<BTreeMap<String, Vec<Map<String, Value>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sequence: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_errors: Option<Vec<ExpectedError>>,
}

/// Expected error descriptor.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpectedError {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub expect_process_failure: bool,
}

impl Scenario {
    /// Load a scenario file, resolving date placeholders against the local clock.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read scenario {}", path.display()))?;
        let mut scenario = Self::from_yaml_str(&text, Local::now().naive_local())
            .with_context(|| format!("parse scenario {}", path.display()))?;
        scenario.source = Some(path.to_path_buf());
        tracing::debug!(name = %scenario.name, path = %path.display(), "scenario loaded");
        Ok(scenario)
    }

    /// Parse scenario text with `now` as the anchor for date placeholders.
    pub fn from_yaml_str(text: &str, now: NaiveDateTime) -> Result<Self> {
        let raw: Value = serde_yaml::from_str(text).context("parse scenario YAML")?;
        if raw.is_null() {
            return Err(anyhow!("scenario document is empty"));
        }
        if !raw.is_object() {
            return Err(anyhow!("scenario document must be a mapping"));
        }
        let resolved = resolve_date_macros(raw, now);
        let scenario: Scenario =
            serde_json::from_value(resolved).context("decode scenario fields")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios that could never be resolved at run time.
    pub fn validate(&self) -> Result<()> {
        for (step, entry) in &self.service_mocks {
            if step.trim().is_empty() {
                return Err(anyhow!("service_mocks keys must be non-empty step ids"));
            }
            if let MockEntry::Candidates(candidates) = entry {
                if candidates.is_empty() {
                    return Err(anyhow!(
                        "service_mocks.{step} declares an empty response list"
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn mock_entry(&self, step: &str) -> Option<&MockEntry> {
        self.service_mocks.get(step)
    }

    pub fn expected_errors(&self) -> &[ExpectedError] {
        self.verify
            .as_ref()
            .and_then(|verify| verify.expected_errors.as_deref())
            .unwrap_or(&[])
    }

    /// True when any expected error asks for the whole run to fail.
    pub fn expects_failure(&self) -> bool {
        self.expected_errors()
            .iter()
            .any(|error| error.expect_process_failure)
    }
}

pub(crate) fn has_scenario_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCENARIO_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn parses_single_and_candidate_mock_entries() {
        let text = r#"
name: disk check
description: filesize mock
playbook: check.yml
service_mocks:
  community.general.filesize:
    success: true
    size: 10
  ansible.builtin.uri:
    - status: 200
    - task_parameters:
        url: https://example.invalid/health
      status: 503
"#;
        let scenario = Scenario::from_yaml_str(text, fixed_now()).unwrap();
        assert_eq!(scenario.name, "disk check");
        assert_eq!(scenario.playbook.as_deref(), Some("check.yml"));
        assert!(matches!(
            scenario.mock_entry("community.general.filesize"),
            Some(MockEntry::Single(_))
        ));
        let Some(MockEntry::Candidates(candidates)) = scenario.mock_entry("ansible.builtin.uri")
        else {
            panic!("expected candidate list");
        };
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].task_parameters.is_none());
        assert_eq!(candidates[1].response["status"], 503);
    }

    #[test]
    fn date_macros_resolve_at_load() {
        let text = r#"
name: dated
service_mocks:
  step:
    expires: "${DATE:+3}"
    created: "${DATE:-1}"
    day: "${TODAY}"
"#;
        let scenario = Scenario::from_yaml_str(text, fixed_now()).unwrap();
        let Some(MockEntry::Single(response)) = scenario.mock_entry("step") else {
            panic!("expected single response");
        };
        assert_eq!(response["expires"], "2024-03-13 12:00:00");
        assert_eq!(response["created"], "2024-03-09 12:00:00");
        assert_eq!(response["day"], "2024-03-10");
    }

    #[test]
    fn expects_failure_follows_expected_errors() {
        let text = r#"
name: failing
verify:
  expected_errors:
    - message: boom
    - message: fatal
      task: deploy
      expect_process_failure: true
"#;
        let scenario = Scenario::from_yaml_str(text, fixed_now()).unwrap();
        assert!(scenario.expects_failure());
        assert_eq!(scenario.expected_errors().len(), 2);

        let plain = Scenario::from_yaml_str("name: plain\n", fixed_now()).unwrap();
        assert!(!plain.expects_failure());
        assert!(plain.verify.is_none());
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let text = "name: bad\nservice_mocks:\n  step: []\n";
        let err = Scenario::from_yaml_str(text, fixed_now()).unwrap_err();
        assert!(format!("{err:#}").contains("empty response list"));
    }

    #[test]
    fn unknown_verify_keys_are_rejected() {
        let text = "name: typo\nverify:\n  expected_call: {}\n";
        assert!(Scenario::from_yaml_str(text, fixed_now()).is_err());
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(Scenario::from_yaml_str("", fixed_now()).is_err());
    }

    #[test]
    fn load_records_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.yaml");
        fs::write(&path, "name: one\n").unwrap();
        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.source.as_deref(), Some(path.as_path()));
    }
}
