//! Scenario run orchestration.
//!
//! One run is a single stage, execute, verify, cleanup cycle. Input problems
//! and execution errors become failed reports; only the verdict decides
//! success.
mod exec;

pub use exec::{CommandExecutor, ExecutionOutcome, ExecutionRequest, PlaybookExecutor};

use crate::config::HarnessConfig;
use crate::scenario::Scenario;
use crate::staging::{StagingArea, TeardownReport};
use crate::substitute::ModuleSwaps;
use crate::trace::{load_trace, ExecutionTrace};
use crate::util::resolve_existing;
use crate::verify::{verify_trace, VerificationReport};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A run named the way a user types it: paths and a scenario name.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub playbook: PathBuf,
    pub scenario: String,
    pub inventory: Option<PathBuf>,
    pub extra_vars: Map<String, Value>,
    pub keep_artifacts: bool,
}

/// Resolved inputs for running an already loaded scenario.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub playbook: PathBuf,
    pub inventory: Option<PathBuf>,
    pub extra_vars: Map<String, Value>,
    pub keep_artifacts: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDetails {
    pub success: bool,
    pub playbook_success: bool,
    pub expected_failure: bool,
    pub verification_passed: bool,
    pub returncode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
    /// Staging root; only reported when it was kept.
    pub mock_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mock_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunDetails {
    fn failure(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub details: RunDetails,
}

impl RunReport {
    fn from_details(details: RunDetails) -> Self {
        Self {
            success: details.success,
            details,
        }
    }

    fn input_error(error: String) -> Self {
        tracing::error!("{error}");
        Self::from_details(RunDetails::failure(error))
    }
}

/// Expected-failure XOR run success, gated on verification.
pub fn combine_verdict(expected_failure: bool, playbook_success: bool, verification_passed: bool) -> bool {
    expected_failure != playbook_success && verification_passed
}

pub struct Harness {
    config: HarnessConfig,
    executor: Box<dyn PlaybookExecutor>,
    /// Searched for a trace after the staging root.
    trace_fallback: Option<PathBuf>,
}

impl Harness {
    pub fn new(config: HarnessConfig, executor: Box<dyn PlaybookExecutor>) -> Self {
        Self {
            config,
            executor,
            trace_fallback: env::current_dir().ok(),
        }
    }

    pub fn with_command_executor(config: HarnessConfig) -> Self {
        let executor = CommandExecutor::new(config.runner.clone());
        Self::new(config, Box::new(executor))
    }

    /// Resolve the playbook, inventory and scenario, then run.
    pub fn run_named(&self, request: &RunRequest) -> RunReport {
        let config_dir = self.config.config_dir.as_path();
        let Some(playbook) = resolve_existing(&request.playbook, Some(config_dir)) else {
            return RunReport::input_error(format!(
                "Playbook not found: {}",
                request.playbook.display()
            ));
        };
        let scenario = match self.config.catalog().load(&request.scenario) {
            Ok(scenario) => scenario,
            Err(err) => return RunReport::input_error(format!("{err:#}")),
        };
        let inventory = request
            .inventory
            .as_ref()
            .map(|raw| resolve_existing(raw, Some(config_dir)).unwrap_or_else(|| raw.clone()));
        let inputs = RunInputs {
            playbook,
            inventory,
            extra_vars: request.extra_vars.clone(),
            keep_artifacts: request.keep_artifacts,
        };
        self.run_scenario(&scenario, &inputs)
    }

    pub fn run_scenario(&self, scenario: &Scenario, inputs: &RunInputs) -> RunReport {
        let started = Instant::now();
        if !inputs.playbook.exists() {
            return RunReport::input_error(format!(
                "Playbook not found: {}",
                inputs.playbook.display()
            ));
        }
        tracing::info!(
            scenario = %scenario.name,
            description = %scenario.description,
            playbook = %inputs.playbook.display(),
            "starting run"
        );
        let run_id = run_id(scenario);
        let mut staging = match StagingArea::stage(
            &run_id,
            &self.config.staging_inputs(),
            &scenario.service_mocks,
        ) {
            Ok(staging) => staging,
            Err(err) => {
                let mut details = RunDetails::failure(format!("{err:#}"));
                details.scenario = Some(scenario.name.clone());
                return RunReport::from_details(details);
            }
        };
        let mut search_paths = vec![staging.collections_dir().to_path_buf()];
        search_paths.extend(self.config.module_search_paths.iter().cloned());
        let swaps = ModuleSwaps::acquire_all(&self.config.substitutions, &search_paths);
        if !swaps.is_empty() {
            tracing::info!(count = swaps.len(), "module substitutions active");
        }

        let result = self.execute_and_verify(scenario, inputs, &staging);

        swaps.release();
        let mock_files: Vec<PathBuf> = staging.mock_configs().values().cloned().collect();
        let collections_dir = staging.collections_dir().to_path_buf();
        let artifacts_dir = staging.artifacts_dir().to_path_buf();
        let teardown = staging.teardown(inputs.keep_artifacts);

        let mut details = match result {
            Ok(details) => details,
            Err(err) => {
                tracing::error!("run failed: {err:#}");
                RunDetails::failure(format!("{err:#}"))
            }
        };
        details.scenario = Some(scenario.name.clone());
        details.playbook = Some(inputs.playbook.clone());
        details.artifacts_dir = Some(artifacts_dir);
        apply_teardown(&mut details, &teardown, collections_dir, mock_files);

        let elapsed_ms = started.elapsed().as_millis();
        tracing::info!(
            elapsed_ms,
            success = details.success,
            playbook_success = details.playbook_success,
            expected_failure = details.expected_failure,
            verification_passed = details.verification_passed,
            "run finished"
        );
        RunReport::from_details(details)
    }

    fn execute_and_verify(
        &self,
        scenario: &Scenario,
        inputs: &RunInputs,
        staging: &StagingArea,
    ) -> Result<RunDetails> {
        let request = ExecutionRequest {
            playbook: &inputs.playbook,
            inventory: inputs.inventory.as_deref(),
            extra_vars: &inputs.extra_vars,
            env: staging.env(),
        };
        let outcome = self
            .executor
            .execute(&request)
            .with_context(|| format!("run playbook {}", inputs.playbook.display()))?;
        let return_code = outcome.return_code;
        let playbook_success = outcome.succeeded();

        let mut roots: Vec<&Path> = vec![staging.root()];
        if let Some(fallback) = self.trace_fallback.as_deref() {
            roots.push(fallback);
        }
        let (trace_path, trace, error) = match load_trace(&roots) {
            Ok((path, trace)) => (path, trace, None),
            Err(err) => {
                tracing::warn!(return_code, "trace unreadable, verifying against an empty trace: {err:#}");
                (None, ExecutionTrace::default(), Some(format!("{err:#}")))
            }
        };
        let verification = verify_trace(scenario, &trace);
        let expected_failure = scenario.expects_failure();
        let verification_passed = verification.overall_pass;
        Ok(RunDetails {
            success: combine_verdict(expected_failure, playbook_success, verification_passed),
            playbook_success,
            expected_failure,
            verification_passed,
            returncode: Some(return_code),
            verification: Some(verification),
            error,
            trace_path,
            ..RunDetails::default()
        })
    }
}

fn apply_teardown(
    details: &mut RunDetails,
    teardown: &TeardownReport,
    collections_dir: PathBuf,
    mock_files: Vec<PathBuf>,
) {
    if !teardown.kept {
        return;
    }
    details.mock_dir = Some(teardown.root.clone());
    details.collections_dir = Some(collections_dir);
    details.mock_files = mock_files;
}

fn run_id(scenario: &Scenario) -> String {
    scenario
        .source
        .as_deref()
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| scenario.name.replace(char::is_whitespace, "_"))
}
