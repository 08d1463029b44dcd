//! Shared test infrastructure for integration tests.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test fixture metadata loaded from fixture.json.
#[derive(Debug, Deserialize)]
pub struct FixtureConfig {
    /// Playbook path relative to the fixture root.
    pub playbook: String,
}

/// A fixture project copied into a scratch directory so runs can stage and
/// clean up without touching the checked-in tree.
pub struct TestFixture {
    pub project: TempDir,
    pub config: FixtureConfig,
}

/// Exit code, stdout and stderr of one playtest invocation.
#[derive(Debug)]
pub struct TestResult {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl TestResult {
    fn from_output(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|err| panic!("stdout is not JSON ({err}): {}", self.stdout))
    }
}

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn copy_dir(src: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl TestFixture {
    /// Load a fixture by name from tests/fixtures/{name}/.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        let fixture_dir = manifest_dir().join("tests/fixtures").join(name);
        let config_path = fixture_dir.join("fixture.json");
        let config: FixtureConfig =
            serde_json::from_str(&fs::read_to_string(&config_path).map_err(|e| {
                anyhow::anyhow!("Failed to read {}: {}", config_path.display(), e)
            })?)?;
        let project = TempDir::new()?;
        copy_dir(&fixture_dir, project.path())?;
        Ok(Self { project, config })
    }

    pub fn root(&self) -> &Path {
        self.project.path()
    }

    pub fn playbook(&self) -> PathBuf {
        self.root().join(&self.config.playbook)
    }

    /// Runner command that replays `trace` and exits with `rc`.
    pub fn fake_runner(&self, trace: &str, rc: i32) -> String {
        let script = manifest_dir().join("tests/fake-runner.sh");
        let trace = self.root().join("traces").join(trace);
        shell_words::join([
            "sh".to_string(),
            script.display().to_string(),
            trace.display().to_string(),
            rc.to_string(),
        ])
    }

    /// Runner command that drives the playtest binary's `mock-step --record`
    /// for each task instead of replaying a trace.
    pub fn step_runner(&self) -> String {
        let script = manifest_dir().join("tests/fake-step-runner.sh");
        shell_words::join([
            "sh".to_string(),
            script.display().to_string(),
            env!("CARGO_BIN_EXE_playtest").to_string(),
        ])
    }

    /// Staging directories left under the fixture's temp root.
    pub fn staging_leftovers(&self) -> usize {
        fs::read_dir(self.root().join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_playtest"));
        cmd.current_dir(self.root())
            .env_remove("PLAYTEST_RUNNER")
            .env_remove("ANSIBLE_PLAYTEST_CONFIG_DIR")
            .env("RUST_LOG", "warn");
        cmd
    }

    /// `playtest run` against the fixture playbook with a fake runner.
    pub fn run(&self, scenario: &str, trace: &str, rc: i32, extra: &[&str]) -> TestResult {
        self.run_with(scenario, &self.fake_runner(trace, rc), extra)
    }

    /// `playtest run` against the fixture playbook with any runner command.
    pub fn run_with(&self, scenario: &str, runner: &str, extra: &[&str]) -> TestResult {
        let output = self
            .command()
            .arg("run")
            .arg(self.playbook())
            .args(["--scenario", scenario])
            .arg("--config-dir")
            .arg(self.root())
            .args(["--runner", runner])
            .args(extra)
            .output()
            .expect("spawn playtest");
        TestResult::from_output(output)
    }

    /// Any other subcommand, with the fixture as the config dir.
    pub fn invoke(&self, args: &[&str]) -> TestResult {
        let output = self
            .command()
            .args(args)
            .arg("--config-dir")
            .arg(self.root())
            .output()
            .expect("spawn playtest");
        TestResult::from_output(output)
    }
}
