//! Harness configuration.
//!
//! Built-in defaults are layered under an optional JSON file, then the
//! environment, then command-line overrides. Relative paths in the file are
//! anchored to the config dir so a project can be run from anywhere.
use crate::scenario::ScenarioCatalog;
use crate::staging::StagingInputs;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_DIR_ENV: &str = "ANSIBLE_PLAYTEST_CONFIG_DIR";
pub const RUNNER_ENV: &str = "PLAYTEST_RUNNER";
const CONFIG_FILE_NAME: &str = "playtest.json";
const USER_CONFIG_REL: &str = "playtest/config.json";
const DEFAULT_RUNNER_PROGRAM: &str = "ansible-playbook";
const MAX_VERBOSITY: u8 = 5;

fn default_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

fn default_scenarios_dir() -> PathBuf {
    PathBuf::from("scenarios")
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("playbooks")
}

fn default_collections() -> Vec<PathBuf> {
    vec![PathBuf::from("ansible_collections")]
}

fn default_runner_program() -> String {
    DEFAULT_RUNNER_PROGRAM.to_string()
}

fn default_verbosity() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Directory relative paths are anchored to; never read from the file.
    #[serde(skip)]
    pub config_dir: PathBuf,
    #[serde(default = "default_scenarios_dir")]
    pub scenarios_dir: PathBuf,
    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,
    /// Real collection trees copied into each staging area.
    #[serde(default = "default_collections")]
    pub collections: Vec<PathBuf>,
    /// Mock collection trees overlaid after the base copy.
    #[serde(default)]
    pub mock_overlays: Vec<PathBuf>,
    #[serde(default)]
    pub callback_plugins: Vec<PathBuf>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
    /// Step id to replacement module file, swapped in for the run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub substitutions: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module_search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
            args: Vec::new(),
            verbosity: default_verbosity(),
        }
    }
}

impl RunnerConfig {
    /// Parse a shell-style command line (`program arg...`).
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = shell_words::split(command)
            .with_context(|| format!("parse runner command {command:?}"))?;
        if words.is_empty() {
            return Err(anyhow!("runner command must be non-empty"));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            verbosity: default_verbosity(),
        })
    }

    fn replace_command(&mut self, command: &str) -> Result<()> {
        let parsed = Self::from_command_line(command)?;
        self.program = parsed.program;
        self.args = parsed.args;
        Ok(())
    }
}

/// Values taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigEnv {
    pub config_dir: Option<PathBuf>,
    pub runner: Option<String>,
    pub user_config_dir: Option<PathBuf>,
}

impl ConfigEnv {
    pub fn from_process() -> Self {
        Self {
            config_dir: env::var_os(CONFIG_DIR_ENV).map(PathBuf::from),
            runner: env::var(RUNNER_ENV).ok().filter(|value| !value.trim().is_empty()),
            user_config_dir: dirs::config_dir(),
        }
    }
}

/// Command-line overrides; these win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub runner: Option<String>,
    pub verbosity: Option<u8>,
}

/// Defaults for a project rooted at `config_dir`.
pub fn default_config(config_dir: &Path) -> HarnessConfig {
    let mut config: HarnessConfig = HarnessConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        config_dir: config_dir.to_path_buf(),
        scenarios_dir: default_scenarios_dir(),
        playbooks_dir: default_playbooks_dir(),
        collections: default_collections(),
        mock_overlays: Vec::new(),
        callback_plugins: Vec::new(),
        runner: RunnerConfig::default(),
        temp_root: None,
        substitutions: BTreeMap::new(),
        module_search_paths: Vec::new(),
    };
    config.anchor_paths();
    config
}

pub fn read_config_file(path: &Path, config_dir: &Path) -> Result<HarnessConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: HarnessConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    config.config_dir = config_dir.to_path_buf();
    config.anchor_paths();
    Ok(config)
}

/// Resolve the effective config from defaults, file, environment and overrides.
pub fn load_config(overrides: &ConfigOverrides, env: &ConfigEnv) -> Result<HarnessConfig> {
    let config_dir = match overrides.config_dir.as_ref().or(env.config_dir.as_ref()) {
        Some(dir) => absolute(dir)?,
        None => env::current_dir().context("resolve current dir")?,
    };
    let mut config = match locate_config_file(overrides, env, &config_dir) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config file");
            read_config_file(&path, &config_dir)?
        }
        None => default_config(&config_dir),
    };
    if let Some(command) = env.runner.as_deref() {
        config
            .runner
            .replace_command(command)
            .with_context(|| format!("apply {RUNNER_ENV}"))?;
    }
    if let Some(command) = overrides.runner.as_deref() {
        config.runner.replace_command(command)?;
    }
    if let Some(verbosity) = overrides.verbosity {
        config.runner.verbosity = verbosity;
    }
    validate_config(&config)?;
    Ok(config)
}

fn locate_config_file(overrides: &ConfigOverrides, env: &ConfigEnv, config_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = &overrides.config_file {
        return Some(path.clone());
    }
    let project = config_dir.join(CONFIG_FILE_NAME);
    if project.is_file() {
        return Some(project);
    }
    env.user_config_dir
        .as_ref()
        .map(|dir| dir.join(USER_CONFIG_REL))
        .filter(|path| path.is_file())
}

pub fn validate_config(config: &HarnessConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.runner.program.trim().is_empty() {
        return Err(anyhow!("runner.program must be non-empty"));
    }
    if config.runner.verbosity > MAX_VERBOSITY {
        return Err(anyhow!(
            "runner.verbosity must be at most {MAX_VERBOSITY} (got {})",
            config.runner.verbosity
        ));
    }
    if config.substitutions.keys().any(|step| step.trim().is_empty()) {
        return Err(anyhow!("substitutions keys must be non-empty step ids"));
    }
    Ok(())
}

impl HarnessConfig {
    fn anchor_paths(&mut self) {
        let root = self.config_dir.clone();
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        };
        anchor(&mut self.scenarios_dir);
        anchor(&mut self.playbooks_dir);
        self.collections.iter_mut().for_each(anchor);
        self.mock_overlays.iter_mut().for_each(anchor);
        self.callback_plugins.iter_mut().for_each(anchor);
        self.substitutions.values_mut().for_each(anchor);
        self.module_search_paths.iter_mut().for_each(anchor);
        if let Some(temp_root) = self.temp_root.as_mut() {
            anchor(temp_root);
        }
    }

    pub fn catalog(&self) -> ScenarioCatalog {
        ScenarioCatalog::new(self.scenarios_dir.clone(), self.playbooks_dir.clone())
    }

    pub fn staging_inputs(&self) -> StagingInputs {
        StagingInputs {
            temp_root: self.temp_root.clone(),
            collections: self.collections.clone(),
            mock_overlays: self.mock_overlays.clone(),
            callback_plugins: self.callback_plugins.clone(),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("resolve current dir")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
