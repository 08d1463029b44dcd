//! Scenario lookup under a scenarios directory.
use super::{has_scenario_extension, Scenario, SCENARIO_EXTENSIONS};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Scenario file paired with the playbook it targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct DiscoveredScenario {
    pub scenario_path: PathBuf,
    pub playbook_path: PathBuf,
    pub id: String,
}

/// Locates scenarios and their playbooks.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    pub scenarios_dir: PathBuf,
    pub playbooks_dir: PathBuf,
}

impl ScenarioCatalog {
    pub fn new(scenarios_dir: PathBuf, playbooks_dir: PathBuf) -> Self {
        Self {
            scenarios_dir,
            playbooks_dir,
        }
    }

    /// Resolve a scenario name or path to a file on disk.
    pub fn find(&self, name: &str) -> Result<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        if let Ok(cwd) = env::current_dir() {
            let candidate = cwd.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        for ext in SCENARIO_EXTENSIONS {
            let candidate = self.scenarios_dir.join(format!("{name}.{ext}"));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        for path in collect_scenario_files(&self.scenarios_dir)? {
            let base = path.file_stem().and_then(|stem| stem.to_str());
            if base == Some(name) || self.scenario_id(&path).as_deref() == Some(name) {
                return Ok(path);
            }
        }
        Err(anyhow!(
            "scenario {name:?} not found in {}; available scenarios: {}",
            self.scenarios_dir.display(),
            self.list()?.join(", ")
        ))
    }

    /// Find and load a scenario.
    pub fn load(&self, name: &str) -> Result<Scenario> {
        let path = self.find(name)?;
        Scenario::load(&path)
    }

    /// Scenario ids (paths relative to the scenarios dir, without extension).
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = collect_scenario_files(&self.scenarios_dir)?
            .iter()
            .filter_map(|path| self.scenario_id(path))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Every scenario whose playbook exists, sorted by scenario path.
    ///
    /// Unreadable scenarios and missing playbooks are logged and skipped.
    pub fn discover(&self) -> Result<Vec<DiscoveredScenario>> {
        if !self.scenarios_dir.exists() {
            tracing::error!(path = %self.scenarios_dir.display(), "scenario path does not exist");
            return Ok(Vec::new());
        }
        if self.scenarios_dir.is_file() {
            return Ok(self
                .discover_file(&self.scenarios_dir, None)
                .into_iter()
                .collect());
        }
        let mut found: Vec<DiscoveredScenario> = collect_scenario_files(&self.scenarios_dir)?
            .iter()
            .filter_map(|path| self.discover_file(path, Some(&self.scenarios_dir)))
            .collect();
        found.sort();
        Ok(found)
    }

    fn discover_file(&self, path: &Path, rel_root: Option<&Path>) -> Option<DiscoveredScenario> {
        if !has_scenario_extension(path) {
            tracing::warn!(path = %path.display(), "scenario file is not YAML (.yaml, .yml)");
            return None;
        }
        let scenario = match Scenario::load(path) {
            Ok(scenario) => scenario,
            Err(err) => {
                tracing::error!(path = %path.display(), "skipping scenario: {err:#}");
                return None;
            }
        };
        let Some(playbook) = scenario.playbook.as_deref() else {
            tracing::warn!(path = %path.display(), "scenario is missing 'playbook' field");
            return None;
        };
        let playbook_path = if Path::new(playbook).is_absolute() {
            PathBuf::from(playbook)
        } else {
            self.playbooks_dir.join(playbook)
        };
        if !playbook_path.exists() {
            tracing::warn!(
                playbook = %playbook_path.display(),
                scenario = %path.display(),
                "playbook not found for scenario"
            );
            return None;
        }
        let rel = match rel_root.and_then(|root| path.strip_prefix(root).ok()) {
            Some(rel) => rel.display().to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        Some(DiscoveredScenario {
            scenario_path: path.to_path_buf(),
            playbook_path,
            id: format!("{playbook}--{rel}"),
        })
    }

    fn scenario_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.scenarios_dir).ok()?;
        let rel = rel.with_extension("");
        Some(rel.to_string_lossy().replace('\\', "/"))
    }
}

fn collect_scenario_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_scenario_files(&path)?);
        } else if path.is_file() && has_scenario_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
