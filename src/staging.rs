//! Per-run staging area: an isolated collections tree, mock config files
//! and the environment bag handed to the runner.
use crate::mock::{mock_config_env_var, mock_enabled_env_var};
use crate::scenario::MockEntry;
use crate::util::write_json_pretty;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const COLLECTIONS_DIR_NAME: &str = "ansible_collections";
pub const ARTIFACTS_DIR_NAME: &str = "artifacts";
pub const COLLECTIONS_PATH_ENV: &str = "ANSIBLE_COLLECTIONS_PATH";
pub const TEST_TMP_DIR_ENV: &str = "ANSIBLE_TEST_TMP_DIR";
pub const CALLBACK_PLUGINS_ENV: &str = "ANSIBLE_CALLBACK_PLUGINS";
const MOCK_CONFIG_SUFFIX: &str = "_mock_config.json";

/// Sources a staging area is built from.
#[derive(Debug, Clone, Default)]
pub struct StagingInputs {
    pub temp_root: Option<PathBuf>,
    pub collections: Vec<PathBuf>,
    pub mock_overlays: Vec<PathBuf>,
    pub callback_plugins: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct StagingArea {
    dir: Option<TempDir>,
    root: PathBuf,
    collections_dir: PathBuf,
    artifacts_dir: PathBuf,
    mock_configs: BTreeMap<String, PathBuf>,
    env: BTreeMap<String, String>,
}

/// What teardown did with the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub root: PathBuf,
    pub kept: bool,
    pub removed: bool,
}

impl StagingArea {
    /// Build a fresh staging area for one run.
    ///
    /// Missing collection or overlay sources are logged and skipped; only
    /// failures to create the root or write mock configs are errors.
    pub fn stage(
        run_id: &str,
        inputs: &StagingInputs,
        mocks: &BTreeMap<String, MockEntry>,
    ) -> Result<Self> {
        let temp_root = match &inputs.temp_root {
            Some(root) => root.clone(),
            None => env::temp_dir(),
        };
        fs::create_dir_all(&temp_root)
            .with_context(|| format!("create {}", temp_root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("ansible_test_{}_", path_component(run_id)))
            .tempdir_in(&temp_root)
            .with_context(|| format!("create staging dir under {}", temp_root.display()))?;
        let root = dir.path().to_path_buf();
        let collections_dir = root.join(COLLECTIONS_DIR_NAME);
        let artifacts_dir = root.join(ARTIFACTS_DIR_NAME);
        for path in [&collections_dir, &artifacts_dir] {
            fs::create_dir_all(path).with_context(|| format!("create {}", path.display()))?;
        }
        tracing::info!(run_id, root = %root.display(), "staging area created");

        let mut area = Self {
            dir: Some(dir),
            root,
            collections_dir,
            artifacts_dir,
            mock_configs: BTreeMap::new(),
            env: BTreeMap::new(),
        };
        for source in &inputs.collections {
            area.copy_collections(source);
        }
        for overlay in &inputs.mock_overlays {
            area.overlay(overlay);
        }
        for (step, entry) in mocks {
            area.write_mock_config(step, entry)?;
        }
        area.env.insert(
            COLLECTIONS_PATH_ENV.to_string(),
            area.collections_dir.display().to_string(),
        );
        area.env
            .insert(TEST_TMP_DIR_ENV.to_string(), area.root.display().to_string());
        if !inputs.callback_plugins.is_empty() {
            let joined = env::join_paths(&inputs.callback_plugins)
                .context("join callback plugin paths")?;
            area.env.insert(
                CALLBACK_PLUGINS_ENV.to_string(),
                joined.to_string_lossy().to_string(),
            );
        }
        Ok(area)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collections_dir(&self) -> &Path {
        &self.collections_dir
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn mock_configs(&self) -> &BTreeMap<String, PathBuf> {
        &self.mock_configs
    }

    /// Variables to merge into the runner's environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Each top-level namespace replaces any earlier copy of the same name.
    fn copy_collections(&self, source: &Path) {
        if !source.is_dir() {
            tracing::warn!(path = %source.display(), "collections directory not found, skipping");
            return;
        }
        let entries = match fs::read_dir(source) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %source.display(), "read collections failed: {err}");
                return;
            }
        };
        let mut namespaces: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_dir())
            .collect();
        namespaces.sort();
        for namespace in namespaces {
            let Some(name) = namespace.file_name() else {
                continue;
            };
            let dest = self.collections_dir.join(name);
            let result = replace_tree(&namespace, &dest);
            match result {
                Ok(files) => tracing::info!(
                    namespace = %name.to_string_lossy(),
                    files,
                    "copied collection namespace"
                ),
                Err(err) => tracing::warn!(
                    namespace = %namespace.display(),
                    "copy collection namespace failed: {err:#}"
                ),
            }
        }
    }

    /// Overlay files win over whatever the base copy put there.
    fn overlay(&self, source: &Path) {
        if !source.is_dir() {
            tracing::warn!(path = %source.display(), "mock overlay directory not found, skipping");
            return;
        }
        match copy_tree(source, &self.collections_dir) {
            Ok(files) => tracing::info!(source = %source.display(), files, "overlaid mock modules"),
            Err(err) => tracing::warn!(source = %source.display(), "overlay failed: {err:#}"),
        }
    }

    fn write_mock_config(&mut self, step: &str, entry: &MockEntry) -> Result<()> {
        let file_name = format!("{}{MOCK_CONFIG_SUFFIX}", path_component(step));
        let path = self.root.join(file_name);
        write_json_pretty(&path, entry).with_context(|| format!("stage mock config for {step}"))?;
        self.env
            .insert(mock_config_env_var(step), path.display().to_string());
        self.env
            .insert(mock_enabled_env_var(step), "true".to_string());
        tracing::debug!(step, path = %path.display(), "mock config staged");
        self.mock_configs.insert(step.to_string(), path);
        Ok(())
    }

    /// Remove the staging root unless `keep` is set.
    ///
    /// Safe to call more than once; removal failures are logged, not returned.
    pub fn teardown(&mut self, keep: bool) -> TeardownReport {
        let Some(dir) = self.dir.take() else {
            return TeardownReport {
                root: self.root.clone(),
                kept: false,
                removed: false,
            };
        };
        if keep {
            let root = dir.into_path();
            tracing::info!(root = %root.display(), "keeping staging area");
            return TeardownReport {
                root,
                kept: true,
                removed: false,
            };
        }
        let removed = match dir.close() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(root = %self.root.display(), "remove staging area failed: {err}");
                false
            }
        };
        if removed {
            tracing::info!(root = %self.root.display(), "staging area removed");
        }
        TeardownReport {
            root: self.root.clone(),
            kept: false,
            removed,
        }
    }
}

fn path_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
        .collect()
}

fn replace_tree(source: &Path, dest: &Path) -> Result<usize> {
    if dest.exists() {
        fs::remove_dir_all(dest).with_context(|| format!("remove {}", dest.display()))?;
    }
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    copy_tree(source, dest)
}

/// Copy every file under `source` to the same relative path under `dest`.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<usize> {
    let files = collect_files_recursive(source)?;
    for file in &files {
        let rel = file.strip_prefix(source).context("strip source prefix")?;
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(file, &target)
            .with_context(|| format!("copy {} to {}", file.display(), target.display()))?;
    }
    Ok(files.len())
}

pub fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
