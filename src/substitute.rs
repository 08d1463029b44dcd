//! In-place module substitution with guaranteed restore.
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".bak";

/// Replacement of one module file, restored on release or drop.
#[derive(Debug)]
pub struct ModuleSwap {
    original: PathBuf,
    backup: PathBuf,
    restored: bool,
}

impl ModuleSwap {
    /// Back up `original` next to itself and copy `replacement` over it.
    pub fn acquire(original: &Path, replacement: &Path) -> Result<Self> {
        if !replacement.is_file() {
            return Err(anyhow!(
                "replacement module not found at {}",
                replacement.display()
            ));
        }
        let mut backup = original.as_os_str().to_os_string();
        backup.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(backup);
        fs::copy(original, &backup)
            .with_context(|| format!("back up {}", original.display()))?;
        let swap = Self {
            original: original.to_path_buf(),
            backup,
            restored: false,
        };
        // From here on a failed copy is undone by Drop.
        fs::copy(replacement, &swap.original)
            .with_context(|| format!("substitute {}", swap.original.display()))?;
        tracing::info!(
            original = %swap.original.display(),
            replacement = %replacement.display(),
            "module substituted"
        );
        Ok(swap)
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        if !self.backup.exists() {
            return Ok(());
        }
        fs::copy(&self.backup, &self.original)
            .with_context(|| format!("restore {}", self.original.display()))?;
        fs::remove_file(&self.backup)
            .with_context(|| format!("remove {}", self.backup.display()))?;
        tracing::info!(original = %self.original.display(), "module restored");
        Ok(())
    }
}

impl Drop for ModuleSwap {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::warn!("module restore failed: {err:#}");
        }
    }
}

/// Every substitution held for one run.
#[derive(Debug, Default)]
pub struct ModuleSwaps {
    swaps: Vec<ModuleSwap>,
}

impl ModuleSwaps {
    /// Substitute each `step -> replacement` whose original module can be found.
    ///
    /// Unresolvable or failing entries are logged and skipped.
    pub fn acquire_all(substitutions: &BTreeMap<String, PathBuf>, search_paths: &[PathBuf]) -> Self {
        let mut swaps = Vec::new();
        for (step, replacement) in substitutions {
            let Some(original) = find_module_path(step, search_paths) else {
                tracing::warn!(step, "could not find module to substitute");
                continue;
            };
            match ModuleSwap::acquire(&original, replacement) {
                Ok(swap) => swaps.push(swap),
                Err(err) => tracing::warn!(step, "module substitution skipped: {err:#}"),
            }
        }
        Self { swaps }
    }

    pub fn len(&self) -> usize {
        self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }

    /// Restore in reverse acquisition order; failures are logged.
    pub fn release(mut self) {
        while let Some(swap) = self.swaps.pop() {
            let original = swap.original().to_path_buf();
            if let Err(err) = swap.release() {
                tracing::warn!(original = %original.display(), "module restore failed: {err:#}");
            }
        }
    }
}

/// Locate the file implementing `step` under any of `search_paths`.
///
/// `ns.coll.mod` is looked up as a collection module (with or without an
/// `ansible_collections` level); any id also as `<p>/modules/<id as path>.py`.
pub fn find_module_path(step: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let parts: Vec<&str> = step.split('.').collect();
    for root in search_paths {
        let mut candidates = Vec::new();
        if parts.len() >= 3 {
            let module_file = format!("{}.py", parts[2..].join("/"));
            let rel = Path::new(parts[0])
                .join(parts[1])
                .join("plugins")
                .join("modules")
                .join(&module_file);
            candidates.push(root.join("ansible_collections").join(&rel));
            candidates.push(root.join(&rel));
        }
        candidates.push(root.join("modules").join(format!("{}.py", parts.join("/"))));
        if let Some(found) = candidates.into_iter().find(|path| path.is_file()) {
            tracing::debug!(step, path = %found.display(), "found module");
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn release_restores_original_and_removes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("svc.py");
        let replacement = dir.path().join("mock.py");
        write(&original, "real");
        write(&replacement, "mock");
        let swap = ModuleSwap::acquire(&original, &replacement).unwrap();
        assert_eq!(fs::read_to_string(&original).unwrap(), "mock");
        assert!(dir.path().join("svc.py.bak").is_file());
        swap.release().unwrap();
        assert_eq!(fs::read_to_string(&original).unwrap(), "real");
        assert!(!dir.path().join("svc.py.bak").exists());
    }

    #[test]
    fn unwinding_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("svc.py");
        let replacement = dir.path().join("mock.py");
        write(&original, "real");
        write(&replacement, "mock");
        let result = std::panic::catch_unwind(|| {
            let _swap = ModuleSwap::acquire(&original, &replacement).unwrap();
            panic!("runner blew up");
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&original).unwrap(), "real");
    }

    #[test]
    fn missing_replacement_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("svc.py");
        write(&original, "real");
        assert!(ModuleSwap::acquire(&original, &dir.path().join("nope.py")).is_err());
        assert_eq!(fs::read_to_string(&original).unwrap(), "real");
        assert!(!dir.path().join("svc.py.bak").exists());
    }

    #[test]
    fn finds_collection_and_plain_modules() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ansible_collections/community/general/plugins/modules/filesize.py");
        let flat = dir.path().join("acme/tools/plugins/modules/deploy.py");
        let builtin = dir.path().join("modules/ping.py");
        write(&nested, "");
        write(&flat, "");
        write(&builtin, "");
        let roots = vec![dir.path().join("missing"), dir.path().to_path_buf()];
        assert_eq!(find_module_path("community.general.filesize", &roots), Some(nested));
        assert_eq!(find_module_path("acme.tools.deploy", &roots), Some(flat));
        assert_eq!(find_module_path("ping", &roots), Some(builtin));
        assert_eq!(find_module_path("acme.tools.absent", &roots), None);
    }

    #[test]
    fn acquire_all_skips_unresolvable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("modules/ping.py");
        let replacement = dir.path().join("mock_ping.py");
        write(&original, "real");
        write(&replacement, "mock");
        let mut substitutions = BTreeMap::new();
        substitutions.insert("ping".to_string(), replacement);
        substitutions.insert("absent".to_string(), dir.path().join("mock_absent.py"));
        let swaps = ModuleSwaps::acquire_all(&substitutions, &[dir.path().to_path_buf()]);
        assert_eq!(swaps.len(), 1);
        assert_eq!(fs::read_to_string(&original).unwrap(), "mock");
        swaps.release();
        assert_eq!(fs::read_to_string(&original).unwrap(), "real");
    }
}
