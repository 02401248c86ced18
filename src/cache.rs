//! In-process memoization of computed datasets.
//!
//! The dashboard re-runs its pipeline top to bottom on every render pass.
//! [`CacheGate`] keeps the expensive part (normalize + enrich) keyed by the
//! identity of the source file so repeated passes reuse one result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::error::{PipelineError, Result};

/// Identity of a data source: its path and last modification time, plus the
/// same for every file the computation also reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    modified: Option<SystemTime>,
    dependencies: Vec<(PathBuf, Option<SystemTime>)>,
}

impl CacheKey {
    /// Builds the key of the file at `path`. Touching the file changes the key.
    ///
    /// # Errors
    ///
    /// [`PipelineError::FileNotFound`] if the file does not exist.
    pub fn for_source(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| PipelineError::from_io(e, path))?;
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(CacheKey {
            path,
            modified: meta.modified().ok(),
            dependencies: Vec::new(),
        })
    }

    /// Adds a secondary input. A dependency that does not exist is keyed as
    /// absent; creating, touching or removing it changes the key.
    pub fn with_dependency(mut self, path: &Path) -> Self {
        let modified = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.dependencies.push((path, modified));
        self
    }

    /// A key that does not depend on any file.
    pub fn fixed(name: &str) -> Self {
        CacheKey {
            path: PathBuf::from(name),
            modified: None,
            dependencies: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Process-lifetime memo from [`CacheKey`] to a computed value.
#[derive(Debug)]
pub struct CacheGate<V> {
    entries: HashMap<CacheKey, Arc<V>>,
}

impl<V> Default for CacheGate<V> {
    fn default() -> Self {
        CacheGate {
            entries: HashMap::new(),
        }
    }
}

impl<V> CacheGate<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, running `compute` only on a miss.
    ///
    /// A miss also evicts entries for older versions of the same source path.
    /// Errors from `compute` are returned and nothing is stored.
    pub fn get_or_compute<F>(&mut self, key: &CacheKey, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(hit) = self.entries.get(key) {
            debug!(path = %key.path.display(), "Cache hit");
            return Ok(Arc::clone(hit));
        }

        debug!(path = %key.path.display(), "Cache miss, computing");
        let value = Arc::new(compute()?);

        let before = self.entries.len();
        self.entries.retain(|k, _| k.path != key.path);
        if self.entries.len() < before {
            debug!(path = %key.path.display(), "Evicted stale cache entry");
        }

        self.entries.insert(key.clone(), Arc::clone(&value));
        Ok(value)
    }

    /// Drops the entry for `key`. Returns whether one was present.
    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_compute_runs_once_per_key() {
        let mut gate: CacheGate<Vec<u32>> = CacheGate::new();
        let calls = Cell::new(0);
        let key = CacheKey::fixed("dataset");

        let first = gate
            .get_or_compute(&key, || {
                calls.set(calls.get() + 1);
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        let second = gate
            .get_or_compute(&key, || {
                calls.set(calls.get() + 1);
                Ok(vec![9])
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let mut gate: CacheGate<u32> = CacheGate::new();
        let key = CacheKey::fixed("dataset");

        gate.get_or_compute(&key, || Ok(1)).unwrap();
        assert!(gate.invalidate(&key));
        assert!(!gate.invalidate(&key));

        let value = gate.get_or_compute(&key, || Ok(2)).unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let mut gate: CacheGate<u32> = CacheGate::new();
        let key = CacheKey::fixed("dataset");

        let result = gate.get_or_compute(&key, || Err(PipelineError::EmptyInput));
        assert!(result.is_err());
        assert!(gate.is_empty());

        assert_eq!(*gate.get_or_compute(&key, || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_clear() {
        let mut gate: CacheGate<u32> = CacheGate::new();
        gate.get_or_compute(&CacheKey::fixed("a"), || Ok(1)).unwrap();
        gate.get_or_compute(&CacheKey::fixed("b"), || Ok(2)).unwrap();
        assert_eq!(gate.len(), 2);
        gate.clear();
        assert!(gate.is_empty());
    }

    #[test]
    fn test_new_version_of_source_evicts_old_entry() {
        let mut gate: CacheGate<u32> = CacheGate::new();
        let old = CacheKey {
            path: PathBuf::from("data/raw.csv"),
            modified: Some(SystemTime::UNIX_EPOCH),
            dependencies: Vec::new(),
        };
        let new = CacheKey {
            path: PathBuf::from("data/raw.csv"),
            modified: Some(SystemTime::now()),
            dependencies: Vec::new(),
        };

        gate.get_or_compute(&old, || Ok(1)).unwrap();
        let value = gate.get_or_compute(&new, || Ok(2)).unwrap();

        assert_eq!(*value, 2);
        assert_eq!(gate.len(), 1);
        assert!(!gate.contains(&old));
    }

    #[test]
    fn test_key_for_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,dep,arr").unwrap();
        file.flush().unwrap();

        let a = CacheKey::for_source(file.path()).unwrap();
        let b = CacheKey::for_source(file.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_when_source_is_modified() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,dep,arr").unwrap();
        file.flush().unwrap();

        let before = CacheKey::for_source(file.path()).unwrap();
        file.as_file()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        let after = CacheKey::for_source(file.path()).unwrap();

        assert_ne!(before, after);
        assert_eq!(before.path(), after.path());
    }

    #[test]
    fn test_key_changes_when_dependency_appears() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw.csv");
        let stations = dir.path().join("stations.csv");
        std::fs::write(&source, "period,dep,arr\n").unwrap();

        let without = CacheKey::for_source(&source)
            .unwrap()
            .with_dependency(&stations);
        std::fs::write(&stations, "station,lat,lon\n").unwrap();
        let with = CacheKey::for_source(&source)
            .unwrap()
            .with_dependency(&stations);

        assert_ne!(without, with);
    }

    #[test]
    fn test_key_for_missing_source() {
        assert!(matches!(
            CacheKey::for_source(Path::new("/no/such/file.csv")),
            Err(PipelineError::FileNotFound(_))
        ));
    }
}
