//! In-memory backend for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::provider::{BackendClient, RemoteEntry};
use notesync_common::{Error, RemotePath, Result};

/// In-memory storage entry.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, marker: String },
    Directory,
}

/// Kind of failure a [`MemoryBackend`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Generic storage failure (not network related).
    Io,
    /// The path does not exist.
    NotFound,
    /// DNS failure.
    UnknownHost,
    /// Connection refused.
    Connect,
    /// Credentials rejected.
    Auth,
}

impl FailureKind {
    fn to_error(self, path: &str) -> Error {
        match self {
            FailureKind::Io => Error::Storage(format!("Simulated I/O failure at {}", path)),
            FailureKind::NotFound => Error::NotFound(format!("Simulated missing path {}", path)),
            FailureKind::UnknownHost => Error::UnknownHost("memory.invalid".to_string()),
            FailureKind::Connect => Error::Connect("Simulated connection refused".to_string()),
            FailureKind::Auth => Error::Authentication("Simulated credential rejection".to_string()),
        }
    }
}

/// Which calls a path fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultScope {
    /// `list` and `read`.
    Reads,
    /// `write`, `delete` and `create_dir`.
    Writes,
    /// Every call.
    All,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: Option<FailureKind>,
    paths: Vec<(String, FaultScope, FailureKind)>,
}

/// In-memory backend.
///
/// Useful for testing and development. All data is stored in memory and
/// shared between clones. Faults can be injected per path prefix, and every
/// mutating call is counted so tests can assert that a pass wrote nothing.
#[derive(Clone)]
pub struct MemoryBackend {
    storage: Arc<RwLock<BTreeMap<String, Entry>>>,
    faults: Arc<RwLock<Faults>>,
    mutations: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Create a new empty memory backend containing only the root directory.
    pub fn new() -> Self {
        let mut storage = BTreeMap::new();
        storage.insert("/".to_string(), Entry::Directory);

        Self {
            storage: Arc::new(RwLock::new(storage)),
            faults: Arc::new(RwLock::new(Faults::default())),
            mutations: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn path_to_key(path: &RemotePath) -> String {
        path.to_string_path()
    }

    /// Make every call fail with `kind`, or restore reachability with `None`.
    pub fn set_unreachable(&self, kind: Option<FailureKind>) {
        self.faults.write().unwrap_or_else(|e| e.into_inner()).unreachable = kind;
    }

    /// Fail calls in `scope` whose path starts with `prefix`.
    pub fn fail_path(&self, prefix: impl Into<String>, scope: FaultScope, kind: FailureKind) {
        self.faults
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .paths
            .push((prefix.into(), scope, kind));
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.faults.write().unwrap_or_else(|e| e.into_inner()) = Faults::default();
    }

    /// Number of successful mutating calls so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Number of successful `list`/`read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Content of a file, bypassing faults and counters.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.storage.read().unwrap_or_else(|e| e.into_inner()).get(path) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether a file or directory exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.storage
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    /// Seed a file, creating missing parent directories, without counting it
    /// as a mutation.
    pub fn put_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = RemotePath::parse(path)?;
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = path.parent() {
            for dir in parent.ancestors_inclusive() {
                storage.entry(Self::path_to_key(&dir)).or_insert(Entry::Directory);
            }
        }
        storage.insert(
            Self::path_to_key(&path),
            Entry::File {
                data,
                marker: Uuid::new_v4().to_string(),
            },
        );
        Ok(())
    }

    /// All file paths currently stored, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        self.storage
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::File { .. }))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn check_faults(&self, path: &RemotePath, write: bool) -> Result<()> {
        let key = Self::path_to_key(path);
        let faults = self.faults.read().unwrap_or_else(|e| e.into_inner());
        if let Some(kind) = faults.unreachable {
            return Err(kind.to_error(&key));
        }
        for (prefix, scope, kind) in &faults.paths {
            let applies = match scope {
                FaultScope::All => true,
                FaultScope::Reads => !write,
                FaultScope::Writes => write,
            };
            if applies && key.starts_with(prefix.as_str()) {
                return Err(kind.to_error(&key));
            }
        }
        Ok(())
    }

    fn check_parent(storage: &BTreeMap<String, Entry>, path: &RemotePath) -> Result<()> {
        if let Some(parent) = path.parent() {
            match storage.get(&Self::path_to_key(&parent)) {
                Some(Entry::Directory) => {}
                Some(Entry::File { .. }) => {
                    return Err(Error::InvalidInput("Parent is a file".to_string()));
                }
                None => {
                    return Err(Error::NotFound(format!(
                        "Parent directory not found: {}",
                        parent
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        self.check_faults(dir, false)?;
        let key = Self::path_to_key(dir);
        let storage = self.storage.read().unwrap_or_else(|e| e.into_inner());

        match storage.get(&key) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidInput("Not a directory".to_string()));
            }
            None => {
                return Err(Error::NotFound(format!("Directory not found: {}", dir)));
            }
        }

        let prefix = if dir.is_root() {
            "/".to_string()
        } else {
            format!("{}/", key)
        };

        let mut results = Vec::new();
        for (entry_key, entry) in storage.iter() {
            if entry_key == &key {
                continue;
            }
            let Some(relative) = entry_key.strip_prefix(&prefix) else {
                continue;
            };
            // Only direct children
            if relative.contains('/') {
                continue;
            }
            let child = dir.join(relative)?;
            results.push(match entry {
                Entry::File { data, marker } => {
                    RemoteEntry::file(child, Some(data.len() as u64), Some(marker.clone()))
                }
                Entry::Directory => RemoteEntry::directory(child),
            });
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(results)
    }

    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        self.check_faults(path, false)?;
        let key = Self::path_to_key(path);
        let storage = self.storage.read().unwrap_or_else(|e| e.into_inner());

        match storage.get(&key) {
            Some(Entry::File { data, .. }) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(data.clone())
            }
            Some(Entry::Directory) => Err(Error::InvalidInput("Cannot read directory".to_string())),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        self.check_faults(path, true)?;
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());
        Self::check_parent(&storage, path)?;

        if let Some(Entry::Directory) = storage.get(&Self::path_to_key(path)) {
            return Err(Error::InvalidInput(format!("{} is a directory", path)));
        }

        storage.insert(
            Self::path_to_key(path),
            Entry::File {
                data,
                marker: format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4()),
            },
        );
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        self.check_faults(path, true)?;
        let key = Self::path_to_key(path);
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());

        match storage.get(&key) {
            Some(Entry::File { .. }) => {
                storage.remove(&key);
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(Entry::Directory) => {
                Err(Error::InvalidInput("Cannot delete a directory".to_string()))
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        self.check_faults(path, true)?;
        let key = Self::path_to_key(path);
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());
        Self::check_parent(&storage, path)?;

        match storage.get(&key) {
            Some(Entry::Directory) => Ok(()),
            Some(Entry::File { .. }) => Err(Error::AlreadyExists(format!(
                "File already exists at path: {}",
                path
            ))),
            None => {
                storage.insert(key, Entry::Directory);
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_read() {
        let backend = MemoryBackend::new();
        backend.write(&path("/test.json"), b"{}".to_vec()).await.unwrap();
        assert_eq!(backend.read(&path("/test.json")).await.unwrap(), b"{}".to_vec());
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let backend = MemoryBackend::new();
        let err = backend.write(&path("/missing/a.json"), vec![1]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_dir_all_and_list() {
        let backend = MemoryBackend::new();
        backend.create_dir_all(&path("/base/notes")).await.unwrap();
        backend.write(&path("/base/notes/1.json"), vec![1]).await.unwrap();
        backend.write(&path("/base/notes/2.json"), vec![2, 2]).await.unwrap();

        let mut names: Vec<String> = backend
            .list(&path("/base/notes"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["1.json", "2.json"]);

        let base = backend.list(&path("/base")).await.unwrap();
        assert_eq!(base.len(), 1);
        assert!(base[0].is_directory);
    }

    #[tokio::test]
    async fn test_create_existing_dir_is_not_a_mutation() {
        let backend = MemoryBackend::new();
        backend.create_dir(&path("/a")).await.unwrap();
        backend.create_dir(&path("/a")).await.unwrap();
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryBackend::new();
        backend.put_file("/x/y.json", vec![1]).unwrap();
        backend.delete(&path("/x/y.json")).await.unwrap();
        assert!(!backend.contains("/x/y.json"));
        assert!(backend.delete(&path("/x/y.json")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let backend = MemoryBackend::new();
        backend.put_file("/n/1.json", vec![1]).unwrap();
        backend.fail_path("/n/1", FaultScope::Writes, FailureKind::Io);

        assert!(backend.read(&path("/n/1.json")).await.is_ok());
        assert!(matches!(
            backend.write(&path("/n/1.json"), vec![2]).await,
            Err(Error::Storage(_))
        ));

        backend.set_unreachable(Some(FailureKind::Connect));
        assert!(backend.list(&path("/n")).await.unwrap_err().is_network());

        backend.clear_faults();
        backend.write(&path("/n/1.json"), vec![2]).await.unwrap();
        assert_eq!(backend.file("/n/1.json"), Some(vec![2]));
    }
}
