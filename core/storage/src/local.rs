//! Local folder backend.
//!
//! Treats a directory on this machine (typically one kept in sync by another
//! tool, or a mounted network share) as the remote tree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::provider::{BackendClient, RemoteEntry};
use notesync_common::{Error, RemotePath, Result};

/// Local filesystem backend.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// - Permission denied or an invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    /// Root directory on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, path: &RemotePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn entry_for(path: RemotePath, fs_meta: &std::fs::Metadata) -> RemoteEntry {
        if fs_meta.is_dir() {
            return RemoteEntry::directory(path);
        }
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(Into::into);
        let marker = modified.map(|m| format!("{}-{}", m.timestamp_millis(), fs_meta.len()));
        let entry = RemoteEntry::file(path, Some(fs_meta.len()), marker);
        match modified {
            Some(m) => entry.with_modified(m),
            None => entry,
        }
    }
}

/// Map a filesystem error onto the common kinds, naming the remote path.
fn map_io(err: std::io::Error, path: &RemotePath) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound(format!("{} not found", path)),
        ErrorKind::AlreadyExists => Error::AlreadyExists(format!("{} already exists", path)),
        ErrorKind::PermissionDenied => Error::PermissionDenied(format!("{}: {}", path, err)),
        _ => Error::Io(err),
    }
}

#[async_trait]
impl BackendClient for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let fs_path = self.to_fs_path(dir);
        let mut entries = fs::read_dir(&fs_path).await.map_err(|e| map_io(e, dir))?;

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Skip partially written files from an interrupted write
            if name.ends_with(".part") {
                continue;
            }
            let Ok(child) = dir.join(&name) else {
                continue;
            };
            let fs_meta = entry.metadata().await?;
            results.push(Self::entry_for(child, &fs_meta));
        }
        Ok(results)
    }

    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);
        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("{} is a directory", path)));
        }
        fs::read(&fs_path).await.map_err(|e| map_io(e, path))
    }

    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(path);
        match fs_path.parent() {
            Some(parent) if !parent.is_dir() => {
                return Err(Error::NotFound(format!(
                    "Parent directory not found for {}",
                    path
                )));
            }
            _ => {}
        }

        // Write to a sibling then rename so readers never see a torn file
        let mut tmp = fs_path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &data).await.map_err(|e| map_io(e, path))?;
        fs::rename(&tmp, &fs_path).await.map_err(|e| map_io(e, path))?;
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let fs_path = self.to_fs_path(path);
        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "{} is a directory",
                path
            )));
        }
        fs::remove_file(&fs_path).await.map_err(|e| map_io(e, path))
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        let fs_path = self.to_fs_path(path);
        if fs_path.is_dir() {
            return Ok(());
        }
        match fs::create_dir(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && fs_path.is_dir() => Ok(()),
            Err(e) => Err(map_io(e, path)),
        }
    }
}
