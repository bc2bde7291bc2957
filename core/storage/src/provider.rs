//! Backend client trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notesync_common::{Error, RemotePath, Result};

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full remote path of the entry.
    pub path: RemotePath,
    /// Name of the entry (last path component).
    pub name: String,
    /// Size in bytes (None for directories or when the backend does not say).
    pub size: Option<u64>,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Last modification time, when the backend reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Opaque modification marker (ETag, revision, checksum or mtime) used
    /// to notice changes without downloading content.
    pub marker: Option<String>,
}

impl RemoteEntry {
    /// Entry for a file with the given marker.
    pub fn file(path: RemotePath, size: Option<u64>, marker: Option<String>) -> Self {
        let name = path.name().unwrap_or("/").to_string();
        Self {
            path,
            name,
            size,
            is_directory: false,
            modified: None,
            marker,
        }
    }

    /// Entry for a directory.
    pub fn directory(path: RemotePath) -> Self {
        let name = path.name().unwrap_or("/").to_string();
        Self {
            path,
            name,
            size: None,
            is_directory: true,
            modified: None,
            marker: None,
        }
    }

    /// Attach a modification time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Capability interface every remote backend implements.
///
/// All operations are async. Implementations map their protocol failures
/// onto the common error kinds: `UnknownHost`/`Connect`/`Network` for
/// reachability, `Authentication`/`PermissionDenied` for credentials and
/// `NotFound` for missing paths.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Get the backend name (e.g., "webdav", "sftp", "gdrive").
    fn name(&self) -> &str;

    /// List the direct children of a directory.
    ///
    /// # Errors
    /// - `NotFound` if the directory does not exist
    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>>;

    /// Read the complete content of a file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>>;

    /// Create or overwrite a file.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Errors
    /// - `NotFound` if the parent directory does not exist
    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()>;

    /// Delete a file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    async fn delete(&self, path: &RemotePath) -> Result<()>;

    /// Create a directory. Succeeds if it already exists.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    async fn create_dir(&self, path: &RemotePath) -> Result<()>;

    /// Lightweight probe used by the connectivity tester.
    ///
    /// The default lists `dir`, which exercises DNS, connect and credentials
    /// without transferring file content.
    async fn test_connection(&self, dir: &RemotePath) -> Result<()> {
        self.list(dir).await.map(|_| ())
    }

    /// Create `path` and any missing ancestors.
    async fn create_dir_all(&self, path: &RemotePath) -> Result<()> {
        for ancestor in path.ancestors_inclusive() {
            match self.create_dir(&ancestor).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_entry_serialization() {
        let entry = RemoteEntry::file(
            RemotePath::parse("/notesync/notes/1.json").unwrap(),
            Some(1024),
            Some("abc123".to_string()),
        )
        .with_modified(Utc::now());

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: RemoteEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.name, "1.json");
        assert_eq!(deserialized.size, Some(1024));
        assert_eq!(deserialized.marker.as_deref(), Some("abc123"));
        assert!(!deserialized.is_directory);
    }

    #[test]
    fn test_directory_entry() {
        let entry = RemoteEntry::directory(RemotePath::parse("/notesync/images").unwrap());
        assert!(entry.is_directory);
        assert_eq!(entry.name, "images");
        assert!(entry.size.is_none());
    }
}
