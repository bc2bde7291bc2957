//! Google Drive backend implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use notesync_common::{Error, RemotePath, Result, Secret};

use super::auth::{AuthConfig, AuthManager, TokenManager, Tokens};
use super::client::{DriveClient, DriveFile};
use crate::provider::{BackendClient, RemoteEntry};

fn default_root() -> String {
    "root".to_string()
}

/// Google Drive backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GDriveConfig {
    /// Drive folder id that remote paths are relative to (`root` for My Drive).
    #[serde(rename = "endpoint", alias = "folder_id", default = "default_root")]
    pub folder_id: String,
    #[serde(rename = "secret", alias = "refresh_token", default)]
    pub refresh_token: Secret,
    /// Previously issued tokens, reused until the access token expires.
    #[serde(default)]
    pub tokens: Option<Tokens>,
    pub auth_config: AuthConfig,
}

/// Google Drive backend.
///
/// Drive addresses files by id, so remote paths are resolved one component
/// at a time and cached.
pub struct GDriveBackend {
    root_id: String,
    client: DriveClient,
    tokens: Arc<TokenManager>,
    path_cache: RwLock<HashMap<String, String>>,
}

impl GDriveBackend {
    pub fn new(config: GDriveConfig) -> Result<Self> {
        let root_id = if config.folder_id.trim().is_empty() {
            default_root()
        } else {
            config.folder_id.trim().to_string()
        };
        let tokens = config
            .tokens
            .unwrap_or_else(|| Tokens::from_refresh_token(config.refresh_token.clone()));
        let tokens = Arc::new(TokenManager::new(AuthManager::new(config.auth_config)?, tokens));
        let client = DriveClient::new(tokens.clone())?;

        let mut cache = HashMap::new();
        cache.insert("/".to_string(), root_id.clone());

        Ok(Self {
            root_id,
            client,
            tokens,
            path_cache: RwLock::new(cache),
        })
    }

    /// Current tokens, so the host can persist a refreshed access token.
    pub async fn tokens(&self) -> Tokens {
        self.tokens.tokens().await
    }

    async fn cached(&self, path: &RemotePath) -> Option<String> {
        self.path_cache.read().await.get(&path.to_string()).cloned()
    }

    async fn cache_path(&self, path: &RemotePath, id: &str) {
        self.path_cache
            .write()
            .await
            .insert(path.to_string(), id.to_string());
    }

    async fn invalidate(&self, path: &RemotePath) {
        let key = path.to_string();
        let prefix = format!("{}/", key);
        self.path_cache
            .write()
            .await
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
    }

    /// Resolve a path to a Drive id by walking from the root folder.
    async fn resolve(&self, path: &RemotePath) -> Result<String> {
        if let Some(id) = self.cached(path).await {
            return Ok(id);
        }

        let mut current = self.root_id.clone();
        for ancestor in path.ancestors_inclusive() {
            if let Some(id) = self.cached(&ancestor).await {
                current = id;
                continue;
            }
            let name = ancestor.name().unwrap_or_default();
            let file = self
                .client
                .find_file(name, &current)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{} not found", ancestor)))?;
            self.cache_path(&ancestor, &file.id).await;
            current = file.id;
        }
        Ok(current)
    }

    async fn resolve_parent(&self, path: &RemotePath) -> Result<(String, String)> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput("Root has no parent".to_string()))?;
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidInput("Path has no name component".to_string()))?
            .to_string();
        Ok((self.resolve(&parent).await?, name))
    }

    fn to_entry(file: DriveFile, path: RemotePath) -> RemoteEntry {
        if file.is_folder() {
            return RemoteEntry::directory(path);
        }
        let size = file.size_bytes();
        let marker = file.md5_checksum.clone().or_else(|| {
            file.modified_time
                .map(|m| format!("{}-{}", file.id, m.timestamp_millis()))
        });
        let entry = RemoteEntry::file(path, size, marker);
        match file.modified_time {
            Some(modified) => entry.with_modified(modified),
            None => entry,
        }
    }

    /// Run `op`, retrying once with a cold cache when a cached id went stale.
    async fn with_fresh_ids<T, F, Fut>(&self, path: &RemotePath, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match op().await {
            Err(Error::NotFound(_)) if self.cached(path).await.is_some() => {
                self.invalidate(path).await;
                op().await
            }
            other => other,
        }
    }
}

#[async_trait]
impl BackendClient for GDriveBackend {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let files = self
            .with_fresh_ids(dir, || async {
                let id = self.resolve(dir).await?;
                self.client.list_folder(&id).await
            })
            .await?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let Ok(child) = dir.join(&file.name) else {
                continue;
            };
            self.cache_path(&child, &file.id).await;
            entries.push(Self::to_entry(file, child));
        }
        Ok(entries)
    }

    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        self.with_fresh_ids(path, || async {
            let id = self.resolve(path).await?;
            self.client.download(&id).await
        })
        .await
    }

    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        let (parent_id, name) = self.resolve_parent(path).await?;
        let file = match self.client.find_file(&name, &parent_id).await? {
            Some(existing) => self.client.update_file(&existing.id, data).await?,
            None => self.client.upload_simple(&name, &parent_id, data).await?,
        };
        self.cache_path(path, &file.id).await;
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        self.with_fresh_ids(path, || async {
            let id = self.resolve(path).await?;
            self.client.delete(&id).await
        })
        .await?;
        self.invalidate(path).await;
        Ok(())
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        let (parent_id, name) = self.resolve_parent(path).await?;
        if let Some(existing) = self.client.find_file(&name, &parent_id).await? {
            if existing.is_folder() {
                self.cache_path(path, &existing.id).await;
                return Ok(());
            }
            return Err(Error::AlreadyExists(format!(
                "File already exists at path: {}",
                path
            )));
        }
        let folder = self.client.create_folder(&name, &parent_id).await?;
        self.cache_path(path, &folder.id).await;
        Ok(())
    }
}

/// Create a Google Drive backend from registry configuration.
pub fn create_gdrive_backend(config: serde_json::Value) -> Result<Arc<dyn BackendClient>> {
    let config: GDriveConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid Google Drive config: {}", e)))?;
    Ok(Arc::new(GDriveBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config_json() -> serde_json::Value {
        serde_json::json!({
            "endpoint": "",
            "username": "",
            "secret": "refresh-me",
            "auth_config": { "client_id": "cid", "client_secret": "cs" }
        })
    }

    #[test]
    fn test_config_defaults_to_my_drive() {
        let config: GDriveConfig = serde_json::from_value(config_json()).unwrap();
        let backend = GDriveBackend::new(config).unwrap();
        assert_eq!(backend.root_id, "root");
        assert_eq!(backend.name(), "gdrive");
    }

    #[test]
    fn test_factory_rejects_missing_auth_config() {
        let result = create_gdrive_backend(serde_json::json!({ "secret": "x" }));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_to_entry_prefers_md5_marker() {
        let file = DriveFile {
            id: "id1".to_string(),
            name: "1.json".to_string(),
            mime_type: "application/json".to_string(),
            size: Some("10".to_string()),
            modified_time: Some(Utc::now()),
            md5_checksum: Some("md5".to_string()),
            trashed: false,
        };
        let entry = GDriveBackend::to_entry(file, RemotePath::parse("/n/1.json").unwrap());
        assert_eq!(entry.marker.as_deref(), Some("md5"));
        assert_eq!(entry.size, Some(10));
        assert!(entry.modified.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_drops_descendants() {
        let config: GDriveConfig = serde_json::from_value(config_json()).unwrap();
        let backend = GDriveBackend::new(config).unwrap();
        let dir = RemotePath::parse("/notesync").unwrap();
        let child = RemotePath::parse("/notesync/notes").unwrap();
        backend.cache_path(&dir, "d").await;
        backend.cache_path(&child, "c").await;

        backend.invalidate(&dir).await;
        assert!(backend.cached(&dir).await.is_none());
        assert!(backend.cached(&child).await.is_none());
        assert_eq!(backend.cached(&RemotePath::root()).await.as_deref(), Some("root"));
    }
}
