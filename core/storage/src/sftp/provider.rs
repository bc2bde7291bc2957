//! SFTP backend implementation.

use async_trait::async_trait;
use russh_sftp::protocol::OpenFlags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use notesync_common::{Error, RemotePath, Result, Secret};

use super::session::{map_sftp_error, SftpConnection};
use crate::provider::{BackendClient, RemoteEntry};

const DEFAULT_PORT: u16 = 22;

/// SFTP backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    /// `host`, `host:port` or `sftp://host[:port][/path]`.
    pub endpoint: String,
    pub username: String,
    #[serde(default, rename = "secret", alias = "password")]
    pub password: Secret,
    /// Directory on the server that remote paths are relative to.
    #[serde(default)]
    pub root: Option<String>,
    /// Expected SHA-256 host key fingerprint (base64, optional `SHA256:` prefix).
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Parsed connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    root: String,
}

impl Target {
    fn parse(endpoint: &str, root: Option<&str>) -> Result<Self> {
        let endpoint = endpoint.trim();
        let (authority, url_path) = match endpoint.strip_prefix("sftp://") {
            Some(rest) => match rest.find('/') {
                Some(idx) => (&rest[..idx], Some(&rest[idx..])),
                None => (rest, None),
            },
            None => (endpoint, None),
        };
        if authority.is_empty() {
            return Err(Error::InvalidInput("SFTP endpoint has no host".to_string()));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidInput(format!("Invalid SFTP port '{}'", port)))?;
                (host.to_string(), port)
            }
            _ => (authority.to_string(), DEFAULT_PORT),
        };

        let root = root
            .or(url_path)
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or_default();

        Ok(Self { host, port, root })
    }

    /// Server-side path for a remote path.
    fn server_path(&self, path: &RemotePath) -> String {
        if path.is_root() {
            if self.root.is_empty() {
                "/".to_string()
            } else {
                self.root.clone()
            }
        } else {
            format!("{}{}", self.root, path.to_string_path())
        }
    }
}

/// SFTP backend.
pub struct SftpBackend {
    target: Target,
    username: String,
    password: Secret,
    fingerprint: Option<String>,
    conn: Mutex<Option<SftpConnection>>,
}

impl SftpBackend {
    /// Create a backend; no connection is made until the first call.
    pub fn new(config: SftpConfig) -> Result<Self> {
        let target = Target::parse(&config.endpoint, config.root.as_deref())?;
        Ok(Self {
            target,
            username: config.username,
            password: config.password,
            fingerprint: config.fingerprint,
            conn: Mutex::new(None),
        })
    }

    async fn connected<'a>(
        &self,
        slot: &'a mut Option<SftpConnection>,
    ) -> Result<&'a SftpConnection> {
        if slot.is_none() {
            let conn = SftpConnection::open(
                &self.target.host,
                self.target.port,
                &self.username,
                &self.password,
                self.fingerprint.clone(),
            )
            .await?;
            *slot = Some(conn);
        }
        slot.as_ref()
            .ok_or_else(|| Error::Connect("SFTP session unavailable".to_string()))
    }

    /// Drop a session that failed at the transport level so the next call
    /// reconnects.
    fn release_on_failure<T>(slot: &mut Option<SftpConnection>, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_network() {
                debug!(error = %e, "Dropping SFTP session");
                *slot = None;
            }
        }
    }

    async fn list_inner(conn: &SftpConnection, dir: &RemotePath, server_path: &str) -> Result<Vec<RemoteEntry>> {
        let read_dir = conn
            .sftp
            .read_dir(server_path)
            .await
            .map_err(|e| map_sftp_error(e, server_path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let Ok(child) = dir.join(&name) else {
                continue;
            };
            let metadata = entry.metadata();
            if metadata.is_dir() {
                entries.push(RemoteEntry::directory(child));
                continue;
            }
            let marker = metadata
                .mtime
                .map(|mtime| format!("{}-{}", mtime, metadata.size.unwrap_or(0)));
            let mut remote = RemoteEntry::file(child, metadata.size, marker);
            if let Some(modified) = metadata
                .mtime
                .and_then(|t| chrono::DateTime::from_timestamp(i64::from(t), 0))
            {
                remote = remote.with_modified(modified);
            }
            entries.push(remote);
        }
        Ok(entries)
    }

    async fn read_inner(conn: &SftpConnection, server_path: &str) -> Result<Vec<u8>> {
        let mut file = conn
            .sftp
            .open_with_flags(server_path, OpenFlags::READ)
            .await
            .map_err(|e| map_sftp_error(e, server_path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| Error::Network(format!("Failed to read {}: {}", server_path, e)))?;
        Ok(data)
    }

    async fn write_inner(conn: &SftpConnection, server_path: &str, data: &[u8]) -> Result<()> {
        let mut file = conn
            .sftp
            .open_with_flags(
                server_path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| map_sftp_error(e, server_path))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::Network(format!("Failed to write {}: {}", server_path, e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Network(format!("Failed to flush {}: {}", server_path, e)))?;
        file.shutdown()
            .await
            .map_err(|e| Error::Network(format!("Failed to close {}: {}", server_path, e)))?;
        Ok(())
    }

    async fn create_dir_inner(conn: &SftpConnection, server_path: &str) -> Result<()> {
        // SFTP reports an existing directory as a generic failure, so look first
        if let Ok(metadata) = conn.sftp.metadata(server_path).await {
            return if metadata.is_dir() {
                Ok(())
            } else {
                Err(Error::AlreadyExists(format!(
                    "File already exists at path: {}",
                    server_path
                )))
            };
        }
        conn.sftp
            .create_dir(server_path)
            .await
            .map_err(|e| map_sftp_error(e, server_path))
    }
}

#[async_trait]
impl BackendClient for SftpBackend {
    fn name(&self) -> &str {
        "sftp"
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let server_path = self.target.server_path(dir);
        let mut slot = self.conn.lock().await;
        let result = match self.connected(&mut slot).await {
            Ok(conn) => Self::list_inner(conn, dir, &server_path).await,
            Err(e) => Err(e),
        };
        Self::release_on_failure(&mut slot, &result);
        result
    }

    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        let server_path = self.target.server_path(path);
        let mut slot = self.conn.lock().await;
        let result = match self.connected(&mut slot).await {
            Ok(conn) => Self::read_inner(conn, &server_path).await,
            Err(e) => Err(e),
        };
        Self::release_on_failure(&mut slot, &result);
        result
    }

    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        let server_path = self.target.server_path(path);
        let mut slot = self.conn.lock().await;
        let result = match self.connected(&mut slot).await {
            Ok(conn) => Self::write_inner(conn, &server_path, &data).await,
            Err(e) => Err(e),
        };
        Self::release_on_failure(&mut slot, &result);
        result
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let server_path = self.target.server_path(path);
        let mut slot = self.conn.lock().await;
        let result = match self.connected(&mut slot).await {
            Ok(conn) => conn
                .sftp
                .remove_file(server_path.as_str())
                .await
                .map_err(|e| map_sftp_error(e, &server_path)),
            Err(e) => Err(e),
        };
        Self::release_on_failure(&mut slot, &result);
        result
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        let server_path = self.target.server_path(path);
        let mut slot = self.conn.lock().await;
        let result = match self.connected(&mut slot).await {
            Ok(conn) => Self::create_dir_inner(conn, &server_path).await,
            Err(e) => Err(e),
        };
        Self::release_on_failure(&mut slot, &result);
        result
    }
}

/// Create an SFTP backend from registry configuration.
pub fn create_sftp_backend(config: serde_json::Value) -> Result<Arc<dyn BackendClient>> {
    let config: SftpConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid SFTP config: {}", e)))?;
    Ok(Arc::new(SftpBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only() {
        let target = Target::parse("files.example.com", None).unwrap();
        assert_eq!(target.host, "files.example.com");
        assert_eq!(target.port, 22);
        assert_eq!(target.root, "");
    }

    #[test]
    fn test_parse_host_port_and_url() {
        let target = Target::parse("files.example.com:2222", Some("/home/alice/")).unwrap();
        assert_eq!(target.port, 2222);
        assert_eq!(target.root, "/home/alice");

        let target = Target::parse("sftp://files.example.com:2200/srv/notes", None).unwrap();
        assert_eq!(target.host, "files.example.com");
        assert_eq!(target.port, 2200);
        assert_eq!(target.root, "/srv/notes");
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(Target::parse("host:notaport", None).is_err());
        assert!(Target::parse("sftp://", None).is_err());
    }

    #[test]
    fn test_server_path() {
        let target = Target::parse("h", Some("/home/alice")).unwrap();
        assert_eq!(target.server_path(&RemotePath::root()), "/home/alice");
        assert_eq!(
            target.server_path(&RemotePath::parse("/notesync/notes/1.json").unwrap()),
            "/home/alice/notesync/notes/1.json"
        );

        let bare = Target::parse("h", None).unwrap();
        assert_eq!(bare.server_path(&RemotePath::root()), "/");
        assert_eq!(bare.server_path(&RemotePath::parse("/a").unwrap()), "/a");
    }

    #[test]
    fn test_config_from_settings_keys() {
        let backend = create_sftp_backend(serde_json::json!({
            "endpoint": "sftp.example.com:2022",
            "username": "alice",
            "secret": "pw",
            "fingerprint": "SHA256:abc"
        }))
        .unwrap();
        assert_eq!(backend.name(), "sftp");
    }

    #[tokio::test]
    async fn test_list_without_server_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = SftpBackend::new(SftpConfig {
            endpoint: format!("127.0.0.1:{}", port),
            username: "alice".to_string(),
            password: Secret::new("pw"),
            root: None,
            fingerprint: None,
        })
        .unwrap();
        let err = backend.list(&RemotePath::root()).await.unwrap_err();
        assert!(err.is_network());
    }
}
