//! WebDAV backend implementation.

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use notesync_common::{Error, RemotePath, Result, Secret};

use super::multistatus::{parse_multistatus, DavEntry, PROPFIND_BODY};
use crate::http::{build_client, check_response, map_transport_error};
use crate::provider::{BackendClient, RemoteEntry};

/// Per-request timeout once a connection is established.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// WebDAV backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDavConfig {
    /// Collection URL everything is stored under, e.g.
    /// `https://cloud.example.com/remote.php/dav/files/alice`.
    #[serde(rename = "endpoint", alias = "url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "secret", alias = "password")]
    pub password: Secret,
}

/// WebDAV backend.
pub struct WebDavBackend {
    base: Url,
    username: String,
    password: Secret,
    http: Client,
}

impl WebDavBackend {
    /// Create a backend for the given configuration.
    ///
    /// # Errors
    /// - The URL is not an absolute http(s) URL
    pub fn new(config: WebDavConfig) -> Result<Self> {
        let base = Url::parse(config.url.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid WebDAV URL '{}': {}", config.url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "WebDAV URL must use http or https, got '{}'",
                base.scheme()
            )));
        }
        if base.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!("Invalid WebDAV URL '{}'", config.url)));
        }

        Ok(Self {
            base,
            username: config.username,
            password: config.password,
            http: build_client()?,
        })
    }

    /// Build the URL of `path`. Collections get a trailing slash.
    pub fn url_for(&self, path: &RemotePath, collection: bool) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidInput("WebDAV URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(path.components());
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(REQUEST_TIMEOUT);
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(self.password.expose()))
        }
    }

    fn dav_method(name: &'static str) -> Result<Method> {
        Method::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("Invalid HTTP method {}: {}", name, e)))
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| map_transport_error(e, context))
    }

    /// Turn one multistatus response into a child entry of `dir`.
    ///
    /// Returns `None` for the entry describing `dir` itself and for hrefs
    /// whose last segment is not a valid path component.
    fn to_entry(dir: &RemotePath, dir_url: &Url, dav: DavEntry) -> Option<RemoteEntry> {
        let href_path = match Url::parse(&dav.href) {
            Ok(absolute) => absolute.path().to_string(),
            Err(_) => dav.href.clone(),
        };
        let decoded = percent_decode_str(&href_path).decode_utf8().ok()?;
        let trimmed = decoded.trim_end_matches('/');

        let own = percent_decode_str(dir_url.path()).decode_utf8().ok()?;
        if trimmed == own.trim_end_matches('/') {
            return None;
        }

        let name = trimmed.rsplit('/').next()?;
        let child = dir.join(name).ok()?;
        let entry = if dav.is_collection {
            RemoteEntry::directory(child)
        } else {
            let marker = dav
                .etag
                .clone()
                .or_else(|| dav.last_modified.map(|m| m.timestamp().to_string()));
            RemoteEntry::file(child, dav.content_length, marker)
        };
        Some(match dav.last_modified {
            Some(modified) => entry.with_modified(modified),
            None => entry,
        })
    }
}

#[async_trait]
impl BackendClient for WebDavBackend {
    fn name(&self) -> &str {
        "webdav"
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let url = self.url_for(dir, true)?;
        let builder = self
            .request(Self::dav_method("PROPFIND")?, url.clone())
            .header("Depth", "1")
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let response = self.send(builder, "PROPFIND").await?;
        let response = check_response(response, &format!("PROPFIND {}", dir)).await?;

        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, "PROPFIND body"))?;
        let entries = parse_multistatus(&body)?
            .into_iter()
            .filter_map(|dav| Self::to_entry(dir, &url, dav))
            .collect();
        Ok(entries)
    }

    async fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        let url = self.url_for(path, false)?;
        let response = self.send(self.request(Method::GET, url), "GET").await?;
        let response = check_response(response, &format!("GET {}", path)).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| map_transport_error(e, "GET body"))
    }

    async fn write(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        let url = self.url_for(path, false)?;
        let builder = self
            .request(Method::PUT, url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = self.send(builder, "PUT").await?;
        check_response(response, &format!("PUT {}", path)).await?;
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let url = self.url_for(path, false)?;
        let response = self.send(self.request(Method::DELETE, url), "DELETE").await?;
        check_response(response, &format!("DELETE {}", path)).await?;
        Ok(())
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        let url = self.url_for(path, true)?;
        let response = self
            .send(self.request(Self::dav_method("MKCOL")?, url), "MKCOL")
            .await?;
        // 405 means the collection is already there
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        check_response(response, &format!("MKCOL {}", path)).await?;
        Ok(())
    }
}

/// Create a WebDAV backend from registry configuration.
pub fn create_webdav_backend(config: serde_json::Value) -> Result<Arc<dyn BackendClient>> {
    let config: WebDavConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid WebDAV config: {}", e)))?;
    Ok(Arc::new(WebDavBackend::new(config)?))
}
