//! Google Drive v3 REST client.

use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use notesync_common::{Error, Result};

use super::auth::TokenManager;
use crate::http::{build_client, check_response, map_transport_error};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,md5Checksum,trashed";

/// Drive file metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Size in bytes, sent by the API as a string (absent for folders).
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Thin wrapper over the Drive REST endpoints the backend needs.
pub struct DriveClient {
    http: Client,
    tokens: Arc<TokenManager>,
}

impl DriveClient {
    pub fn new(tokens: Arc<TokenManager>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            tokens,
        })
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(builder.header(header::AUTHORIZATION, format!("Bearer {}", token.expose())))
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(builder)
            .await?
            .send()
            .await
            .map_err(|e| map_transport_error(e, context))?;
        check_response(response, context).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        context: &str,
    ) -> Result<T> {
        self.send(builder, context)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("{}: bad response: {}", context, e)))
    }

    /// List non-trashed children of a folder, following pagination.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed = false", quote(folder_id));
        let fields = format!("files({}),nextPageToken", FILE_FIELDS);
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(format!("{}/files", DRIVE_API_BASE)).query(&[
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", "1000"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileListResponse = self.send_json(request, "list folder").await?;
            all.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(all)
    }

    /// Find a child by exact name.
    pub async fn find_file(&self, name: &str, parent_id: &str) -> Result<Option<DriveFile>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            quote(name),
            quote(parent_id)
        );
        let fields = format!("files({})", FILE_FIELDS);
        let request = self.http.get(format!("{}/files", DRIVE_API_BASE)).query(&[
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", "1"),
        ]);
        let page: FileListResponse = self.send_json(request, "find file").await?;
        Ok(page.files.into_iter().next())
    }

    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let request = self
            .http
            .post(format!("{}/files", DRIVE_API_BASE))
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata);
        self.send_json(request, "create folder").await
    }

    /// Create a file with a multipart upload.
    pub async fn upload_simple(&self, name: &str, parent_id: &str, data: Vec<u8>) -> Result<DriveFile> {
        let metadata = serde_json::to_string(&serde_json::json!({
            "name": name,
            "parents": [parent_id],
        }))?;

        let boundary = format!("notesync-{}", uuid::Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(data.len() + metadata.len() + 256);
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.as_bytes());
        body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&data);
        body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());

        let request = self
            .http
            .post(format!("{}/files", DRIVE_UPLOAD_BASE))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        self.send_json(request, "upload file").await
    }

    /// Replace the content of an existing file.
    pub async fn update_file(&self, file_id: &str, data: Vec<u8>) -> Result<DriveFile> {
        let request = self
            .http
            .patch(format!("{}/files/{}", DRIVE_UPLOAD_BASE, file_id))
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send_json(request, "update file").await
    }

    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let request = self
            .http
            .get(format!("{}/files/{}", DRIVE_API_BASE, file_id))
            .query(&[("alt", "media")]);
        let response = self.send(request, "download file").await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| map_transport_error(e, "download body"))
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let request = self.http.delete(format!("{}/files/{}", DRIVE_API_BASE, file_id));
        self.send(request, "delete file").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_file_from_api_json() {
        let json = serde_json::json!({
            "id": "abc",
            "name": "12.json",
            "mimeType": "application/json",
            "size": "311",
            "modifiedTime": "2024-09-04T08:00:00.000Z",
            "md5Checksum": "d41d8cd9"
        });
        let file: DriveFile = serde_json::from_value(json).unwrap();
        assert_eq!(file.size_bytes(), Some(311));
        assert!(!file.is_folder());
        assert!(!file.trashed);
        assert!(file.modified_time.is_some());
    }

    #[test]
    fn test_folder_detection() {
        let folder: DriveFile = serde_json::from_value(serde_json::json!({
            "id": "f",
            "name": "notes",
            "mimeType": FOLDER_MIME
        }))
        .unwrap();
        assert!(folder.is_folder());
        assert_eq!(folder.size_bytes(), None);
    }

    #[test]
    fn test_query_quoting() {
        assert_eq!(quote("O'Brien"), "O\\'Brien");
        assert_eq!(quote("a\\b"), "a\\\\b");
    }
}
