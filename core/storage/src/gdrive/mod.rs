//! Google Drive backend.
//!
//! - OAuth2 with automatic access token refresh
//! - Path to file id resolution with caching
//! - Multipart upload for new files, media upload for updates

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{AuthConfig, AuthManager, TokenManager, Tokens};
pub use client::{DriveClient, DriveFile};
pub use provider::{create_gdrive_backend, GDriveBackend, GDriveConfig};
