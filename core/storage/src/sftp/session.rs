//! SSH connection and SFTP subsystem setup.

use async_trait::async_trait;
use russh::client::{self, Handle, Handler};
use russh_keys::key::PublicKey;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use notesync_common::{Error, Result, Secret};

/// Timeout for name resolution plus TCP connect plus SSH handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// russh client callbacks.
///
/// Accepts any host key unless a SHA-256 fingerprint was configured.
pub struct ClientHandler {
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint();
        match &self.expected_fingerprint {
            Some(expected) => {
                let expected = expected.trim_start_matches("SHA256:");
                if expected != actual {
                    warn!(%actual, "SFTP host key does not match configured fingerprint");
                    return Ok(false);
                }
                Ok(true)
            }
            None => {
                debug!(fingerprint = %actual, "Accepting SFTP host key");
                Ok(true)
            }
        }
    }
}

/// An authenticated SSH connection with an open SFTP channel.
pub struct SftpConnection {
    // Keeps the SSH session alive for as long as the SFTP channel is used
    _handle: Handle<ClientHandler>,
    pub sftp: SftpSession,
}

impl SftpConnection {
    /// Resolve, connect, authenticate and start the sftp subsystem.
    ///
    /// # Errors
    /// - `UnknownHost` when the name does not resolve
    /// - `Connect` when the TCP connection or handshake fails or times out
    /// - `Authentication` when the password or host key is rejected
    pub async fn open(
        host: &str,
        port: u16,
        username: &str,
        password: &Secret,
        fingerprint: Option<String>,
    ) -> Result<Self> {
        match tokio::time::timeout(
            CONNECT_TIMEOUT,
            Self::open_inner(host, port, username, password, fingerprint),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Connect(format!(
                "Timed out connecting to {}:{}",
                host, port
            ))),
        }
    }

    async fn open_inner(
        host: &str,
        port: u16,
        username: &str,
        password: &Secret,
        fingerprint: Option<String>,
    ) -> Result<Self> {
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| Error::UnknownHost(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::UnknownHost(host.to_string()));
        }

        let stream = TcpStream::connect(&addrs[..])
            .await
            .map_err(|e| Error::Connect(format!("{}:{}: {}", host, port, e)))?;

        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            expected_fingerprint: fingerprint,
        };
        let mut handle = client::connect_stream(config, stream, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => {
                    Error::Authentication(format!("Host key for {} was rejected", host))
                }
                other => Error::Connect(format!("SSH handshake with {} failed: {}", host, other)),
            })?;

        let accepted = handle
            .authenticate_password(username, password.expose())
            .await
            .map_err(|e| Error::Connect(format!("SSH authentication exchange failed: {}", e)))?;
        if !accepted {
            return Err(Error::Authentication(format!(
                "Password rejected for {}@{}",
                username, host
            )));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Network(format!("Failed to open SSH channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Storage(format!("SFTP subsystem unavailable: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Storage(format!("SFTP handshake failed: {}", e)))?;

        info!(host, port, username, "SFTP session opened");
        Ok(Self {
            _handle: handle,
            sftp,
        })
    }
}

/// Map SFTP errors onto the common kinds.
///
/// The SFTP status text is the only portable signal across servers.
pub fn map_sftp_error(err: SftpErrorInner, path: &str) -> Error {
    classify_sftp_message(&err.to_string(), path)
}

fn classify_sftp_message(message: &str, path: &str) -> Error {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        Error::NotFound(path.to_string())
    } else if lower.contains("permission denied") {
        Error::PermissionDenied(path.to_string())
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("closed")
        || lower.contains("connection lost")
        || lower.contains("eof")
    {
        Error::Network(format!("{}: {}", path, message))
    } else {
        Error::Storage(format!("{}: {}", path, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert!(classify_sftp_message("No such file", "/a").is_not_found());
        assert!(matches!(
            classify_sftp_message("Permission denied", "/a"),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_sftp_message("Session closed", "/a"),
            Error::Network(_)
        ));
        assert!(matches!(
            classify_sftp_message("Failure", "/a"),
            Error::Storage(_)
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let result = SftpConnection::open(
            "notesync-does-not-exist.invalid",
            22,
            "user",
            &Secret::new("pw"),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::UnknownHost(_)) | Err(Error::Connect(_))));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = SftpConnection::open("127.0.0.1", port, "user", &Secret::new("pw"), None).await;
        assert!(matches!(result, Err(Error::Connect(_))));
    }
}
