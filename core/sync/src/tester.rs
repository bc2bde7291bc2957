//! Connectivity probe.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use notesync_common::Error;
use notesync_storage::BackendClient;

use crate::layout::RemoteLayout;
use crate::state::{StatusKind, TestResult};

/// Probe a backend by listing the base directory.
///
/// A missing base directory is created together with `notes/` and `images/`;
/// the probe reports OK when that works. The whole probe is bounded by
/// `limit` and a timeout counts as a connect error.
pub async fn probe(client: &dyn BackendClient, layout: &RemoteLayout, limit: Duration) -> TestResult {
    match timeout(limit, probe_inner(client, layout)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Probe of {} timed out after {:?}", client.name(), limit);
            TestResult::from_error(Error::Connect(format!(
                "No answer from {} within {:?}",
                client.name(),
                limit
            )))
        }
    }
}

async fn probe_inner(client: &dyn BackendClient, layout: &RemoteLayout) -> TestResult {
    let base = layout.base_dir();
    debug!("Probing {} at {}", client.name(), base);

    let err = match client.test_connection(base).await {
        Ok(()) => return TestResult::ok(),
        Err(err) => err,
    };

    if StatusKind::from_error(&err) != StatusKind::PathNotFound {
        warn!("Probe of {} failed: {}", client.name(), err);
        return TestResult::from_error(err);
    }

    info!("{} missing on {}, creating it", base, client.name());
    for dir in layout.directories() {
        if let Err(heal) = client.create_dir_all(dir).await {
            warn!("Could not create {}: {}", dir, heal);
            return TestResult::from_error(heal);
        }
    }
    match client.test_connection(base).await {
        Ok(()) => TestResult::ok(),
        Err(err) => TestResult::from_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use notesync_common::{RemotePath, Result};
    use notesync_storage::{FailureKind, FaultScope, MemoryBackend, RemoteEntry};

    fn layout() -> RemoteLayout {
        RemoteLayout::new(RemotePath::parse("/notesync").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_base_is_created() {
        let backend = MemoryBackend::new();
        let result = probe(&backend, &layout(), Duration::from_secs(5)).await;
        assert!(result.is_ok(), "{:?}", result);

        let entries = backend.list(&RemotePath::parse("/notesync").unwrap()).await.unwrap();
        let mut names: Vec<_> = entries.into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["images", "notes"]);
    }

    #[tokio::test]
    async fn test_unreachable_classification() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(Some(FailureKind::UnknownHost));
        let result = probe(&backend, &layout(), Duration::from_secs(5)).await;
        assert_eq!(result.status, StatusKind::UnknownHost);

        backend.set_unreachable(Some(FailureKind::Auth));
        let result = probe(&backend, &layout(), Duration::from_secs(5)).await;
        assert_eq!(result.status, StatusKind::AuthError);
    }

    #[tokio::test]
    async fn test_failed_heal_reports_error() {
        let backend = MemoryBackend::new();
        backend.fail_path("/notesync", FaultScope::Writes, FailureKind::Io);
        let result = probe(&backend, &layout(), Duration::from_secs(5)).await;
        assert!(!result.is_ok());
        assert!(result.message.is_some());
    }

    struct Hanging;

    #[async_trait]
    impl BackendClient for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn list(&self, _dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
            std::future::pending().await
        }
        async fn read(&self, _path: &RemotePath) -> Result<Vec<u8>> {
            std::future::pending().await
        }
        async fn write(&self, _path: &RemotePath, _data: Vec<u8>) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _path: &RemotePath) -> Result<()> {
            std::future::pending().await
        }
        async fn create_dir(&self, _path: &RemotePath) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_connect_error() {
        let result = probe(&Hanging, &layout(), Duration::from_secs(20)).await;
        assert_eq!(result.status, StatusKind::ConnectError);
    }
}
