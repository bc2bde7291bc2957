//! Engine: one active backend plus its connectivity state.
//!
//! The status lives in a `watch` channel. Only the engine writes it, and
//! every write checks the generation it was computed for, so results from a
//! backend that was swapped out never leak into the new one. Callers that
//! have to wait for a probe subscribe to the channel instead of polling.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use notesync_common::{Error, RemotePath, Result};
use notesync_storage::{
    create_default_registry, BackendClient, BackendRegistry, BackendSettings, RemoteEntry,
};

use crate::config::EngineConfig;
use crate::layout::RemoteLayout;
use crate::retry::{Backoff, RetryExecutor};
use crate::state::{EngineSnapshot, EngineStatus, StatusKind, TestResult};
use crate::tester;

/// The backend of one generation and everything tied to its lifetime.
#[derive(Clone)]
struct Active {
    client: Arc<dyn BackendClient>,
    generation: u64,
    cancel: CancellationToken,
    retrying: Arc<AtomicBool>,
}

impl Active {
    fn new(client: Arc<dyn BackendClient>, generation: u64) -> Self {
        Self {
            client,
            generation,
            cancel: CancellationToken::new(),
            retrying: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    layout: RemoteLayout,
    registry: Arc<BackendRegistry>,
    executor: RetryExecutor,
    active: RwLock<Active>,
    status: watch::Sender<EngineSnapshot>,
    sync_lock: Mutex<()>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .cancel
            .cancel();
    }
}

/// Handle to an engine. Clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Engine over an already constructed backend.
    pub fn with_client(client: Arc<dyn BackendClient>, config: EngineConfig) -> Result<Self> {
        Self::build(client, config, Arc::new(create_default_registry()))
    }

    /// Engine whose backend is resolved from settings.
    pub fn from_settings(
        registry: Arc<BackendRegistry>,
        settings: &BackendSettings,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = registry.resolve_settings(settings)?;
        Self::build(client, config, registry)
    }

    fn build(
        client: Arc<dyn BackendClient>,
        config: EngineConfig,
        registry: Arc<BackendRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = RemoteLayout::new(config.base_dir()?)?;
        let (status, _) = watch::channel(EngineSnapshot::new(client.name(), 0));
        info!("Engine created for {} at {}", client.name(), layout.base_dir());

        Ok(Self {
            inner: Arc::new(EngineInner {
                executor: RetryExecutor::new(config.retry.clone()),
                config,
                layout,
                registry,
                active: RwLock::new(Active::new(client, 0)),
                status,
                sync_lock: Mutex::new(()),
            }),
        })
    }

    /// Switch to the backend described by `settings`.
    ///
    /// Resets the status to READY, cancels the retry loop, probes and I/O of
    /// the previous backend, and drops any earlier credential verdict.
    pub fn configure(&self, settings: &BackendSettings) -> Result<()> {
        let client = self.inner.registry.resolve_settings(settings)?;
        self.replace_client(client);
        Ok(())
    }

    /// Switch to an already constructed backend. Same effects as [`configure`](Self::configure).
    pub fn replace_client(&self, client: Arc<dyn BackendClient>) {
        let mut active = self.inner.active.write().unwrap_or_else(|e| e.into_inner());
        active.cancel.cancel();
        let generation = active.generation + 1;
        info!(
            "Switching engine from {} to {} (generation {})",
            active.client.name(),
            client.name(),
            generation
        );
        self.inner
            .status
            .send_replace(EngineSnapshot::new(client.name(), generation));
        *active = Active::new(client, generation);
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.inner.status.borrow().status
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.status.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.status.subscribe()
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.inner.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> String {
        self.active().client.name().to_string()
    }

    /// Token cancelled when the current backend is replaced.
    pub fn cancellation(&self) -> CancellationToken {
        self.active().cancel.clone()
    }

    /// Serialize passes and tasks on this engine.
    pub async fn lock_sync(&self) -> MutexGuard<'_, ()> {
        self.inner.sync_lock.lock().await
    }

    fn active(&self) -> Active {
        self.inner
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run a connectivity probe, or attach to the one already running.
    pub async fn test(&self) -> TestResult {
        loop {
            let active = self.active();
            if let Some(result) = self.test_generation(&active).await {
                return result;
            }
            debug!("Backend replaced during probe, probing the new one");
        }
    }

    /// Probe `active`. `None` when it was superseded before a verdict.
    async fn test_generation(&self, active: &Active) -> Option<TestResult> {
        let mut rx = self.inner.status.subscribe();
        let started = self.inner.status.send_if_modified(|s| {
            if s.generation != active.generation || s.status == EngineStatus::Testing {
                return false;
            }
            s.status = EngineStatus::Testing;
            true
        });

        if started {
            debug!("Starting probe of {}", active.client.name());
            let engine = self.clone();
            let probed = active.clone();
            tokio::spawn(async move { engine.run_probe(probed).await });
        } else {
            debug!("Attaching to running probe");
        }

        let generation = active.generation;
        let snapshot = rx
            .wait_for(|s| s.generation != generation || s.status != EngineStatus::Testing)
            .await
            .ok()
            .map(|s| s.clone())?;
        if snapshot.generation != generation {
            return None;
        }
        Some(
            snapshot
                .last_test
                .unwrap_or_else(|| TestResult::describe(&Error::Cancelled("probe abandoned".into()))),
        )
    }

    async fn run_probe(self, active: Active) {
        let result = tokio::select! {
            _ = active.cancel.cancelled() => {
                debug!("Probe of {} cancelled", active.client.name());
                return;
            }
            result = tester::probe(
                active.client.as_ref(),
                &self.inner.layout,
                self.inner.config.probe_timeout,
            ) => result,
        };

        let status = result.status.engine_status();
        info!(
            "Probe of {} finished: {}{}",
            active.client.name(),
            result.status,
            result
                .message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
        let published = self.inner.status.send_if_modified(|s| {
            if s.generation != active.generation {
                return false;
            }
            s.status = status;
            s.last_test = Some(result);
            true
        });

        if published && status == EngineStatus::Error {
            self.spawn_retry_loop(&active);
        }
    }

    /// Start the background retry loop for `active` unless one is running.
    fn spawn_retry_loop(&self, active: &Active) {
        if active.retrying.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::downgrade(&self.inner);
        let active = active.clone();
        let backoff = Backoff::new(self.inner.config.connectivity.clone());
        tokio::spawn(async move {
            retry_loop(engine, active.clone(), backoff).await;
            active.retrying.store(false, Ordering::SeqCst);
        });
    }

    /// Succeed when the backend is known good, probing it otherwise.
    pub async fn ensure_connected(&self) -> Result<()> {
        let snapshot = self.snapshot();
        match snapshot.status {
            EngineStatus::Ok => return Ok(()),
            EngineStatus::AuthError => return Err(auth_error(&snapshot)),
            _ => {}
        }
        let result = self.test().await;
        if result.is_ok() {
            Ok(())
        } else {
            Err(result.to_error())
        }
    }

    /// Wait out a running probe and refuse I/O after a credential rejection.
    async fn admit(&self) -> Result<Active> {
        loop {
            let active = self.active();
            let mut rx = self.inner.status.subscribe();
            let snapshot = rx
                .wait_for(|s| s.generation != active.generation || s.status.is_settled())
                .await
                .map(|s| s.clone())
                .map_err(|_| Error::Cancelled("Engine dropped".to_string()))?;

            if snapshot.generation != active.generation {
                continue;
            }
            if snapshot.status == EngineStatus::AuthError {
                return Err(auth_error(&snapshot));
            }
            return Ok(active);
        }
    }

    /// Run one backend call with per-call retries, cancellation and status
    /// bookkeeping.
    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn BackendClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let active = self.admit().await?;
        let client = active.client.clone();

        let result = tokio::select! {
            _ = active.cancel.cancelled() => {
                Err(Error::Cancelled(format!("{} interrupted by backend change", what)))
            }
            result = self.inner.executor.execute(|| op(client.clone())) => result,
        };

        if let Err(err) = &result {
            if err.is_network() {
                self.degrade(&active, err);
            }
        }
        result
    }

    /// Record a reachability or credential failure seen during I/O.
    fn degrade(&self, active: &Active, err: &Error) {
        let status = if err.is_auth() {
            EngineStatus::AuthError
        } else {
            EngineStatus::Error
        };
        let changed = self.inner.status.send_if_modified(|s| {
            if s.generation != active.generation
                || s.status == EngineStatus::Testing
                || s.status == status
            {
                return false;
            }
            s.status = status;
            s.last_test = Some(TestResult::describe(err));
            true
        });
        if changed {
            warn!("{} is now {}: {}", active.client.name(), status, err);
            if status == EngineStatus::Error {
                self.spawn_retry_loop(active);
            }
        }
    }

    /// List the direct children of `dir`.
    pub async fn list_remote_files(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        self.call("list", move |client| {
            let dir = dir.clone();
            async move { client.list(&dir).await }
        })
        .await
    }

    pub async fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>> {
        self.call("read", move |client| {
            let path = path.clone();
            async move { client.read(&path).await }
        })
        .await
    }

    pub async fn write_file(&self, path: &RemotePath, data: Vec<u8>) -> Result<()> {
        let data = Arc::new(data);
        self.call("write", move |client| {
            let path = path.clone();
            let data = data.clone();
            async move { client.write(&path, data.as_ref().clone()).await }
        })
        .await
    }

    pub async fn delete_file(&self, path: &RemotePath) -> Result<()> {
        self.call("delete", move |client| {
            let path = path.clone();
            async move { client.delete(&path).await }
        })
        .await
    }

    /// Create `dir` and its missing ancestors.
    pub async fn ensure_dir(&self, dir: &RemotePath) -> Result<()> {
        self.call("mkdir", move |client| {
            let dir = dir.clone();
            async move { client.create_dir_all(&dir).await }
        })
        .await
    }
}

fn auth_error(snapshot: &EngineSnapshot) -> Error {
    match &snapshot.last_test {
        Some(test) if test.status == StatusKind::AuthError => test.to_error(),
        _ => Error::Authentication(format!("{} rejected the credentials", snapshot.backend)),
    }
}

/// Re-probe with growing pauses until the backend answers, rejects the
/// credentials, or is replaced.
///
/// Holds only a weak reference so a dropped engine ends the loop.
async fn retry_loop(engine: Weak<EngineInner>, active: Active, mut backoff: Backoff) {
    loop {
        let delay = backoff.next_delay();
        debug!(
            "Retrying {} in {:?} (attempt {})",
            active.client.name(),
            delay,
            backoff.attempts()
        );
        tokio::select! {
            _ = active.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = engine.upgrade() else {
            return;
        };
        let engine_handle = Engine { inner };
        let snapshot = engine_handle.snapshot();
        if snapshot.generation != active.generation || snapshot.status >= EngineStatus::AuthError {
            return;
        }

        match engine_handle.test_generation(&active).await {
            Some(result) if result.is_ok() => {
                info!("{} reachable again", active.client.name());
                return;
            }
            Some(result) if result.status == StatusKind::AuthError => return,
            Some(_) => {}
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_storage::{BackendKind, FailureKind, MemoryBackend};
    use std::time::Duration;

    use crate::retry::RetryConfig;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            retry: RetryConfig::new(0),
            connectivity: RetryConfig::connectivity().with_jitter(false),
            ..Default::default()
        }
    }

    fn engine(backend: &MemoryBackend) -> Engine {
        Engine::with_client(Arc::new(backend.clone()), quick_config()).unwrap()
    }

    #[tokio::test]
    async fn test_probe_reaches_ok_and_heals_layout() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        assert_eq!(engine.status(), EngineStatus::Ready);

        let result = engine.test().await;
        assert!(result.is_ok());
        assert_eq!(engine.status(), EngineStatus::Ok);
        assert!(backend.contains("/notesync/notes"));
        assert!(backend.contains("/notesync/images"));
    }

    #[tokio::test]
    async fn test_concurrent_tests_share_one_probe() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);

        let (a, b, c) = tokio::join!(engine.test(), engine.test(), engine.test());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        // One probe: a single listing of the (healed) base directory.
        assert_eq!(backend.read_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_terminal() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(Some(FailureKind::Auth));
        let engine = engine(&backend);

        let result = engine.test().await;
        assert_eq!(result.status, StatusKind::AuthError);
        assert_eq!(engine.status(), EngineStatus::AuthError);

        let err = engine.read_file(&RemotePath::parse("/notesync/x").unwrap()).await;
        assert!(matches!(err, Err(Error::Authentication(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_recovers() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(Some(FailureKind::Connect));
        let engine = engine(&backend);
        let mut rx = engine.subscribe();

        let result = engine.test().await;
        assert_eq!(result.status, StatusKind::ConnectError);
        assert_eq!(engine.status(), EngineStatus::Error);

        backend.set_unreachable(None);
        tokio::time::sleep(Duration::from_secs(31)).await;
        rx.wait_for(|s| s.status == EngineStatus::Ok).await.unwrap();
        assert_eq!(engine.status(), EngineStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_supersedes_retry_loop() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(Some(FailureKind::Connect));
        let engine = engine(&backend);
        engine.test().await;
        assert_eq!(engine.status(), EngineStatus::Error);
        let stale = engine.cancellation();

        engine
            .configure(&BackendSettings::new(BackendKind::Memory, ""))
            .unwrap();
        assert!(stale.is_cancelled());
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, EngineStatus::Ready);
        assert_eq!(snapshot.generation, 1);
        assert!(snapshot.last_test.is_none());

        // The old loop must not probe the new backend or touch its status.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(engine.status(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_io_failure_degrades_status() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        engine.test().await;
        assert_eq!(engine.status(), EngineStatus::Ok);

        backend.set_unreachable(Some(FailureKind::UnknownHost));
        let err = engine
            .list_remote_files(engine.layout().notes_dir())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHost(_)));
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(
            engine.snapshot().last_test.unwrap().status,
            StatusKind::UnknownHost
        );
    }

    #[tokio::test]
    async fn test_not_found_does_not_degrade() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        engine.test().await;

        let path = engine.layout().note_path(notesync_common::NoteId::new(1)).unwrap();
        assert!(engine.read_file(&path).await.unwrap_err().is_not_found());
        assert_eq!(engine.status(), EngineStatus::Ok);
    }

    #[tokio::test]
    async fn test_io_round_trip() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        engine.ensure_connected().await.unwrap();

        let path = engine.layout().image_path("a.png").unwrap();
        engine.write_file(&path, b"png".to_vec()).await.unwrap();
        assert_eq!(engine.read_file(&path).await.unwrap(), b"png");
        let listed = engine.list_remote_files(engine.layout().images_dir()).await.unwrap();
        assert_eq!(listed.len(), 1);
        engine.delete_file(&path).await.unwrap();
        assert!(!backend.contains("/notesync/images/a.png"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            remote_dir: "/".to_string(),
            ..Default::default()
        };
        assert!(Engine::with_client(Arc::new(MemoryBackend::new()), config).is_err());
    }
}
