//! `NoteSync`: the entry point a host application holds on to.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use notesync_common::{ImageRef, NoteBundle, Result};
use notesync_storage::{BackendRegistry, BackendSettings};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::scheduler::{SyncRequest, SyncScheduler};
use crate::state::{EngineSnapshot, TestResult};
use crate::store::{ImageStore, NoteStore};
use crate::tasks::{RemoveImagesTask, UploadTask};

/// Sync service over one engine and one local store. Clones share state.
#[derive(Clone)]
pub struct NoteSync {
    reconciler: Arc<Reconciler>,
}

impl NoteSync {
    pub fn new(engine: Engine, notes: Arc<dyn NoteStore>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(engine, notes, images)),
        }
    }

    /// Build the engine from settings and wrap it.
    pub fn from_settings(
        registry: Arc<BackendRegistry>,
        settings: &BackendSettings,
        config: EngineConfig,
        notes: Arc<dyn NoteStore>,
        images: Arc<dyn ImageStore>,
    ) -> Result<Self> {
        let engine = Engine::from_settings(registry, settings, config)?;
        Ok(Self::new(engine, notes, images))
    }

    pub fn engine(&self) -> &Engine {
        self.reconciler.engine()
    }

    /// Switch backend or credentials.
    pub fn configure(&self, settings: &BackendSettings) -> Result<()> {
        self.engine().configure(settings)
    }

    /// Probe connectivity, sharing a probe that is already running.
    pub async fn test(&self) -> TestResult {
        self.engine().test().await
    }

    /// Run a full reconciliation pass.
    pub async fn sync(&self) -> SyncOutcome {
        self.reconciler.run().await
    }

    /// Force-push bundles without a full pass.
    pub async fn upload(&self, bundles: Vec<NoteBundle>) -> SyncOutcome {
        UploadTask::new(bundles).run(&self.reconciler).await
    }

    /// Delete images from the remote.
    pub async fn remove_images(&self, images: Vec<ImageRef>) -> SyncOutcome {
        RemoveImagesTask::new(images).run(&self.reconciler).await
    }

    /// Observe engine status changes.
    pub fn status(&self) -> watch::Receiver<EngineSnapshot> {
        self.engine().subscribe()
    }

    /// Start a background scheduler in the configured mode.
    ///
    /// The returned scheduler queues requests; the task ends on
    /// [`SyncScheduler::shutdown`].
    pub fn spawn_scheduler(&self) -> (SyncScheduler, JoinHandle<()>) {
        let (scheduler, handle) = SyncScheduler::new(self.engine().config().scheduler);
        let service = self.clone();
        info!("Starting background scheduler");
        let task = tokio::spawn(async move {
            handle
                .run(move |request| {
                    let service = service.clone();
                    async move { Ok(service.dispatch(request).await) }
                })
                .await;
        });
        (scheduler, task)
    }

    async fn dispatch(&self, request: SyncRequest) -> SyncOutcome {
        match request {
            SyncRequest::Full => self.sync().await,
            SyncRequest::Upload(bundles) => self.upload(bundles).await,
            SyncRequest::RemoveImages(images) => self.remove_images(images).await,
            SyncRequest::Shutdown => SyncOutcome::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_common::{Note, NoteId, NoteType};
    use notesync_storage::{create_default_registry, BackendKind, MemoryBackend};

    use crate::state::EngineStatus;
    use crate::store::{MemoryImageStore, MemoryNoteStore};

    fn service(backend: &MemoryBackend, notes: &MemoryNoteStore) -> NoteSync {
        let engine = Engine::with_client(Arc::new(backend.clone()), EngineConfig::default()).unwrap();
        NoteSync::new(engine, Arc::new(notes.clone()), Arc::new(MemoryImageStore::new()))
    }

    #[tokio::test]
    async fn test_status_subscription_sees_probe() {
        let backend = MemoryBackend::new();
        let sync = service(&backend, &MemoryNoteStore::new());
        let mut status = sync.status();
        assert_eq!(status.borrow().status, EngineStatus::Ready);

        assert!(sync.test().await.is_ok());
        status
            .wait_for(|s| s.status == EngineStatus::Ok)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_syncs_queue() {
        let backend = MemoryBackend::new();
        let notes = MemoryNoteStore::new();
        notes.insert(NoteBundle::new(
            Note::new(NoteId::new(1), NoteType::Text),
            Vec::new(),
            Vec::new(),
        ));
        let sync = service(&backend, &notes);

        let (a, b) = tokio::join!(sync.sync(), sync.sync());
        assert!(a.is_ok() && b.is_ok());
        // Exactly one of the two passes uploaded the note.
        assert_eq!(a.uploaded + b.uploaded, 1);
    }

    #[tokio::test]
    async fn test_scheduler_dispatches_to_service() {
        let backend = MemoryBackend::new();
        let notes = MemoryNoteStore::new();
        let sync = service(&backend, &notes);
        let (scheduler, task) = sync.spawn_scheduler();

        let bundle = NoteBundle::new(Note::new(NoteId::new(3), NoteType::Text), Vec::new(), Vec::new());
        let outcome = scheduler.request_upload(vec![bundle]).await.unwrap();
        assert_eq!(outcome.uploaded, 1);
        assert!(backend.contains("/notesync/notes/3.json"));

        let outcome = scheduler.request_sync().await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(notes.get(NoteId::new(3)).unwrap().note.origin, notesync_common::NoteOrigin::Remote);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_from_settings() {
        let settings = BackendSettings::new(BackendKind::Memory, "");
        let sync = NoteSync::from_settings(
            Arc::new(create_default_registry()),
            &settings,
            EngineConfig::default(),
            Arc::new(MemoryNoteStore::new()),
            Arc::new(MemoryImageStore::new()),
        )
        .unwrap();
        assert_eq!(sync.engine().backend_name(), "memory");
        assert!(sync.sync().await.is_ok());
    }
}
