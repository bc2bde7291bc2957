//! One-shot write-path tasks.
//!
//! Both run under the same per-engine lock as a full pass and report a
//! [`SyncOutcome`], but touch only what they are given.

use std::time::Instant;
use tracing::{debug, info};

use notesync_common::{Error, ImageRef, NoteBundle, Result};

use crate::conflict;
use crate::conflict::Decision;
use crate::reconciler::{ends_pass, FailedItem, Reconciler, SyncOutcome};

/// Force-push bundles, overwriting whatever the remote has.
///
/// Images the previous remote copy referenced and the pushed bundle does not
/// are removed. Remote copies from a newer schema are still left alone.
#[derive(Debug, Clone)]
pub struct UploadTask {
    bundles: Vec<NoteBundle>,
}

impl UploadTask {
    pub fn new(bundles: Vec<NoteBundle>) -> Self {
        Self { bundles }
    }

    pub async fn run(&self, reconciler: &Reconciler) -> SyncOutcome {
        let engine = reconciler.engine();
        let _guard = engine.lock_sync().await;
        let started = Instant::now();
        let cancel = engine.cancellation();
        let mut outcome = SyncOutcome::empty();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled("backend changed during upload".to_string())),
            result = self.upload_all(reconciler, &mut outcome) => result,
        };
        if let Err(err) = result {
            outcome.abort(err);
        }
        outcome.finish(started);
        info!(
            "Upload of {} notes finished: {} ({} uploaded, {} failed)",
            self.bundles.len(),
            outcome.status,
            outcome.uploaded,
            outcome.failures.len()
        );
        outcome
    }

    async fn upload_all(&self, reconciler: &Reconciler, outcome: &mut SyncOutcome) -> Result<()> {
        reconciler.engine().ensure_connected().await?;
        let mut manifest = reconciler.manifest().await?;

        for bundle in &self.bundles {
            let id = bundle.id();
            let previous = if manifest.notes.contains_key(&id) {
                match reconciler.read_remote(id).await {
                    Ok(previous) => previous,
                    Err(err) if ends_pass(&err) => return Err(err),
                    Err(err) => {
                        debug!("Overwriting unreadable remote note {}: {}", id, err);
                        None
                    }
                }
            } else {
                None
            };

            if let Some(previous) = &previous {
                if let Decision::Skip { .. } = conflict::resolve(bundle, previous) {
                    outcome.skipped.push(id);
                    continue;
                }
            }

            match reconciler
                .push(bundle, previous.as_ref(), &mut manifest, outcome)
                .await
            {
                Ok(()) => {}
                Err(err) if ends_pass(&err) => return Err(err),
                Err(err) => outcome.record(FailedItem::Note(id), err),
            }
        }
        Ok(())
    }
}

/// Delete image files from the remote only. Images already gone are not an
/// error but are not counted as removed.
#[derive(Debug, Clone)]
pub struct RemoveImagesTask {
    images: Vec<ImageRef>,
}

impl RemoveImagesTask {
    pub fn new(images: Vec<ImageRef>) -> Self {
        Self { images }
    }

    pub async fn run(&self, reconciler: &Reconciler) -> SyncOutcome {
        let engine = reconciler.engine();
        let _guard = engine.lock_sync().await;
        let started = Instant::now();
        let cancel = engine.cancellation();
        let mut outcome = SyncOutcome::empty();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled("backend changed during image removal".to_string())),
            result = self.remove_all(reconciler, &mut outcome) => result,
        };
        if let Err(err) = result {
            outcome.abort(err);
        }
        outcome.finish(started);
        info!(
            "Removal of {} images finished: {} ({} removed, {} failed)",
            self.images.len(),
            outcome.status,
            outcome.images_removed,
            outcome.failures.len()
        );
        outcome
    }

    async fn remove_all(&self, reconciler: &Reconciler, outcome: &mut SyncOutcome) -> Result<()> {
        let engine = reconciler.engine();
        engine.ensure_connected().await?;

        for image in &self.images {
            let result = match engine.layout().image_path(&image.filename) {
                Ok(path) => match engine.delete_file(&path).await {
                    Ok(()) => Ok(true),
                    Err(err) if err.is_not_found() => Ok(false),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            match result {
                Ok(true) => outcome.images_removed += 1,
                Ok(false) => debug!("Image {} was already gone from the remote", image.filename),
                Err(err) if ends_pass(&err) => return Err(err),
                Err(err) => outcome.record(FailedItem::Image(image.filename.clone()), err),
            }
        }
        Ok(())
    }
}
