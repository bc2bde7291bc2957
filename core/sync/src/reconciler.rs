//! Reconciliation pass.
//!
//! One pass brings the local store and the remote tree to the same state:
//!
//! 1. list `notes/` and `images/` on the remote (creating them if missing)
//! 2. propagate tombstones: delete the remote note file and its images, then
//!    forget the tombstone
//! 3. compare every other local bundle with its remote copy by `updated`
//!    and push or pull the newer one
//! 4. materialize notes that only exist remotely
//!
//! A failure on one note is recorded and the pass continues. Reachability
//! and credential failures, and a backend switch, end the pass.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use notesync_common::{
    Error, ImageRef, NoteBundle, NoteId, NoteOrigin, RemotePath, Result, SchemaVersion,
};
use notesync_storage::RemoteEntry;

use crate::conflict::{self, Decision, Resolution};
use crate::engine::Engine;
use crate::layout::parse_note_file_name;
use crate::state::StatusKind;
use crate::store::{ImageStore, NoteStore};
use crate::wire::{decode_note, encode_note};

/// What a recorded failure was about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedItem {
    Note(NoteId),
    Image(String),
}

impl fmt::Display for FailedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedItem::Note(id) => write!(f, "note {}", id),
            FailedItem::Image(name) => write!(f, "image {}", name),
        }
    }
}

/// A failure that was recorded without ending the pass.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub item: FailedItem,
    pub status: StatusKind,
    pub error: Arc<Error>,
}

/// Structured result of a pass or a write-path task.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// `Ok` only if nothing failed.
    pub status: StatusKind,
    pub message: Option<String>,
    /// The error that ended the pass, or else the first recorded failure.
    pub error: Option<Arc<Error>>,
    /// Note files written to the remote.
    pub uploaded: usize,
    /// Bundles written to the local store.
    pub downloaded: usize,
    /// Note files deleted from the remote because of tombstones.
    pub remote_deleted: usize,
    pub images_uploaded: usize,
    pub images_downloaded: usize,
    /// Image files deleted from the remote.
    pub images_removed: usize,
    /// Notes left alone because their remote copy has a newer schema.
    pub skipped: Vec<NoteId>,
    pub failures: Vec<ItemFailure>,
    /// Set when the pass ended early.
    pub aborted: bool,
    pub duration: Duration,
}

impl SyncOutcome {
    /// Successful outcome that did nothing.
    pub fn empty() -> Self {
        Self {
            status: StatusKind::Ok,
            message: None,
            error: None,
            uploaded: 0,
            downloaded: 0,
            remote_deleted: 0,
            images_uploaded: 0,
            images_downloaded: 0,
            images_removed: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
            aborted: false,
            duration: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusKind::Ok
    }

    /// Number of remote mutations this outcome accounts for.
    pub fn remote_writes(&self) -> usize {
        self.uploaded + self.remote_deleted + self.images_uploaded + self.images_removed
    }

    pub(crate) fn record(&mut self, item: FailedItem, err: Error) {
        warn!("Sync of {} failed: {}", item, err);
        self.failures.push(ItemFailure {
            item,
            status: StatusKind::from_error(&err),
            error: Arc::new(err),
        });
    }

    pub(crate) fn abort(&mut self, err: Error) {
        warn!("Sync aborted: {}", err);
        self.aborted = true;
        self.status = StatusKind::from_error(&err);
        self.message = Some(err.to_string());
        self.error = Some(Arc::new(err));
    }

    /// Derive the overall status once all work is done.
    pub(crate) fn finish(&mut self, started: Instant) {
        self.duration = started.elapsed();
        if self.aborted {
            return;
        }
        if let Some(first) = self.failures.first() {
            self.status = first.status;
            self.message = Some(format!(
                "{} of the items failed, first: {}: {}",
                self.failures.len(),
                first.item,
                first.error
            ));
            self.error = Some(first.error.clone());
        }
    }
}

/// Errors that say the remote as a whole is unusable right now.
pub(crate) fn ends_pass(err: &Error) -> bool {
    err.is_network() || matches!(err, Error::Cancelled(_))
}

/// Remote listing taken at the start of a pass.
#[derive(Debug, Default)]
pub(crate) struct Manifest {
    pub notes: BTreeMap<NoteId, RemoteEntry>,
    pub images: HashSet<String>,
}

/// Runs passes against one engine and one local store.
pub struct Reconciler {
    engine: Engine,
    notes: Arc<dyn NoteStore>,
    images: Arc<dyn ImageStore>,
}

impl Reconciler {
    pub fn new(engine: Engine, notes: Arc<dyn NoteStore>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            engine,
            notes,
            images,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run one full pass. Passes on the same engine run one at a time.
    pub async fn run(&self) -> SyncOutcome {
        let _guard = self.engine.lock_sync().await;
        let started = Instant::now();
        let cancel = self.engine.cancellation();
        let mut outcome = SyncOutcome::empty();
        info!("Starting sync pass on {}", self.engine.backend_name());

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled("backend changed during sync".to_string())),
            result = self.pass(&mut outcome) => result,
        };
        if let Err(err) = result {
            outcome.abort(err);
        }
        outcome.finish(started);

        info!(
            "Sync pass finished in {:?}: {} (up {}, down {}, deleted {}, skipped {}, failed {})",
            outcome.duration,
            outcome.status,
            outcome.uploaded,
            outcome.downloaded,
            outcome.remote_deleted,
            outcome.skipped.len(),
            outcome.failures.len()
        );
        outcome
    }

    async fn pass(&self, outcome: &mut SyncOutcome) -> Result<()> {
        self.engine.ensure_connected().await?;
        let mut manifest = self.manifest().await?;

        let tombstones: BTreeSet<NoteId> =
            self.notes.list_tombstone_ids().await?.into_iter().collect();
        let bundles = self.notes.list_all_bundles().await?;
        debug!(
            "Local: {} notes, {} tombstones. Remote: {} notes, {} images",
            bundles.len(),
            tombstones.len(),
            manifest.notes.len(),
            manifest.images.len()
        );

        for &id in &tombstones {
            match self.propagate_tombstone(id, &mut manifest, outcome).await {
                Ok(()) => {}
                Err(err) if ends_pass(&err) => return Err(err),
                Err(err) => outcome.record(FailedItem::Note(id), err),
            }
        }

        let mut seen = BTreeSet::new();
        for bundle in &bundles {
            let id = bundle.id();
            seen.insert(id);
            if tombstones.contains(&id) {
                debug!("Note {} is tombstoned, not syncing its local copy", id);
                continue;
            }
            match self.sync_local(bundle, &mut manifest, outcome).await {
                Ok(()) => {}
                Err(err) if ends_pass(&err) => return Err(err),
                Err(err) => outcome.record(FailedItem::Note(id), err),
            }
        }

        let remote_only: Vec<NoteId> = manifest
            .notes
            .keys()
            .filter(|id| !seen.contains(id) && !tombstones.contains(id))
            .copied()
            .collect();
        for id in remote_only {
            match self.materialize(id, outcome).await {
                Ok(()) => {}
                Err(err) if ends_pass(&err) => return Err(err),
                Err(err) => outcome.record(FailedItem::Note(id), err),
            }
        }
        Ok(())
    }

    /// List the note and image directories, creating them when missing.
    pub(crate) async fn manifest(&self) -> Result<Manifest> {
        let layout = self.engine.layout();
        let mut manifest = Manifest::default();

        for entry in self.list_or_create(layout.notes_dir()).await? {
            if entry.is_directory {
                continue;
            }
            match parse_note_file_name(&entry.name) {
                Some(id) => {
                    manifest.notes.insert(id, entry);
                }
                None => debug!("Ignoring unexpected remote file {}", entry.path),
            }
        }
        manifest.images = self
            .list_or_create(layout.images_dir())
            .await?
            .into_iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| entry.name)
            .collect();
        Ok(manifest)
    }

    async fn list_or_create(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        match self.engine.list_remote_files(dir).await {
            Ok(entries) => Ok(entries),
            Err(err) if err.is_not_found() => {
                info!("Creating missing remote directory {}", dir);
                self.engine.ensure_dir(dir).await?;
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Remote copy of a note, `None` if it is gone.
    ///
    /// # Errors
    /// - `Serialization` if the file is unreadable or holds another note
    pub(crate) async fn read_remote(&self, id: NoteId) -> Result<Option<NoteBundle>> {
        let path = self.engine.layout().note_path(id)?;
        let remote = match self.engine.read_file(&path).await {
            Ok(bytes) => decode_note(&bytes)?,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        if remote.id() != id {
            return Err(Error::Serialization(format!(
                "Remote file for note {} contains note {}",
                id,
                remote.id()
            )));
        }
        Ok(Some(remote))
    }

    async fn propagate_tombstone(
        &self,
        id: NoteId,
        manifest: &mut Manifest,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        if manifest.notes.contains_key(&id) {
            let remote = match self.read_remote(id).await {
                Ok(remote) => remote,
                Err(Error::Serialization(msg)) => {
                    warn!("Remote note {} is unreadable ({}), deleting it anyway", id, msg);
                    None
                }
                Err(err) => return Err(err),
            };
            if let Some(remote) = remote {
                for image in &remote.images {
                    if self.delete_remote_image(&image.filename, manifest).await? {
                        outcome.images_removed += 1;
                    }
                }
            }
            self.delete_remote_note(id).await?;
            manifest.notes.remove(&id);
            outcome.remote_deleted += 1;
            info!("Deleted note {} from the remote", id);
        } else {
            debug!("Tombstoned note {} is not on the remote", id);
        }
        self.notes.clear_tombstone(id).await
    }

    async fn delete_remote_note(&self, id: NoteId) -> Result<()> {
        let path = self.engine.layout().note_path(id)?;
        match self.engine.delete_file(&path).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        }
    }

    /// Delete one remote image. Returns whether a file was removed.
    pub(crate) async fn delete_remote_image(
        &self,
        filename: &str,
        manifest: &mut Manifest,
    ) -> Result<bool> {
        let path = self.engine.layout().image_path(filename)?;
        let removed = match self.engine.delete_file(&path).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };
        manifest.images.remove(filename);
        Ok(removed)
    }

    async fn sync_local(
        &self,
        local: &NoteBundle,
        manifest: &mut Manifest,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        let id = local.id();
        let remote = if manifest.notes.contains_key(&id) {
            self.read_remote(id).await?
        } else {
            None
        };

        let Some(remote) = remote else {
            debug!("Note {} is new, uploading", id);
            return self.push(local, None, manifest, outcome).await;
        };

        match conflict::resolve(local, &remote) {
            Decision::Skip { remote_schema } => {
                warn!(
                    "Note {} on the remote has schema {}, newer than {}; leaving it alone",
                    id,
                    remote_schema.0,
                    SchemaVersion::CURRENT.0
                );
                outcome.skipped.push(id);
                Ok(())
            }
            Decision::Apply(Resolution::PushLocal) => {
                debug!(
                    "Note {} is newer locally ({} > {})",
                    id,
                    local.updated(),
                    remote.updated()
                );
                self.push(local, Some(&remote), manifest, outcome).await
            }
            Decision::Apply(Resolution::PullRemote) => {
                debug!(
                    "Note {} is newer remotely ({} > {})",
                    id,
                    remote.updated(),
                    local.updated()
                );
                self.pull(remote, Some(local), outcome).await
            }
            Decision::Apply(Resolution::InSync) => {
                outcome.images_downloaded += self.download_missing_images(local).await?;
                Ok(())
            }
        }
    }

    /// Upload a bundle: missing images first, then the note file, then drop
    /// the images the previous remote copy had and this one no longer does.
    pub(crate) async fn push(
        &self,
        bundle: &NoteBundle,
        previous: Option<&NoteBundle>,
        manifest: &mut Manifest,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        let missing: Vec<ImageRef> = bundle
            .images
            .iter()
            .filter(|image| !manifest.images.contains(&image.filename))
            .cloned()
            .collect();
        let uploaded: Vec<Option<String>> = stream::iter(missing)
            .map(|image| async move { self.upload_image(&image).await })
            .buffer_unordered(self.engine.config().image_concurrency)
            .try_collect()
            .await?;
        let uploaded: Vec<String> = uploaded.into_iter().flatten().collect();
        outcome.images_uploaded += uploaded.len();
        manifest.images.extend(uploaded);

        let mut stamped = bundle.clone();
        stamped.schema_version = SchemaVersion::CURRENT;
        let path = self.engine.layout().note_path(bundle.id())?;
        self.engine.write_file(&path, encode_note(&stamped)?).await?;
        outcome.uploaded += 1;
        info!("Uploaded note {}", bundle.id());

        if let Some(previous) = previous {
            let keep: HashSet<&str> = bundle.image_filenames().collect();
            for dropped in previous.image_filenames().filter(|name| !keep.contains(name)) {
                if self.delete_remote_image(dropped, manifest).await? {
                    outcome.images_removed += 1;
                }
            }
        }
        Ok(())
    }

    /// Upload one local image. `None` if there is no local file to send.
    async fn upload_image(&self, image: &ImageRef) -> Result<Option<String>> {
        if !self.images.contains(&image.filename).await? {
            warn!("Image {} is missing locally, not uploading it", image.filename);
            return Ok(None);
        }
        let data = self.images.read(&image.filename).await?;
        let path = self.engine.layout().image_path(&image.filename)?;
        self.engine.write_file(&path, data).await?;
        debug!("Uploaded image {}", image.filename);
        Ok(Some(image.filename.clone()))
    }

    /// Replace the local bundle with the remote one.
    async fn pull(
        &self,
        mut remote: NoteBundle,
        local: Option<&NoteBundle>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        remote.note.origin = local.map_or(NoteOrigin::Remote, |l| l.note.origin);
        remote.schema_version = SchemaVersion::CURRENT;

        outcome.images_downloaded += self.download_missing_images(&remote).await?;
        self.notes.upsert_note(&remote).await?;
        outcome.downloaded += 1;
        info!("Pulled note {}", remote.id());

        if let Some(local) = local {
            let keep: HashSet<&str> = remote.image_filenames().collect();
            for dropped in local.image_filenames().filter(|name| !keep.contains(name)) {
                debug!("Removing local image {} dropped by note {}", dropped, remote.id());
                self.images.remove(dropped).await?;
            }
        }
        Ok(())
    }

    /// Bring in a note that exists only on the remote.
    async fn materialize(&self, id: NoteId, outcome: &mut SyncOutcome) -> Result<()> {
        let Some(remote) = self.read_remote(id).await? else {
            return Ok(());
        };
        if !remote.schema_version.is_compatible() {
            warn!(
                "Remote-only note {} has schema {}, not importing it",
                id, remote.schema_version.0
            );
            outcome.skipped.push(id);
            return Ok(());
        }
        self.pull(remote, None, outcome).await
    }

    /// Download images of `bundle` that the local cache lacks.
    async fn download_missing_images(&self, bundle: &NoteBundle) -> Result<usize> {
        let mut missing = Vec::new();
        for image in &bundle.images {
            if !self.images.contains(&image.filename).await? {
                missing.push(image.clone());
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        let fetched: Vec<bool> = stream::iter(missing)
            .map(|image| async move { self.download_image(&image).await })
            .buffer_unordered(self.engine.config().image_concurrency)
            .try_collect()
            .await?;
        Ok(fetched.into_iter().filter(|done| *done).count())
    }

    async fn download_image(&self, image: &ImageRef) -> Result<bool> {
        let path = self.engine.layout().image_path(&image.filename)?;
        match self.engine.read_file(&path).await {
            Ok(data) => {
                self.images.write(&image.filename, data).await?;
                debug!("Downloaded image {}", image.filename);
                Ok(true)
            }
            Err(err) if err.is_not_found() => {
                warn!("Image {} is referenced but missing on the remote", image.filename);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
