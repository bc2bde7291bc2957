//! Local side of a sync: the note repository and the image file cache.
//!
//! The reconciler only talks to these traits. Implementations must make
//! [`NoteStore::upsert_note`] atomic: a note and its children become visible
//! together or not at all.

mod fs;
mod memory;

pub use fs::DirImageStore;
pub use memory::{MemoryImageStore, MemoryNoteStore};

use async_trait::async_trait;

use notesync_common::{ChecklistItem, ImageRef, NoteBundle, NoteId, Result};

/// Repository of note bundles and deletion tombstones.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Every stored bundle, including soft-deleted ones.
    async fn list_all_bundles(&self) -> Result<Vec<NoteBundle>>;

    /// Ids of purged notes whose deletion has not reached the remote yet.
    async fn list_tombstone_ids(&self) -> Result<Vec<NoteId>>;

    /// Insert or replace a note together with its checklist items and images.
    async fn upsert_note(&self, bundle: &NoteBundle) -> Result<()>;

    /// Replace the checklist of an existing note.
    ///
    /// # Errors
    /// - `NotFound` if the note does not exist
    async fn replace_checklist_items(&self, note_id: NoteId, items: Vec<ChecklistItem>)
        -> Result<()>;

    /// Replace the image list of an existing note.
    ///
    /// # Errors
    /// - `NotFound` if the note does not exist
    async fn replace_images(&self, note_id: NoteId, images: Vec<ImageRef>) -> Result<()>;

    /// Forget a tombstone once the remote copy is gone. Missing ids are ignored.
    async fn clear_tombstone(&self, note_id: NoteId) -> Result<()>;
}

/// Local image files, addressed by their unique file name.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn contains(&self, filename: &str) -> Result<bool>;

    /// # Errors
    /// - `NotFound` if no such image is stored
    async fn read(&self, filename: &str) -> Result<Vec<u8>>;

    /// Store an image, replacing any previous content.
    async fn write(&self, filename: &str, data: Vec<u8>) -> Result<()>;

    /// Remove an image. Removing a missing image succeeds.
    async fn remove(&self, filename: &str) -> Result<()>;
}
