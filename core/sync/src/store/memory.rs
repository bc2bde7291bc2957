//! In-memory stores for tests and ephemeral hosts.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use notesync_common::{ChecklistItem, Error, ImageRef, NoteBundle, NoteId, Result};

use super::{ImageStore, NoteStore};

#[derive(Debug, Default)]
struct Notes {
    bundles: BTreeMap<NoteId, NoteBundle>,
    tombstones: BTreeSet<NoteId>,
}

/// Note repository kept in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryNoteStore {
    state: Arc<RwLock<Notes>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a bundle without counting it as a sync write.
    pub fn insert(&self, bundle: NoteBundle) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .bundles
            .insert(bundle.id(), bundle);
    }

    pub fn get(&self, id: NoteId) -> Option<NoteBundle> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .bundles
            .get(&id)
            .cloned()
    }

    /// Delete a note for good and leave a tombstone behind.
    pub fn purge(&self, id: NoteId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.bundles.remove(&id);
        state.tombstones.insert(id);
    }

    pub fn has_tombstone(&self, id: NoteId) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tombstones
            .contains(&id)
    }

    /// Number of mutations made through the [`NoteStore`] trait.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn with_existing<F>(&self, id: NoteId, f: F) -> Result<()>
    where
        F: FnOnce(&mut NoteBundle),
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let bundle = state
            .bundles
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Note {} not found", id)))?;
        f(bundle);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn list_all_bundles(&self) -> Result<Vec<NoteBundle>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.bundles.values().cloned().collect())
    }

    async fn list_tombstone_ids(&self) -> Result<Vec<NoteId>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.tombstones.iter().copied().collect())
    }

    async fn upsert_note(&self, bundle: &NoteBundle) -> Result<()> {
        self.insert(bundle.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_checklist_items(
        &self,
        note_id: NoteId,
        items: Vec<ChecklistItem>,
    ) -> Result<()> {
        self.with_existing(note_id, |bundle| bundle.checklist = items)
    }

    async fn replace_images(&self, note_id: NoteId, images: Vec<ImageRef>) -> Result<()> {
        self.with_existing(note_id, |bundle| bundle.images = images)
    }

    async fn clear_tombstone(&self, note_id: NoteId) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.tombstones.remove(&note_id) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Image cache kept in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryImageStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored images, sorted.
    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn contains(&self, filename: &str) -> Result<bool> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(filename))
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(filename)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Image {} not found", filename)))
    }

    async fn write(&self, filename: &str, data: Vec<u8>) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(filename.to_string(), data);
        Ok(())
    }

    async fn remove(&self, filename: &str) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(filename);
        Ok(())
    }
}
