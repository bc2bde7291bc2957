//! SQLite-backed note repository.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use notesync_common::{
    ChecklistItem, Error, ImageRef, Note, NoteBundle, NoteId, Result, SchemaVersion,
};
use notesync_sync::NoteStore;

use crate::schema;

const NOTE_COLUMNS: &str = "id, title, text, note_type, show_checked, color, position, \
                            archived, deleted, created, updated, origin, schema_version";

pub(crate) fn db_error(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Note repository in a single SQLite file.
///
/// Queries run on the blocking pool; clones share one connection.
#[derive(Clone)]
pub struct SqliteNoteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNoteStore {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_error)?;
        let store = Self::with_connection(conn)?;
        info!("Opened note database at {}", path.display());
        Ok(store)
    }

    /// Database that lives only as long as the store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("Database task failed: {}", e)))?
    }

    /// Load one bundle.
    pub async fn get_bundle(&self, id: NoteId) -> Result<Option<NoteBundle>> {
        self.run(move |conn| Ok(load_bundles(conn, Some(id))?.into_iter().next()))
            .await
    }

    /// Move a note to the trash. The note keeps syncing as deleted.
    ///
    /// # Errors
    /// - `NotFound` if the note does not exist
    pub async fn trash_note(&self, id: NoteId) -> Result<()> {
        self.set_deleted(id, true).await
    }

    /// Take a note back out of the trash.
    ///
    /// # Errors
    /// - `NotFound` if the note does not exist
    pub async fn restore_note(&self, id: NoteId) -> Result<()> {
        self.set_deleted(id, false).await
    }

    async fn set_deleted(&self, id: NoteId, deleted: bool) -> Result<()> {
        let now = Utc::now().timestamp();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE notes SET deleted = ?2, updated = MAX(updated + 1, ?3) WHERE id = ?1",
                    params![id.get(), deleted, now],
                )
                .map_err(db_error)?;
            if changed == 0 {
                return Err(Error::NotFound(format!("Note {} not found", id)));
            }
            debug!("Note {} deleted flag set to {}", id, deleted);
            Ok(())
        })
        .await
    }

    /// Delete a note with its children and record a tombstone, atomically.
    ///
    /// Returns the file names of the images the note owned so the caller can
    /// drop them from the local cache.
    ///
    /// # Errors
    /// - `NotFound` if the note does not exist
    pub async fn purge_note(&self, id: NoteId) -> Result<Vec<String>> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_error)?;
            let filenames = {
                let mut stmt = tx
                    .prepare("SELECT filename FROM images WHERE note_id = ?1 ORDER BY filename")
                    .map_err(db_error)?;
                let rows = stmt
                    .query_map(params![id.get()], |row| row.get::<_, String>(0))
                    .map_err(db_error)?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(db_error)?
            };

            let removed = tx
                .execute("DELETE FROM notes WHERE id = ?1", params![id.get()])
                .map_err(db_error)?;
            if removed == 0 {
                return Err(Error::NotFound(format!("Note {} not found", id)));
            }
            tx.execute(
                "INSERT OR IGNORE INTO deleted_notes (id) VALUES (?1)",
                params![id.get()],
            )
            .map_err(db_error)?;
            tx.commit().map_err(db_error)?;

            info!("Purged note {} ({} images)", id, filenames.len());
            Ok(filenames)
        })
        .await
    }
}

#[async_trait]
impl NoteStore for SqliteNoteStore {
    async fn list_all_bundles(&self) -> Result<Vec<NoteBundle>> {
        self.run(|conn| load_bundles(conn, None)).await
    }

    async fn list_tombstone_ids(&self) -> Result<Vec<NoteId>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM deleted_notes ORDER BY id")
                .map_err(db_error)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, i64>(0))
                .map_err(db_error)?;
            let ids = rows
                .collect::<rusqlite::Result<Vec<i64>>>()
                .map_err(db_error)?;
            Ok(ids.into_iter().map(NoteId::new).collect())
        })
        .await
    }

    async fn upsert_note(&self, bundle: &NoteBundle) -> Result<()> {
        let bundle = bundle.clone();
        self.run(move |conn| {
            let id = bundle.id();
            let tx = conn.transaction().map_err(db_error)?;
            write_note(&tx, &bundle)?;
            write_checklist(&tx, id, &bundle.checklist)?;
            write_images(&tx, id, &bundle.images)?;
            tx.commit().map_err(db_error)?;
            debug!("Stored note {} (updated {})", id, bundle.updated());
            Ok(())
        })
        .await
    }

    async fn replace_checklist_items(
        &self,
        note_id: NoteId,
        items: Vec<ChecklistItem>,
    ) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_error)?;
            require_note(&tx, note_id)?;
            write_checklist(&tx, note_id, &items)?;
            tx.commit().map_err(db_error)
        })
        .await
    }

    async fn replace_images(&self, note_id: NoteId, images: Vec<ImageRef>) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_error)?;
            require_note(&tx, note_id)?;
            write_images(&tx, note_id, &images)?;
            tx.commit().map_err(db_error)
        })
        .await
    }

    async fn clear_tombstone(&self, note_id: NoteId) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM deleted_notes WHERE id = ?1",
                params![note_id.get()],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }
}

fn to_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(Error::Serialization(format!(
            "Expected a string tag, got {}",
            other
        ))),
    }
}

fn from_text<T: DeserializeOwned>(text: String) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(text))?)
}

fn require_note(conn: &Connection, id: NoteId) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ?1)",
            params![id.get()],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    if exists {
        Ok(())
    } else {
        Err(Error::NotFound(format!("Note {} not found", id)))
    }
}

fn write_note(conn: &Connection, bundle: &NoteBundle) -> Result<()> {
    let note = &bundle.note;
    conn.execute(
        &format!(
            "INSERT INTO notes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                text = excluded.text,
                note_type = excluded.note_type,
                show_checked = excluded.show_checked,
                color = excluded.color,
                position = excluded.position,
                archived = excluded.archived,
                deleted = excluded.deleted,
                created = excluded.created,
                updated = excluded.updated,
                origin = excluded.origin,
                schema_version = excluded.schema_version",
            NOTE_COLUMNS
        ),
        params![
            note.id.get(),
            note.title,
            note.text,
            to_text(&note.note_type)?,
            note.show_checked,
            to_text(&note.color)?,
            note.position,
            note.archived,
            note.deleted,
            note.created,
            note.updated,
            to_text(&note.origin)?,
            bundle.schema_version.0,
        ],
    )
    .map_err(db_error)?;
    Ok(())
}

fn write_checklist(conn: &Connection, note_id: NoteId, items: &[ChecklistItem]) -> Result<()> {
    conn.execute(
        "DELETE FROM checklist_items WHERE note_id = ?1",
        params![note_id.get()],
    )
    .map_err(db_error)?;
    let mut stmt = conn
        .prepare(
            "INSERT INTO checklist_items (note_id, id, text, checked, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(db_error)?;
    for item in items {
        stmt.execute(params![
            note_id.get(),
            item.id,
            item.text,
            item.checked,
            item.position
        ])
        .map_err(db_error)?;
    }
    Ok(())
}

fn write_images(conn: &Connection, note_id: NoteId, images: &[ImageRef]) -> Result<()> {
    conn.execute("DELETE FROM images WHERE note_id = ?1", params![note_id.get()])
        .map_err(db_error)?;
    // File names are unique across notes; an image moved between notes changes owner.
    let mut stmt = conn
        .prepare(
            "INSERT INTO images (filename, note_id, mime_type, width, height, size, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(filename) DO UPDATE SET
                note_id = excluded.note_id,
                mime_type = excluded.mime_type,
                width = excluded.width,
                height = excluded.height,
                size = excluded.size,
                position = excluded.position",
        )
        .map_err(db_error)?;
    for image in images {
        let size = i64::try_from(image.size).map_err(|_| {
            Error::InvalidInput(format!("Image {} is too large", image.filename))
        })?;
        stmt.execute(params![
            image.filename,
            note_id.get(),
            image.mime_type,
            image.width,
            image.height,
            size,
            image.position
        ])
        .map_err(db_error)?;
    }
    Ok(())
}

struct NoteRow {
    id: i64,
    title: String,
    text: String,
    note_type: String,
    show_checked: bool,
    color: String,
    position: i64,
    archived: bool,
    deleted: bool,
    created: i64,
    updated: i64,
    origin: String,
    schema_version: u32,
}

impl NoteRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            text: row.get(2)?,
            note_type: row.get(3)?,
            show_checked: row.get(4)?,
            color: row.get(5)?,
            position: row.get(6)?,
            archived: row.get(7)?,
            deleted: row.get(8)?,
            created: row.get(9)?,
            updated: row.get(10)?,
            origin: row.get(11)?,
            schema_version: row.get(12)?,
        })
    }

    fn into_bundle(
        self,
        checklist: Vec<ChecklistItem>,
        images: Vec<ImageRef>,
    ) -> Result<NoteBundle> {
        let note = Note {
            id: NoteId::new(self.id),
            title: self.title,
            text: self.text,
            note_type: from_text(self.note_type)?,
            show_checked: self.show_checked,
            color: from_text(self.color)?,
            position: self.position,
            archived: self.archived,
            deleted: self.deleted,
            created: self.created,
            updated: self.updated,
            origin: from_text(self.origin)?,
        };
        let mut bundle = NoteBundle::new(note, checklist, images);
        bundle.schema_version = SchemaVersion(self.schema_version);
        Ok(bundle)
    }
}

/// Load every bundle, or only `only` when given.
fn load_bundles(conn: &Connection, only: Option<NoteId>) -> Result<Vec<NoteBundle>> {
    let only = only.map(NoteId::get);

    let mut checklists: HashMap<i64, Vec<ChecklistItem>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT note_id, id, text, checked, position FROM checklist_items
                 WHERE (?1 IS NULL OR note_id = ?1) ORDER BY note_id, position, id",
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map(params![only], |row| {
                Ok(ChecklistItem {
                    note_id: NoteId::new(row.get(0)?),
                    id: row.get(1)?,
                    text: row.get(2)?,
                    checked: row.get(3)?,
                    position: row.get(4)?,
                })
            })
            .map_err(db_error)?;
        for item in rows {
            let item = item.map_err(db_error)?;
            checklists.entry(item.note_id.get()).or_default().push(item);
        }
    }

    let mut images: HashMap<i64, Vec<ImageRef>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT note_id, filename, mime_type, width, height, size, position FROM images
                 WHERE (?1 IS NULL OR note_id = ?1) ORDER BY note_id, position, filename",
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map(params![only], |row| {
                let size: i64 = row.get(5)?;
                let image = ImageRef {
                    filename: row.get(1)?,
                    mime_type: row.get(2)?,
                    width: row.get(3)?,
                    height: row.get(4)?,
                    size: u64::try_from(size)
                        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, size))?,
                    position: row.get(6)?,
                };
                Ok((row.get::<_, i64>(0)?, image))
            })
            .map_err(db_error)?;
        for row in rows {
            let (note_id, image) = row.map_err(db_error)?;
            images.entry(note_id).or_default().push(image);
        }
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM notes WHERE (?1 IS NULL OR id = ?1) ORDER BY position, id",
            NOTE_COLUMNS
        ))
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![only], NoteRow::read)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<NoteRow>>>()
        .map_err(db_error)?;

    rows.into_iter()
        .map(|row| {
            let checklist = checklists.remove(&row.id).unwrap_or_default();
            let images = images.remove(&row.id).unwrap_or_default();
            row.into_bundle(checklist, images)
        })
        .collect()
}
