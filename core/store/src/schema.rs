use rusqlite::Connection;
use tracing::info;

use notesync_common::{Error, Result};

use crate::sqlite::db_error;

/// Layout revision stored in `PRAGMA user_version`.
pub(crate) const DB_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    text TEXT NOT NULL,
    note_type TEXT NOT NULL,
    show_checked INTEGER NOT NULL DEFAULT 1,
    color TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    created INTEGER NOT NULL,
    updated INTEGER NOT NULL,
    origin TEXT NOT NULL,
    schema_version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checklist_items (
    note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
    id INTEGER NOT NULL,
    text TEXT NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL,
    PRIMARY KEY (note_id, id)
);

CREATE TABLE IF NOT EXISTS images (
    filename TEXT PRIMARY KEY,
    note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
    mime_type TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    size INTEGER NOT NULL,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS deleted_notes (
    id INTEGER PRIMARY KEY
);

CREATE INDEX IF NOT EXISTS idx_images_note ON images(note_id);
CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated);
";

/// Create missing tables and stamp the layout revision.
///
/// # Errors
/// - `Incompatible` if the file was written by a newer layout
pub(crate) fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(db_error)?;

    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_error)?;
    if version > DB_VERSION {
        return Err(Error::Incompatible(format!(
            "Database layout {} is newer than supported layout {}",
            version, DB_VERSION
        )));
    }

    conn.execute_batch(SCHEMA).map_err(db_error)?;
    if version < DB_VERSION {
        conn.pragma_update(None, "user_version", DB_VERSION)
            .map_err(db_error)?;
        info!("Initialized note database layout {}", DB_VERSION);
    }
    Ok(())
}
