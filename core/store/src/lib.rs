//! Notesync on-device store
//!
//! SQLite implementation of [`notesync_sync::NoteStore`]. Notes, checklist
//! items, images and deletion tombstones live in one database file.

mod schema;
mod sqlite;

pub use sqlite::SqliteNoteStore;
