//! Common utilities and types shared across the notesync crates.
//!
//! This crate provides the error type, remote path handling, secrets and the
//! canonical note data model that both the sync engine and local stores use.

pub mod error;
pub mod note;
pub mod types;

pub use error::{Error, Result};
pub use note::{
    ChecklistItem, ImageRef, Note, NoteBundle, NoteColor, NoteId, NoteOrigin, NoteType,
    SchemaVersion, CHECKED_SORT_OFFSET,
};
pub use types::{RemotePath, Secret};
