//! Remote directory layout.
//!
//! ```text
//! <base>/notes/<id>.json
//! <base>/images/<filename>
//! ```

use notesync_common::{NoteId, RemotePath, Result};

const NOTES_DIR: &str = "notes";
const IMAGES_DIR: &str = "images";
const NOTE_SUFFIX: &str = ".json";

/// Resolved paths under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    base: RemotePath,
    notes: RemotePath,
    images: RemotePath,
}

impl RemoteLayout {
    pub fn new(base: RemotePath) -> Result<Self> {
        let notes = base.join(NOTES_DIR)?;
        let images = base.join(IMAGES_DIR)?;
        Ok(Self { base, notes, images })
    }

    pub fn base_dir(&self) -> &RemotePath {
        &self.base
    }

    pub fn notes_dir(&self) -> &RemotePath {
        &self.notes
    }

    pub fn images_dir(&self) -> &RemotePath {
        &self.images
    }

    /// Directories that must exist before anything is written, parents first.
    pub fn directories(&self) -> [&RemotePath; 3] {
        [&self.base, &self.notes, &self.images]
    }

    pub fn note_path(&self, id: NoteId) -> Result<RemotePath> {
        self.notes.join(&note_file_name(id))
    }

    pub fn image_path(&self, filename: &str) -> Result<RemotePath> {
        self.images.join(filename)
    }
}

/// File name of a note's metadata file.
pub fn note_file_name(id: NoteId) -> String {
    format!("{}{}", id, NOTE_SUFFIX)
}

/// Parse a metadata file name back into a note id.
///
/// Anything that is not `<integer>.json` is ignored by the caller.
pub fn parse_note_file_name(name: &str) -> Option<NoteId> {
    name.strip_suffix(NOTE_SUFFIX)?
        .parse::<i64>()
        .ok()
        .map(NoteId::new)
}
