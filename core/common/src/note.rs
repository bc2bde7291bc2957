//! Canonical note data model.
//!
//! These are the only in-memory representations of notes. Local stores and
//! the remote wire format convert to and from these types at their boundary.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Offset added to a checked item's position so it sorts after all unchecked items.
pub const CHECKED_SORT_OFFSET: i64 = 1 << 40;

/// Stable identifier of a note, shared by every device that syncs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(i64);

impl NoteId {
    /// Wrap an existing identifier.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Generate a fresh, collision-resistant positive identifier.
    pub fn generate() -> Self {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        Self((high & i64::MAX as u64) as i64)
    }

    /// Get the raw value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Revision of the local schema that produced a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    /// Schema revision written by this build.
    pub const CURRENT: Self = Self(3);

    /// Revision assumed for files that carry no stamp.
    pub const LEGACY: Self = Self(1);

    /// Whether a bundle stamped with this version can be merged without
    /// dropping fields this build does not know about.
    pub fn is_compatible(&self) -> bool {
        *self <= Self::CURRENT
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Kind of note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteType {
    #[default]
    Text,
    Checklist,
}

/// Color tag of a note. Unknown tags from newer clients fall back to `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteColor {
    Red,
    Orange,
    Yellow,
    Green,
    Teal,
    Blue,
    Purple,
    Pink,
    Brown,
    Gray,
    #[default]
    #[serde(other)]
    Default,
}

/// Where a local note was first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteOrigin {
    /// Created on this device.
    #[default]
    Local,
    /// Materialized from a remote file.
    Remote,
}

/// The note row itself, without children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub text: String,
    pub note_type: NoteType,
    pub show_checked: bool,
    pub color: NoteColor,
    /// Ordering rank among notes.
    pub position: i64,
    pub archived: bool,
    /// Soft-deleted (in the trash) but not yet purged.
    pub deleted: bool,
    /// Creation time, epoch seconds.
    pub created: i64,
    /// Last modification time, epoch seconds.
    pub updated: i64,
    pub origin: NoteOrigin,
}

impl Note {
    /// Create an empty local note stamped with the current time.
    pub fn new(id: NoteId, note_type: NoteType) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id,
            title: String::new(),
            text: String::new(),
            note_type,
            show_checked: true,
            color: NoteColor::Default,
            position: 0,
            archived: false,
            deleted: false,
            created: now,
            updated: now,
            origin: NoteOrigin::Local,
        }
    }

    /// Advance `updated` after a local mutation.
    ///
    /// Never goes backwards and always moves at least one second, so two
    /// edits within the same second still order correctly.
    pub fn touch(&mut self) {
        let now = Utc::now().timestamp();
        self.updated = now.max(self.updated.saturating_add(1));
    }
}

/// One line of a checklist note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: i64,
    pub note_id: NoteId,
    pub text: String,
    pub checked: bool,
    pub position: i64,
}

impl ChecklistItem {
    /// Display ordering key: checked items sink below unchecked ones while
    /// keeping their relative order.
    pub fn sort_key(&self) -> i64 {
        if self.checked {
            self.position.saturating_add(CHECKED_SORT_OFFSET)
        } else {
            self.position
        }
    }
}

/// An image attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Stored file name, unique across all notes.
    pub filename: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Size in bytes.
    pub size: u64,
    pub position: i64,
}

/// A note with its checklist items and images: the unit of sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteBundle {
    pub note: Note,
    pub checklist: Vec<ChecklistItem>,
    pub images: Vec<ImageRef>,
    pub schema_version: SchemaVersion,
}

impl NoteBundle {
    /// Bundle a note with its children under the current schema.
    pub fn new(note: Note, checklist: Vec<ChecklistItem>, images: Vec<ImageRef>) -> Self {
        Self {
            note,
            checklist,
            images,
            schema_version: SchemaVersion::CURRENT,
        }
    }

    /// Identifier of the note.
    pub fn id(&self) -> NoteId {
        self.note.id
    }

    /// Last modification time, epoch seconds.
    pub fn updated(&self) -> i64 {
        self.note.updated
    }

    /// Checklist items in display order.
    pub fn sorted_checklist(&self) -> Vec<&ChecklistItem> {
        let mut items: Vec<&ChecklistItem> = self.checklist.iter().collect();
        items.sort_by_key(|item| (item.sort_key(), item.id));
        items
    }

    /// File names of all attached images.
    pub fn image_filenames(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.filename.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(id: i64, position: i64, checked: bool) -> ChecklistItem {
        ChecklistItem {
            id,
            note_id: NoteId::new(1),
            text: format!("item {}", id),
            checked,
            position,
        }
    }

    #[test]
    fn test_checked_items_sort_last() {
        let note = Note::new(NoteId::new(1), NoteType::Checklist);
        let bundle = NoteBundle::new(
            note,
            vec![item(1, 0, true), item(2, 5, false), item(3, 1, false)],
            vec![],
        );

        let order: Vec<i64> = bundle.sorted_checklist().iter().map(|i| i.id).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut note = Note::new(NoteId::new(7), NoteType::Text);
        note.updated = i64::MAX / 2;
        let before = note.updated;
        note.touch();
        assert_eq!(note.updated, before + 1);
    }

    #[test]
    fn test_touch_saturates_at_max() {
        let mut note = Note::new(NoteId::new(7), NoteType::Text);
        note.updated = i64::MAX;
        note.touch();
        assert_eq!(note.updated, i64::MAX);
    }

    #[test]
    fn test_generated_ids_are_positive() {
        for _ in 0..32 {
            assert!(NoteId::generate().get() >= 0);
        }
    }

    #[test]
    fn test_unknown_color_falls_back() {
        let color: NoteColor = serde_json::from_str("\"NEON\"").unwrap();
        assert_eq!(color, NoteColor::Default);
        let color: NoteColor = serde_json::from_str("\"TEAL\"").unwrap();
        assert_eq!(color, NoteColor::Teal);
    }

    #[test]
    fn test_schema_compatibility() {
        assert!(SchemaVersion::LEGACY.is_compatible());
        assert!(SchemaVersion::CURRENT.is_compatible());
        assert!(!SchemaVersion(SchemaVersion::CURRENT.0 + 1).is_compatible());
    }

    proptest! {
        #[test]
        fn prop_unchecked_before_checked(
            positions in proptest::collection::vec((0i64..10_000, any::<bool>()), 1..40)
        ) {
            let items: Vec<ChecklistItem> = positions
                .iter()
                .enumerate()
                .map(|(i, (pos, checked))| item(i as i64, *pos, *checked))
                .collect();
            let bundle = NoteBundle::new(Note::new(NoteId::new(1), NoteType::Checklist), items, vec![]);
            let sorted = bundle.sorted_checklist();
            let first_checked = sorted.iter().position(|i| i.checked).unwrap_or(sorted.len());
            prop_assert!(sorted[first_checked..].iter().all(|i| i.checked));
        }
    }
}
