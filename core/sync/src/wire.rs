//! JSON format of the per-note metadata file.
//!
//! The wire types are only used at the remote boundary; everything else works
//! on [`NoteBundle`].

use serde::{Deserialize, Serialize};

use notesync_common::{
    ChecklistItem, ImageRef, Note, NoteBundle, NoteColor, NoteId, NoteOrigin, NoteType, Result,
    SchemaVersion,
};

fn default_true() -> bool {
    true
}

fn legacy_schema() -> SchemaVersion {
    SchemaVersion::LEGACY
}

/// One checklist line as stored remotely (the parent id is implicit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChecklistItem {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireImage {
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub position: i64,
}

/// A note metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNote {
    pub id: NoteId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created: i64,
    pub updated: i64,
    #[serde(default)]
    pub position: i64,
    #[serde(rename = "type", default)]
    pub note_type: NoteType,
    #[serde(default = "default_true")]
    pub show_checked: bool,
    #[serde(default)]
    pub color: NoteColor,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub checklist_items: Vec<WireChecklistItem>,
    #[serde(default)]
    pub images: Vec<WireImage>,
    #[serde(default = "legacy_schema")]
    pub schema_version: SchemaVersion,
}

impl WireNote {
    /// Wire form of a bundle, children in a stable order.
    pub fn from_bundle(bundle: &NoteBundle) -> Self {
        let note = &bundle.note;

        let mut checklist: Vec<&ChecklistItem> = bundle.checklist.iter().collect();
        checklist.sort_by_key(|item| (item.position, item.id));
        let mut images: Vec<&ImageRef> = bundle.images.iter().collect();
        images.sort_by(|a, b| (a.position, &a.filename).cmp(&(b.position, &b.filename)));

        Self {
            id: note.id,
            title: note.title.clone(),
            text: note.text.clone(),
            created: note.created,
            updated: note.updated,
            position: note.position,
            note_type: note.note_type,
            show_checked: note.show_checked,
            color: note.color,
            is_archived: note.archived,
            is_deleted: note.deleted,
            checklist_items: checklist
                .into_iter()
                .map(|item| WireChecklistItem {
                    id: item.id,
                    text: item.text.clone(),
                    checked: item.checked,
                    position: item.position,
                })
                .collect(),
            images: images
                .into_iter()
                .map(|image| WireImage {
                    filename: image.filename.clone(),
                    mime_type: image.mime_type.clone(),
                    width: image.width,
                    height: image.height,
                    size: image.size,
                    position: image.position,
                })
                .collect(),
            schema_version: bundle.schema_version,
        }
    }

    /// Canonical bundle for this file.
    pub fn into_bundle(self, origin: NoteOrigin) -> NoteBundle {
        let id = self.id;
        let note = Note {
            id,
            title: self.title,
            text: self.text,
            note_type: self.note_type,
            show_checked: self.show_checked,
            color: self.color,
            position: self.position,
            archived: self.is_archived,
            deleted: self.is_deleted,
            created: if self.created == 0 { self.updated } else { self.created },
            updated: self.updated,
            origin,
        };
        let checklist = self
            .checklist_items
            .into_iter()
            .map(|item| ChecklistItem {
                id: item.id,
                note_id: id,
                text: item.text,
                checked: item.checked,
                position: item.position,
            })
            .collect();
        let images = self
            .images
            .into_iter()
            .map(|image| ImageRef {
                filename: image.filename,
                mime_type: image.mime_type,
                width: image.width,
                height: image.height,
                size: image.size,
                position: image.position,
            })
            .collect();

        NoteBundle {
            note,
            checklist,
            images,
            schema_version: self.schema_version,
        }
    }
}

/// Serialize a bundle into metadata file bytes.
pub fn encode_note(bundle: &NoteBundle) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&WireNote::from_bundle(bundle))?)
}

/// Parse metadata file bytes into a remote-origin bundle.
pub fn decode_note(bytes: &[u8]) -> Result<NoteBundle> {
    let wire: WireNote = serde_json::from_slice(bytes)?;
    Ok(wire.into_bundle(NoteOrigin::Remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_common::Error;

    fn sample() -> NoteBundle {
        let mut note = Note::new(NoteId::new(12), NoteType::Checklist);
        note.title = "Groceries".to_string();
        note.created = 1_700_000_000;
        note.updated = 1_700_000_500;
        note.color = NoteColor::Green;
        let items = vec![
            ChecklistItem {
                id: 2,
                note_id: note.id,
                text: "eggs".to_string(),
                checked: true,
                position: 1,
            },
            ChecklistItem {
                id: 1,
                note_id: note.id,
                text: "milk".to_string(),
                checked: false,
                position: 0,
            },
        ];
        let images = vec![ImageRef {
            filename: "f00d.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            width: 640,
            height: 480,
            size: 20_000,
            position: 0,
        }];
        NoteBundle::new(note, items, images)
    }

    #[test]
    fn test_field_names() {
        let json: serde_json::Value = serde_json::from_slice(&encode_note(&sample()).unwrap()).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["type"], "CHECKLIST");
        assert_eq!(json["color"], "GREEN");
        assert_eq!(json["showChecked"], true);
        assert_eq!(json["isArchived"], false);
        assert_eq!(json["isDeleted"], false);
        assert_eq!(json["schemaVersion"], SchemaVersion::CURRENT.0);
        assert_eq!(json["checklistItems"][0]["text"], "milk");
        assert_eq!(json["images"][0]["mimeType"], "image/jpeg");
        assert!(json["checklistItems"][0].get("note_id").is_none());
    }

    #[test]
    fn test_decode_restores_parent_ids_and_origin() {
        let bundle = decode_note(&encode_note(&sample()).unwrap()).unwrap();
        assert_eq!(bundle.note.origin, NoteOrigin::Remote);
        assert!(bundle.checklist.iter().all(|i| i.note_id == NoteId::new(12)));
        assert_eq!(bundle.note.updated, 1_700_000_500);
        assert_eq!(bundle.images[0].width, 640);
    }

    #[test]
    fn test_minimal_legacy_file() {
        let bundle = decode_note(br#"{"id": 5, "updated": 100, "title": "old"}"#).unwrap();
        assert_eq!(bundle.schema_version, SchemaVersion::LEGACY);
        assert_eq!(bundle.note.note_type, NoteType::Text);
        assert_eq!(bundle.note.created, 100);
        assert!(bundle.note.show_checked);
        assert!(!bundle.note.deleted);
    }

    #[test]
    fn test_unknown_color_decodes_as_default() {
        let bundle =
            decode_note(br#"{"id": 6, "updated": 100, "color": "MAGENTA"}"#).unwrap();
        assert_eq!(bundle.note.color, NoteColor::Default);

        let json: serde_json::Value =
            serde_json::from_slice(&encode_note(&bundle).unwrap()).unwrap();
        assert_eq!(json["color"], "DEFAULT");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(decode_note(b"not json"), Err(Error::Serialization(_))));
        assert!(matches!(decode_note(br#"{"title":"x"}"#), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut shuffled = sample();
        shuffled.checklist.reverse();
        assert_eq!(encode_note(&sample()).unwrap(), encode_note(&shuffled).unwrap());
    }
}
