//! Conflict detection and resolution.
//!
//! Notes are compared as a whole by their `updated` timestamp; the newer side
//! replaces the older one. There is no field-level merge.

use serde::{Deserialize, Serialize};

use notesync_common::{NoteBundle, SchemaVersion};

/// What a pass should do with a note present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Local is newer: overwrite the remote file.
    PushLocal,
    /// Remote is newer: replace the local bundle.
    PullRemote,
    /// Same timestamp: nothing to transfer.
    InSync,
}

/// Last writer wins on `updated`; ties write nothing.
pub fn last_writer_wins(local_updated: i64, remote_updated: i64) -> Resolution {
    match local_updated.cmp(&remote_updated) {
        std::cmp::Ordering::Greater => Resolution::PushLocal,
        std::cmp::Ordering::Less => Resolution::PullRemote,
        std::cmp::Ordering::Equal => Resolution::InSync,
    }
}

/// Outcome of comparing a local bundle with its remote copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Apply(Resolution),
    /// The remote copy was written by a newer schema and must not be touched.
    Skip { remote_schema: SchemaVersion },
}

/// Decide between two copies of the same note.
///
/// A remote copy from a newer schema is left alone in both directions:
/// pulling would drop fields, pushing would erase them.
pub fn resolve(local: &NoteBundle, remote: &NoteBundle) -> Decision {
    if !remote.schema_version.is_compatible() {
        return Decision::Skip {
            remote_schema: remote.schema_version,
        };
    }
    Decision::Apply(last_writer_wins(local.updated(), remote.updated()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_common::{Note, NoteId, NoteType};
    use proptest::prelude::*;

    fn bundle(updated: i64) -> NoteBundle {
        let mut note = Note::new(NoteId::new(1), NoteType::Text);
        note.updated = updated;
        NoteBundle::new(note, Vec::new(), Vec::new())
    }

    #[test]
    fn test_newer_side_wins() {
        assert_eq!(last_writer_wins(200, 100), Resolution::PushLocal);
        assert_eq!(last_writer_wins(100, 200), Resolution::PullRemote);
        assert_eq!(last_writer_wins(100, 100), Resolution::InSync);
    }

    #[test]
    fn test_newer_schema_is_skipped() {
        let local = bundle(100);
        let mut remote = bundle(50);
        remote.schema_version = SchemaVersion(SchemaVersion::CURRENT.0 + 1);
        assert_eq!(
            resolve(&local, &remote),
            Decision::Skip {
                remote_schema: remote.schema_version
            }
        );
    }

    #[test]
    fn test_legacy_schema_merges() {
        let local = bundle(100);
        let mut remote = bundle(200);
        remote.schema_version = SchemaVersion::LEGACY;
        assert_eq!(
            resolve(&local, &remote),
            Decision::Apply(Resolution::PullRemote)
        );
    }

    proptest! {
        #[test]
        fn prop_resolution_is_antisymmetric(a in any::<i64>(), b in any::<i64>()) {
            let forward = last_writer_wins(a, b);
            let backward = last_writer_wins(b, a);
            let expected = match forward {
                Resolution::PushLocal => Resolution::PullRemote,
                Resolution::PullRemote => Resolution::PushLocal,
                Resolution::InSync => Resolution::InSync,
            };
            prop_assert_eq!(backward, expected);
        }
    }
}
