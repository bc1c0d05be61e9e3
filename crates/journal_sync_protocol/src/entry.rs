//! The journal entry and its projections.

use crate::fingerprint::{entry_hash, Fingerprinted};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters of content carried by an [`EntryPreview`].
pub const PREVIEW_CHARS: usize = 30;

/// A journal entry, the canonical unit of replication.
///
/// `hash` is advisory: it is whatever the last writer supplied and is
/// never re-verified against `content` by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Entry identifier (UUIDv4, immutable).
    pub id: Uuid,
    /// Opaque text body.
    pub content: String,
    /// Creation instant (immutable).
    pub creation_date: DateTime<Utc>,
    /// Last modification instant.
    pub last_updated: DateTime<Utc>,
    /// Content fingerprint, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Unordered tag set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Entry {
    /// Creates a fresh entry with a random id, both timestamps set to `now`
    /// and the canonical hash computed from content and tags.
    pub fn new(content: impl Into<String>, tags: Option<Vec<String>>, now: DateTime<Utc>) -> Self {
        let content = content.into();
        let hash = entry_hash(&content, tags.as_deref());
        Self {
            id: Uuid::new_v4(),
            content,
            creation_date: now,
            last_updated: now,
            hash: Some(hash),
            tags,
        }
    }

    /// Computes the canonical hash of this entry's current content and tags.
    pub fn compute_hash(&self) -> String {
        entry_hash(&self.content, self.tags.as_deref())
    }

    /// Projects the entry to its manifest form.
    pub fn manifest(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.id,
            hash: self.hash.clone(),
            last_updated: self.last_updated,
        }
    }

    /// Projects the entry to a listing preview.
    pub fn preview(&self) -> EntryPreview {
        EntryPreview {
            id: self.id,
            creation_date: self.creation_date,
            last_updated: self.last_updated,
            preview: self.content.chars().take(PREVIEW_CHARS).collect(),
            tags: self.tags.clone(),
        }
    }
}

impl Fingerprinted for Entry {
    fn id(&self) -> Uuid {
        self.id
    }

    fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

/// The minimum needed to decide divergence without transferring bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Content fingerprint, if the stored document carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Last modification instant.
    pub last_updated: DateTime<Utc>,
}

impl Fingerprinted for ManifestEntry {
    fn id(&self) -> Uuid {
        self.id
    }

    fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

/// A short listing view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPreview {
    /// Entry identifier.
    pub id: Uuid,
    /// Creation instant.
    pub creation_date: DateTime<Utc>,
    /// Last modification instant.
    pub last_updated: DateTime<Utc>,
    /// The first [`PREVIEW_CHARS`] characters of content.
    pub preview: String,
    /// Tags, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
    }

    #[test]
    fn new_entry_is_hashed() {
        let entry = Entry::new("hello", None, at(0));
        assert_eq!(entry.hash.as_deref(), Some(entry_hash("hello", None).as_str()));
        assert_eq!(entry.creation_date, entry.last_updated);
        assert_eq!(entry.id.get_version_num(), 4);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let mut entry = Entry::new("body", Some(vec!["work".into()]), at(0));
        entry.id = Uuid::nil();
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["creationDate"], "2024-01-01T00:00:00Z");
        assert_eq!(json["lastUpdated"], "2024-01-01T00:00:00Z");
        assert_eq!(json["tags"][0], "work");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let mut entry = Entry::new("body", None, at(0));
        entry.hash = None;
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("tags"));
    }

    #[test]
    fn accepts_millisecond_timestamps() {
        let json = r#"{
            "id": "7d9f6a52-3c1e-4c4b-9f0e-2b1d8c6a4e10",
            "content": "x",
            "creationDate": "2024-01-01T00:00:00.000Z",
            "lastUpdated": "2024-01-01T00:00:05.250Z"
        }"#;
        let entry: Entry = serde_json::from_str(json).unwrap();
        assert!(entry.last_updated > entry.creation_date);
        assert!(entry.hash.is_none());
    }

    #[test]
    fn preview_truncates_by_chars() {
        let entry = Entry::new("é".repeat(40), None, at(0));
        let preview = entry.preview();
        assert_eq!(preview.preview.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn manifest_projection() {
        let entry = Entry::new("body", None, at(3));
        let manifest = entry.manifest();
        assert_eq!(manifest.id, entry.id);
        assert_eq!(manifest.hash, entry.hash);
        assert_eq!(manifest.last_updated, at(3));
    }
}
