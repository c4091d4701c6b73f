use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// String-keyed chunk metadata. Keys keep their insertion order.
pub type Metadata = serde_json::Map<String, Value>;

pub const SOURCE_KEY: &str = "source";
pub const CHUNK_INDEX_KEY: &str = "chunkIndex";
const LEGACY_CHUNK_INDEX_KEY: &str = "chunk_index";
const UNKNOWN_SOURCE: &str = "Unknown";

/// One stored fragment of a document together with its embedding.
///
/// Serialized shape matches the snapshot file:
/// `{id, groupId, content, embedding, metadata, createdAt}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: String,
    #[serde(alias = "doc_id")]
    pub group_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(alias = "created_at", with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    #[must_use]
    pub fn chunk_id(group_id: &str, index: usize) -> String {
        format!("{group_id}_chunk_{index}")
    }

    /// Position of this chunk inside its source document.
    #[must_use]
    pub fn chunk_index(&self) -> usize {
        self.metadata
            .get(CHUNK_INDEX_KEY)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Renames a legacy `chunk_index` metadata key to `chunkIndex` in place,
    /// or adds `chunkIndex: 0` when neither is present.
    ///
    /// Returns `true` if the metadata changed.
    pub(crate) fn upgrade_legacy_metadata(&mut self) -> bool {
        let has_current = self.metadata.contains_key(CHUNK_INDEX_KEY);
        let has_legacy = self.metadata.contains_key(LEGACY_CHUNK_INDEX_KEY);
        match (has_current, has_legacy) {
            (true, false) => false,
            (false, false) => {
                self.metadata
                    .insert(CHUNK_INDEX_KEY.to_string(), Value::from(0u64));
                true
            }
            (current, true) => {
                let metadata = std::mem::take(&mut self.metadata);
                self.metadata = metadata
                    .into_iter()
                    .filter_map(|(key, value)| match key.as_str() {
                        LEGACY_CHUNK_INDEX_KEY if current => None,
                        LEGACY_CHUNK_INDEX_KEY => Some((CHUNK_INDEX_KEY.to_string(), value)),
                        _ => Some((key, value)),
                    })
                    .collect();
                true
            }
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(Value::as_str)
    }

    pub(crate) fn display_name(&self) -> String {
        self.source().unwrap_or(UNKNOWN_SOURCE).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub group_id: String,
    pub content: String,
    pub metadata: Metadata,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDetail {
    pub index: usize,
    pub content: String,
}

/// A whole document reassembled from its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    pub doc_id: String,
    pub name: String,
    pub chunk_count: usize,
    pub full_content: String,
    pub chunks: Vec<ChunkDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub records: usize,
    pub groups: usize,
    pub dimension: usize,
    pub model_id: String,
    /// Set when embeddings come from the hash fallback and carry no meaning.
    pub degraded: bool,
    pub snapshot_path: PathBuf,
}

/// ISO-8601 timestamps. Naive timestamps (no offset) are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid ISO-8601 timestamp '{raw}'")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn record_serializes_in_snapshot_shape() {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), json!("pets.txt"));
        metadata.insert(CHUNK_INDEX_KEY.to_string(), json!(1));
        let record = ChunkRecord {
            id: ChunkRecord::chunk_id("doc1", 1),
            group_id: "doc1".to_string(),
            content: "Dogs are loud.".to_string(),
            embedding: vec![0.5, -0.25],
            metadata,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "doc1_chunk_1",
                "groupId": "doc1",
                "content": "Dogs are loud.",
                "embedding": [0.5, -0.25],
                "metadata": {"chunkIndex": 1, "source": "pets.txt"},
                "createdAt": "2024-05-01T12:30:00Z"
            })
        );
    }

    #[test]
    fn legacy_field_names_and_naive_timestamps_are_accepted() {
        let raw = r#"{
            "id": "abc_chunk_3",
            "doc_id": "abc",
            "content": "고양이",
            "embedding": [1.0, 0.0],
            "metadata": {"source": "notes.txt", "chunk_index": 3},
            "created_at": "2025-01-02T03:04:05.123456"
        }"#;
        let mut record: ChunkRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.group_id, "abc");
        assert!(record.upgrade_legacy_metadata());
        assert_eq!(record.chunk_index(), 3);
        assert_eq!(record.source(), Some("notes.txt"));
        assert_eq!(record.content, "고양이");
        assert_eq!(
            record.created_at,
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
    }

    #[test]
    fn legacy_chunk_index_is_renamed_in_place() {
        let raw = r#"{
            "id": "abc_chunk_2",
            "doc_id": "abc",
            "content": "x",
            "embedding": [1.0],
            "metadata": {"source": "a.txt", "chunk_index": 2, "file_type": "txt"},
            "created_at": "2025-01-02T03:04:05"
        }"#;
        let mut record: ChunkRecord = serde_json::from_str(raw).unwrap();
        assert!(record.upgrade_legacy_metadata());

        let keys: Vec<&str> = record.metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["source", "chunkIndex", "file_type"]);
        assert_eq!(record.metadata[CHUNK_INDEX_KEY], json!(2));
        assert!(!record.upgrade_legacy_metadata(), "already current");
    }

    #[test]
    fn current_chunk_index_wins_over_legacy_key() {
        let mut record = ChunkRecord {
            id: "g_chunk_1".to_string(),
            group_id: "g".to_string(),
            content: String::new(),
            embedding: vec![],
            metadata: Metadata::new(),
            created_at: Utc::now(),
        };
        record.metadata.insert(CHUNK_INDEX_KEY.to_string(), json!(1));
        record.metadata.insert(LEGACY_CHUNK_INDEX_KEY.to_string(), json!(7));

        assert!(record.upgrade_legacy_metadata());
        assert_eq!(record.chunk_index(), 1);
        assert!(!record.metadata.contains_key(LEGACY_CHUNK_INDEX_KEY));
    }

    #[test]
    fn missing_chunk_index_defaults_to_zero() {
        let mut record = ChunkRecord {
            id: "g_chunk_0".to_string(),
            group_id: "g".to_string(),
            content: String::new(),
            embedding: vec![],
            metadata: Metadata::new(),
            created_at: Utc::now(),
        };
        assert!(record.upgrade_legacy_metadata());
        assert_eq!(record.metadata[CHUNK_INDEX_KEY], json!(0));
    }

    #[test]
    fn timestamp_keeps_sub_second_precision() {
        let now = Utc::now();
        let raw = now.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true);
        assert_eq!(timestamp::parse(&raw), Some(now));
    }

    #[test]
    fn missing_source_reports_unknown() {
        let record = ChunkRecord {
            id: "g_chunk_0".to_string(),
            group_id: "g".to_string(),
            content: String::new(),
            embedding: vec![],
            metadata: Metadata::new(),
            created_at: Utc::now(),
        };
        assert_eq!(record.display_name(), "Unknown");
        assert_eq!(record.chunk_index(), 0);
    }
}
