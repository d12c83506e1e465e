use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::{CostRow, ImageItem, Totals};

/// Raw inputs and generated text kept with the ledger for audit and regeneration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvents {
    pub incident_text: String,
    pub generated_narrative: String,
    pub costs: Vec<CostRow>,
    pub images: Vec<ImageItem>,
}

/// The latest artifact for one `(subject_id, period)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub subject_id: String,
    pub period: String,
    pub events: LedgerEvents,
    pub totals: Totals,
    #[serde(with = "base64_bytes")]
    pub artifact: Bytes,
    pub artifact_size: u64,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(&self.subject_id, &self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub subject_id: String,
    pub period: String,
}

impl LedgerKey {
    pub fn new(subject_id: &str, period: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            period: period.to_string(),
        }
    }

    /// Flat storage key; the unit separator cannot appear in either part.
    pub fn storage_key(&self) -> String {
        format!("{}\u{1f}{}", self.subject_id, self.period)
    }
}

/// Identity of a logical document: one per subject, display name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub subject_id: String,
    pub name: String,
    pub doc_type: String,
}

impl DocumentKey {
    pub fn storage_key(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.subject_id, self.name, self.doc_type)
    }
}

/// The logical document row with its version counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub key: DocumentKey,
    pub version_number: u32,
    pub updated_at: DateTime<Utc>,
}

/// What the coordinator wants recorded as the next version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDraft {
    pub path: BlobPath,
    pub size: u64,
    pub mime_type: String,
    pub run_id: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: Uuid,
    pub version_number: u32,
    pub path: BlobPath,
    pub size: u64,
    pub mime_type: String,
    pub run_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentVersion {
    /// Storage key that sorts versions of one document numerically.
    pub fn storage_key(document_id: Uuid, version_number: u32) -> String {
        format!("{document_id}/{version_number:010}")
    }
}

/// A `/`-separated blob location: `<folder>/<subtype>/<file name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobPath(String);

impl BlobPath {
    /// Joins the parts, replacing anything outside `[A-Za-z0-9._-]` in each
    /// segment (`/` included) so a segment can never introduce extra nesting.
    /// Empty segments are skipped.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let joined = segments
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .map(sanitize_segment)
            .collect::<Vec<_>>()
            .join("/");
        BlobPath(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len())
    } else {
        cleaned
    }
}

/// Arguments of the "archive operational records in date range" procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub subject_id: String,
    /// Inclusive.
    pub from: NaiveDate,
    /// Exclusive.
    pub to: NaiveDate,
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub archived: u64,
    /// True when the procedure had already processed this `run_id`.
    #[serde(default)]
    pub replayed: bool,
}

/// Result of a successful send-and-archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub document_id: Uuid,
    pub version_number: u32,
    pub path: BlobPath,
    pub archive: ArchiveOutcome,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
