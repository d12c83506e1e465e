use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use super::error::{ArchiveRpcError, PersistenceError, RpcFailureKind};
use super::types::{
    ArchiveOutcome, ArchiveRequest, BlobPath, DocumentKey, DocumentRecord, DocumentVersion,
    LedgerKey, LedgerRecord, VersionDraft,
};

/// Upsert store for ledger records keyed by `(subject_id, period)`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts or replaces the record for its key.
    async fn upsert(&self, record: LedgerRecord) -> Result<(), PersistenceError>;
    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>, PersistenceError>;
}

/// Binary artifact storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` at `path`, replacing anything already there.
    async fn put(&self, path: &BlobPath, bytes: Bytes, mime_type: &str) -> Result<(), PersistenceError>;
    async fn get(&self, path: &BlobPath) -> Result<Option<Bytes>, PersistenceError>;
}

/// Logical documents and their version rows.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Finds or creates the document for `key`, bumps its version counter and
    /// inserts the version row, all as one write. A draft whose `run_id`
    /// already has a version on this document returns that version unchanged.
    async fn create_version(
        &self,
        key: &DocumentKey,
        draft: VersionDraft,
    ) -> Result<DocumentVersion, PersistenceError>;

    async fn document(&self, key: &DocumentKey) -> Result<Option<DocumentRecord>, PersistenceError>;

    /// All versions of a document, oldest first.
    async fn versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, PersistenceError>;
}

/// The external "archive operational records in a date range" procedure.
#[async_trait]
pub trait ArchiveProcedure: Send + Sync {
    async fn archive_range(&self, request: &ArchiveRequest) -> Result<ArchiveOutcome, ArchiveRpcError>;
}

/// In-memory ledger; used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    records: RwLock<HashMap<LedgerKey, LedgerRecord>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn upsert(&self, record: LedgerRecord) -> Result<(), PersistenceError> {
        self.records
            .write()
            .map_err(|_| PersistenceError::poisoned("ledger_upsert"))?
            .insert(record.key(), record);
        Ok(())
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>, PersistenceError> {
        let guard = self
            .records
            .read()
            .map_err(|_| PersistenceError::poisoned("ledger_get"))?;
        Ok(guard.get(key).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobPath, (Bytes, String)>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mime_type(&self, path: &BlobPath) -> Option<String> {
        self.blobs
            .read()
            .ok()
            .and_then(|blobs| blobs.get(path).map(|(_, mime)| mime.clone()))
    }

    pub fn paths(&self) -> Vec<BlobPath> {
        let mut paths: Vec<BlobPath> = self
            .blobs
            .read()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &BlobPath, bytes: Bytes, mime_type: &str) -> Result<(), PersistenceError> {
        self.blobs
            .write()
            .map_err(|_| PersistenceError::poisoned("blob_put"))?
            .insert(path.clone(), (bytes, mime_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &BlobPath) -> Result<Option<Bytes>, PersistenceError> {
        let guard = self
            .blobs
            .read()
            .map_err(|_| PersistenceError::poisoned("blob_get"))?;
        Ok(guard.get(path).map(|(bytes, _)| bytes.clone()))
    }
}

#[derive(Debug, Default)]
struct DocumentTables {
    documents: HashMap<DocumentKey, DocumentRecord>,
    versions: BTreeMap<(Uuid, u32), DocumentVersion>,
}

/// In-memory document/version tables behind a single lock.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    tables: RwLock<DocumentTables>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_version(
        &self,
        key: &DocumentKey,
        draft: VersionDraft,
    ) -> Result<DocumentVersion, PersistenceError> {
        // One write lock covers find-or-create, the bump and the insert.
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PersistenceError::poisoned("document_version_create"))?;
        let DocumentTables {
            documents,
            versions,
        } = &mut *tables;

        let now = Utc::now();
        let document = documents.entry(key.clone()).or_insert_with(|| DocumentRecord {
            id: Uuid::new_v4(),
            key: key.clone(),
            version_number: 0,
            updated_at: now,
        });

        if let Some(existing) = versions
            .range((document.id, 0)..=(document.id, u32::MAX))
            .map(|(_, version)| version)
            .find(|version| version.run_id == draft.run_id)
        {
            return Ok(existing.clone());
        }

        document.version_number += 1;
        document.updated_at = now;
        let version = DocumentVersion {
            document_id: document.id,
            version_number: document.version_number,
            path: draft.path,
            size: draft.size,
            mime_type: draft.mime_type,
            run_id: draft.run_id,
            created_by: draft.created_by,
            created_at: now,
        };
        versions.insert((version.document_id, version.version_number), version.clone());
        Ok(version)
    }

    async fn document(&self, key: &DocumentKey) -> Result<Option<DocumentRecord>, PersistenceError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| PersistenceError::poisoned("document_get"))?;
        Ok(tables.documents.get(key).cloned())
    }

    async fn versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, PersistenceError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| PersistenceError::poisoned("document_versions"))?;
        Ok(tables
            .versions
            .range((document_id, 0)..=(document_id, u32::MAX))
            .map(|(_, version)| version.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
struct ProcedureState {
    /// `(subject_id, date, archived)`
    records: Vec<(String, NaiveDate, bool)>,
    runs: HashMap<String, ArchiveOutcome>,
    fail_next: Option<ArchiveRpcError>,
    calls: usize,
}

/// In-memory stand-in for the archive procedure.
///
/// Holds a list of dated operational records per subject. Archiving marks the
/// ones inside the range; a repeated `run_id` replays the first outcome and
/// archives nothing.
#[derive(Debug, Default)]
pub struct InMemoryArchiveProcedure {
    state: RwLock<ProcedureState>,
}

impl InMemoryArchiveProcedure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, subject_id: &str, date: NaiveDate) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.records.push((subject_id.to_string(), date, false));
        }
        self
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: ArchiveRpcError) {
        if let Ok(mut state) = self.state.write() {
            state.fail_next = Some(error);
        }
    }

    pub fn calls(&self) -> usize {
        self.state.read().map(|state| state.calls).unwrap_or(0)
    }

    pub fn archived_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.records.iter().filter(|(_, _, archived)| *archived).count())
            .unwrap_or(0)
    }

    pub fn seen_runs(&self) -> HashSet<String> {
        self.state
            .read()
            .map(|state| state.runs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveProcedure for InMemoryArchiveProcedure {
    async fn archive_range(&self, request: &ArchiveRequest) -> Result<ArchiveOutcome, ArchiveRpcError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ArchiveRpcError::new(RpcFailureKind::Other, "poisoned lock"))?;
        state.calls += 1;
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if let Some(previous) = state.runs.get(&request.run_id) {
            return Ok(ArchiveOutcome {
                archived: previous.archived,
                replayed: true,
            });
        }

        let mut archived = 0;
        for (subject_id, date, done) in state.records.iter_mut() {
            if !*done && *subject_id == request.subject_id && *date >= request.from && *date < request.to {
                *done = true;
                archived += 1;
            }
        }
        let outcome = ArchiveOutcome {
            archived,
            replayed: false,
        };
        state.runs.insert(request.run_id.clone(), outcome);
        Ok(outcome)
    }
}
