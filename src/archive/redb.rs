//! Embedded persistence on redb.
//!
//! One database file carries the ledger, the blob table and the document /
//! version tables. Values are JSON except blobs, which are stored raw. redb
//! transactions are synchronous, so every call runs on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::backend::{BlobStore, DocumentStore, LedgerStore};
use super::error::PersistenceError;
use super::types::{BlobPath, DocumentKey, DocumentRecord, DocumentVersion, LedgerKey, LedgerRecord, VersionDraft};

const LEDGER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("report_ledger");
const BLOB_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("report_blobs");
const DOCUMENT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const VERSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("document_versions");

fn backend(operation: &'static str) -> impl Fn(redb::Error) -> PersistenceError {
    move |e| PersistenceError::other(operation, e.to_string())
}

fn to_json<T: Serialize>(operation: &'static str, value: &T) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(value).map_err(|e| PersistenceError::other(operation, e.to_string()))
}

fn from_json<T: DeserializeOwned>(operation: &'static str, raw: &[u8]) -> Result<T, PersistenceError> {
    serde_json::from_slice(raw).map_err(|e| PersistenceError::other(operation, e.to_string()))
}

/// Ledger, blob and document storage in a single redb file.
#[derive(Clone)]
pub struct RedbArchiveStore {
    db: Arc<Database>,
}

impl RedbArchiveStore {
    /// Opens or creates the database and its tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let op = "redb_open";
        let db = Database::create(path.as_ref()).map_err(|e| classify_open(op, e))?;

        let write_txn = db.begin_write().map_err(|e| backend(op)(e.into()))?;
        {
            for table in [LEDGER_TABLE, BLOB_TABLE, DOCUMENT_TABLE, VERSION_TABLE] {
                write_txn
                    .open_table(table)
                    .map_err(|e| backend(op)(e.into()))?;
            }
        }
        write_txn.commit().map_err(|e| backend(op)(e.into()))?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, operation: &'static str, work: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, PersistenceError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|e| PersistenceError::other(operation, e.to_string()))?
    }

    fn put_raw(
        db: &Database,
        operation: &'static str,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &[u8],
    ) -> Result<(), PersistenceError> {
        let err = backend(operation);
        let write_txn = db.begin_write().map_err(|e| err(e.into()))?;
        {
            let mut table = write_txn.open_table(table).map_err(|e| err(e.into()))?;
            table.insert(key, value).map_err(|e| err(e.into()))?;
        }
        write_txn.commit().map_err(|e| err(e.into()))?;
        Ok(())
    }

    fn get_raw(
        db: &Database,
        operation: &'static str,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        let err = backend(operation);
        let read_txn = db.begin_read().map_err(|e| err(e.into()))?;
        let table = read_txn.open_table(table).map_err(|e| err(e.into()))?;
        let value = table.get(key).map_err(|e| err(e.into()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

fn classify_open(operation: &'static str, err: redb::DatabaseError) -> PersistenceError {
    match err {
        redb::DatabaseError::Storage(redb::StorageError::Io(io)) => PersistenceError::io(operation, &io),
        other => PersistenceError::other(operation, other.to_string()),
    }
}

/// Exclusive upper bound for keys starting with `{document_id}/`.
fn version_range(document_id: Uuid) -> (String, String) {
    (format!("{document_id}/"), format!("{document_id}0"))
}

#[async_trait]
impl LedgerStore for RedbArchiveStore {
    async fn upsert(&self, record: LedgerRecord) -> Result<(), PersistenceError> {
        let op = "ledger_upsert";
        let key = record.key().storage_key();
        let value = to_json(op, &record)?;
        self.blocking(op, move |db| Self::put_raw(db, op, LEDGER_TABLE, &key, &value))
            .await
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRecord>, PersistenceError> {
        let op = "ledger_get";
        let key = key.storage_key();
        let raw = self
            .blocking(op, move |db| Self::get_raw(db, op, LEDGER_TABLE, &key))
            .await?;
        raw.map(|raw| from_json(op, &raw)).transpose()
    }
}

#[async_trait]
impl BlobStore for RedbArchiveStore {
    async fn put(&self, path: &BlobPath, bytes: Bytes, _mime_type: &str) -> Result<(), PersistenceError> {
        let op = "blob_put";
        let key = path.as_str().to_string();
        self.blocking(op, move |db| Self::put_raw(db, op, BLOB_TABLE, &key, &bytes))
            .await
    }

    async fn get(&self, path: &BlobPath) -> Result<Option<Bytes>, PersistenceError> {
        let op = "blob_get";
        let key = path.as_str().to_string();
        let raw = self
            .blocking(op, move |db| Self::get_raw(db, op, BLOB_TABLE, &key))
            .await?;
        Ok(raw.map(Bytes::from))
    }
}

#[async_trait]
impl DocumentStore for RedbArchiveStore {
    async fn create_version(
        &self,
        key: &DocumentKey,
        draft: VersionDraft,
    ) -> Result<DocumentVersion, PersistenceError> {
        let op = "document_version_create";
        let key = key.clone();
        self.blocking(op, move |db| {
            let err = backend(op);
            let write_txn = db.begin_write().map_err(|e| err(e.into()))?;
            let version = {
                let mut documents = write_txn.open_table(DOCUMENT_TABLE).map_err(|e| err(e.into()))?;
                let mut versions = write_txn.open_table(VERSION_TABLE).map_err(|e| err(e.into()))?;
                let doc_key = key.storage_key();
                let now = Utc::now();

                let existing = documents
                    .get(doc_key.as_str())
                    .map_err(|e| err(e.into()))?
                    .map(|v| v.value().to_vec());
                let mut document: DocumentRecord = match existing {
                    Some(raw) => from_json(op, &raw)?,
                    None => DocumentRecord {
                        id: Uuid::new_v4(),
                        key: key.clone(),
                        version_number: 0,
                        updated_at: now,
                    },
                };

                let (start, end) = version_range(document.id);
                let mut replay = None;
                for item in versions
                    .range(start.as_str()..end.as_str())
                    .map_err(|e| err(e.into()))?
                {
                    let (_, value) = item.map_err(|e| err(e.into()))?;
                    let version: DocumentVersion = from_json(op, value.value())?;
                    if version.run_id == draft.run_id {
                        replay = Some(version);
                        break;
                    }
                }
                if let Some(version) = replay {
                    // Nothing written; dropping the transaction aborts it.
                    return Ok(version);
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
                let version_key = DocumentVersion::storage_key(version.document_id, version.version_number);
                documents
                    .insert(doc_key.as_str(), to_json(op, &document)?.as_slice())
                    .map_err(|e| err(e.into()))?;
                versions
                    .insert(version_key.as_str(), to_json(op, &version)?.as_slice())
                    .map_err(|e| err(e.into()))?;
                version
            };
            write_txn.commit().map_err(|e| err(e.into()))?;
            Ok(version)
        })
        .await
    }

    async fn document(&self, key: &DocumentKey) -> Result<Option<DocumentRecord>, PersistenceError> {
        let op = "document_get";
        let key = key.storage_key();
        let raw = self
            .blocking(op, move |db| Self::get_raw(db, op, DOCUMENT_TABLE, &key))
            .await?;
        raw.map(|raw| from_json(op, &raw)).transpose()
    }

    async fn versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, PersistenceError> {
        let op = "document_versions";
        self.blocking(op, move |db| {
            let err = backend(op);
            let read_txn = db.begin_read().map_err(|e| err(e.into()))?;
            let table = read_txn.open_table(VERSION_TABLE).map_err(|e| err(e.into()))?;
            let (start, end) = version_range(document_id);
            let mut out = Vec::new();
            for item in table
                .range(start.as_str()..end.as_str())
                .map_err(|e| err(e.into()))?
            {
                let (_, value) = item.map_err(|e| err(e.into()))?;
                out.push(from_json(op, value.value())?);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::types::LedgerEvents;
    use crate::payload::Totals;
    use tempfile::NamedTempFile;

    fn record(bytes: &'static [u8]) -> LedgerRecord {
        LedgerRecord {
            subject_id: "p-1".into(),
            period: "2026-02".into(),
            events: LedgerEvents::default(),
            totals: Totals { total_cost: 1.0 },
            artifact: Bytes::from_static(bytes),
            artifact_size: bytes.len() as u64,
            created_by: "admin".into(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ledger_upsert_overwrites() {
        let file = NamedTempFile::new().unwrap();
        let store = RedbArchiveStore::open(file.path()).unwrap();
        store.upsert(record(b"first")).await.unwrap();
        store.upsert(record(b"second")).await.unwrap();
        let loaded = LedgerStore::get(&store, &LedgerKey::new("p-1", "2026-02"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.artifact, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn versions_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        let key = DocumentKey {
            subject_id: "p-1".into(),
            name: "Monthly report".into(),
            doc_type: "report".into(),
        };
        let draft = |run: &str| VersionDraft {
            path: BlobPath::from_segments(["subjects", "p-1", "r.pdf"]),
            size: 1,
            mime_type: "application/pdf".into(),
            run_id: run.into(),
            created_by: "admin".into(),
        };

        let document_id = {
            let store = RedbArchiveStore::open(file.path()).unwrap();
            let v1 = store.create_version(&key, draft("a")).await.unwrap();
            let v2 = store.create_version(&key, draft("b")).await.unwrap();
            assert_eq!((v1.version_number, v2.version_number), (1, 2));
            v1.document_id
        };

        let store = RedbArchiveStore::open(file.path()).unwrap();
        let replay = store.create_version(&key, draft("a")).await.unwrap();
        assert_eq!(replay.version_number, 1);
        let v3 = store.create_version(&key, draft("c")).await.unwrap();
        assert_eq!(v3.version_number, 3);
        let numbers: Vec<u32> = store
            .versions(document_id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn blobs_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let store = RedbArchiveStore::open(file.path()).unwrap();
        let path = BlobPath::from_segments(["global", "monthly-reports", "r.pdf"]);
        store.put(&path, Bytes::from_static(b"%PDF-"), "application/pdf").await.unwrap();
        assert_eq!(BlobStore::get(&store, &path).await.unwrap(), Some(Bytes::from_static(b"%PDF-")));
    }
}
