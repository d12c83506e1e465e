//! Idempotent persistence of rendered reports.
//!
//! Two operations, callable independently so generation can be retried
//! between them:
//!
//! 1. [`ArchivalCoordinator::save_ledger`] upserts the artifact and its inputs
//!    under `(subject_id, period)`. A repeat call overwrites.
//! 2. [`ArchivalCoordinator::send_and_archive`] stores the artifact as a blob,
//!    records a new document version and calls the date-ranged archive
//!    procedure with the caller's `run_id`. Steps run in order and the first
//!    failure is returned; nothing earlier is rolled back. Retrying with the
//!    same `run_id` rewrites the same blob, reuses the same version row and
//!    lets the procedure replay instead of archiving twice.

mod backend;
mod error;
mod fs;
#[cfg(feature = "embedded")]
mod redb;
#[cfg(feature = "http")]
mod rpc;
mod types;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument, Level};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::payload::{Period, Totals};

pub use self::backend::{
    ArchiveProcedure, BlobStore, DocumentStore, InMemoryArchiveProcedure, InMemoryBlobStore,
    InMemoryDocumentStore, InMemoryLedgerStore, LedgerStore,
};
pub use self::error::{ArchiveError, ArchiveRpcError, FailureKind, PersistenceError, RpcFailureKind};
pub use self::fs::FsBlobStore;
#[cfg(feature = "embedded")]
pub use self::redb::RedbArchiveStore;
#[cfg(feature = "http")]
pub use self::rpc::HttpArchiveProcedure;
pub use self::types::{
    ArchiveOutcome, ArchiveRequest, BlobPath, DocumentKey, DocumentRecord, DocumentVersion,
    LedgerEvents, LedgerKey, LedgerRecord, SendReceipt, VersionDraft,
};

/// Fixed naming used for the document rows and blob paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Display name of the logical document; part of its identity.
    pub document_name: String,
    pub document_type: String,
    /// Second path segment under the subject folder.
    pub subtype: String,
    /// Folder used when the subject id is empty.
    pub global_folder: String,
    pub mime_type: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            document_name: "Monthly report".into(),
            document_type: "report".into(),
            subtype: "monthly-reports".into(),
            global_folder: "global".into(),
            mime_type: "application/pdf".into(),
        }
    }
}

/// Coordinates the ledger, blob, document and archive-procedure backends.
#[derive(Clone)]
pub struct ArchivalCoordinator {
    ledger: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
    procedure: Arc<dyn ArchiveProcedure>,
    settings: ArchiveSettings,
}

impl ArchivalCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        procedure: Arc<dyn ArchiveProcedure>,
    ) -> Self {
        Self {
            ledger,
            blobs,
            documents,
            procedure,
            settings: ArchiveSettings::default(),
        }
    }

    /// Everything in memory, with an archive procedure that has no records.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryArchiveProcedure::new()),
        )
    }

    pub fn with_settings(mut self, settings: ArchiveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Upserts the ledger record for `(subject_id, period)`.
    pub async fn save_ledger(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        period: &str,
        events: LedgerEvents,
        totals: Totals,
        artifact: Bytes,
    ) -> Result<LedgerRecord, ArchiveError> {
        let start = Instant::now();
        let span = tracing::span!(Level::INFO, "archive.save_ledger", subject_id, period);

        ctx.require_publisher("save_ledger")?;
        let period = parse_period(period)?;
        let record = LedgerRecord {
            subject_id: normalize_subject(subject_id).to_string(),
            period: period.to_string(),
            events,
            totals,
            artifact_size: artifact.len() as u64,
            artifact,
            created_by: ctx.actor_id.clone(),
            updated_at: Utc::now(),
        };

        let result = self.ledger.upsert(record.clone()).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(()) => info!(
                bytes = record.artifact_size,
                elapsed_micros = start.elapsed().as_micros(),
                "ledger_saved"
            ),
            Err(err) => error!(kind = %err.kind, error = %err, "archive_failure"),
        });
        result?;
        Ok(record)
    }

    pub async fn load_ledger(&self, subject_id: &str, period: &str) -> Result<Option<LedgerRecord>, ArchiveError> {
        let period = parse_period(period)?;
        let key = LedgerKey::new(normalize_subject(subject_id), &period.to_string());
        Ok(self.ledger.get(&key).await?)
    }

    /// Deterministic, run-scoped location of a sent artifact:
    /// `subjects/<subject>/<subtype>/<file>`, or the global folder in place of
    /// the first two segments for an empty subject. The subject is always a
    /// single segment.
    pub fn artifact_path(&self, subject_id: &str, period: &Period, run_id: &str) -> BlobPath {
        let subject_id = normalize_subject(subject_id);
        let file_name = format!("monthly-report-{period}-{run_id}.pdf");
        let mut segments: Vec<&str> = if subject_id.is_empty() {
            self.settings.global_folder.split('/').collect()
        } else {
            vec!["subjects", subject_id]
        };
        segments.extend(self.settings.subtype.split('/'));
        segments.push(&file_name);
        BlobPath::from_segments(segments)
    }

    pub fn document_key(&self, subject_id: &str) -> DocumentKey {
        DocumentKey {
            subject_id: normalize_subject(subject_id).to_string(),
            name: self.settings.document_name.clone(),
            doc_type: self.settings.document_type.clone(),
        }
    }

    /// Stores the artifact, records a version and archives the month.
    pub async fn send_and_archive(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        period: &str,
        artifact: Bytes,
        run_id: &str,
    ) -> Result<SendReceipt, ArchiveError> {
        let start = Instant::now();
        let span = tracing::span!(Level::INFO, "archive.send", subject_id, period, run_id);

        let result = self
            .send_inner(ctx, subject_id, period, artifact, run_id)
            .instrument(span.clone())
            .await;
        span.in_scope(|| match &result {
            Ok(receipt) => info!(
                version = receipt.version_number,
                archived = receipt.archive.archived,
                replayed = receipt.archive.replayed,
                elapsed_micros = start.elapsed().as_micros(),
                "archive_complete"
            ),
            Err(err) => error!(
                error = %err,
                retryable = err.is_retryable(),
                elapsed_micros = start.elapsed().as_micros(),
                "archive_failure"
            ),
        });
        result
    }

    async fn send_inner(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        period: &str,
        artifact: Bytes,
        run_id: &str,
    ) -> Result<SendReceipt, ArchiveError> {
        ctx.require_publisher("send_and_archive")?;
        let period = parse_period(period)?;
        let run_id = run_id.trim();
        if run_id.is_empty() {
            return Err(PersistenceError::other("send_and_archive", "run_id must not be empty").into());
        }

        let path = self.artifact_path(subject_id, &period, run_id);
        let size = artifact.len() as u64;
        self.blobs.put(&path, artifact, &self.settings.mime_type).await?;

        let version = self
            .documents
            .create_version(
                &self.document_key(subject_id),
                VersionDraft {
                    path: path.clone(),
                    size,
                    mime_type: self.settings.mime_type.clone(),
                    run_id: run_id.to_string(),
                    created_by: ctx.actor_id.clone(),
                },
            )
            .await?;
        info!(
            document_id = %version.document_id,
            version = version.version_number,
            "document_version_created"
        );

        let (from, to) = period.date_range();
        let archive = self
            .procedure
            .archive_range(&ArchiveRequest {
                subject_id: normalize_subject(subject_id).to_string(),
                from,
                to,
                run_id: run_id.to_string(),
            })
            .await?;

        Ok(SendReceipt {
            document_id: version.document_id,
            version_number: version.version_number,
            path,
            archive,
        })
    }

    pub async fn versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, ArchiveError> {
        Ok(self.documents.versions(document_id).await?)
    }

    pub async fn document(&self, subject_id: &str) -> Result<Option<DocumentRecord>, ArchiveError> {
        Ok(self.documents.document(&self.document_key(subject_id)).await?)
    }

    pub async fn artifact(&self, path: &BlobPath) -> Result<Option<Bytes>, ArchiveError> {
        Ok(self.blobs.get(path).await?)
    }
}

/// Subject ids are compared trimmed everywhere; empty means the global scope.
fn normalize_subject(subject_id: &str) -> &str {
    subject_id.trim()
}

fn parse_period(period: &str) -> Result<Period, ArchiveError> {
    period
        .trim()
        .parse::<Period>()
        .map_err(|_| ArchiveError::InvalidPeriod(period.to_string()))
}
