//! Monthly report compilation.
//!
//! Turns a subject's incident narrative, dated cost rows and photos for one
//! `YYYY-MM` period into a paginated PDF, then records it idempotently:
//!
//! 1. [`payload`] normalizes raw form rows into a canonical [`ReportPayload`]
//! 2. [`blocks`] parses the narrative into headings, paragraphs and bullets
//! 3. [`render`] lays everything out into PDF pages
//! 4. [`archive`] upserts the ledger and, on send, versions and archives it
//!
//! [`ReportPipeline`] strings the stages together; each stage is also usable
//! on its own.

pub mod archive;
pub mod blocks;
pub mod config;
pub mod context;
pub mod narrative;
pub mod payload;
pub mod render;
pub mod text;

pub use archive::{
    ArchivalCoordinator, ArchiveError, ArchiveRpcError, FailureKind, LedgerEvents, LedgerRecord,
    PersistenceError, SendReceipt,
};
pub use blocks::{parse_blocks, resolve_title, HeadingLevel, ReportBlock};
pub use config::{ConfigLoadError, ReportConfig};
pub use context::{RequestContext, Role};
pub use narrative::{build_prompt, EchoNarrator, NarrativeError, NarrativeGenerator};
pub use payload::{
    build_payload, validate_input, validate_payload, CostRow, ImageItem, PayloadBuilder, Period,
    RawCostRow, RawImageRow, RawReportInput, ReportPayload, Totals, ValidationError,
    ValidationIssue,
};
pub use render::{
    DocumentRenderer, ImageOutcome, LayoutOverrides, RenderRequest, RenderedDocument,
    ResourceFetchError,
};

use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, Instrument, Level};
use uuid::Uuid;

use crate::blocks::parse_blocks_with_placeholder;

/// Errors that can end a generation or send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Narrative(#[from] NarrativeError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl From<PersistenceError> for PipelineError {
    fn from(value: PersistenceError) -> Self {
        PipelineError::Archive(value.into())
    }
}

impl PipelineError {
    /// User-facing hint for storage and archive failures.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            PipelineError::Archive(err) => Some(err.remediation()),
            PipelineError::Validation(_) | PipelineError::Narrative(_) => None,
        }
    }
}

/// Metrics observer for pipeline stages.
pub trait PipelineMetrics: Send + Sync {
    fn record_build(&self, latency: Duration, result: Result<(), ValidationError>);
    fn record_render(&self, latency: Duration, pages: usize, failed_images: usize);
    fn record_archive(&self, latency: Duration, result: Result<(), ArchiveError>);
}

/// Install or clear the global pipeline metrics recorder.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

struct MetricsSpan {
    recorder: Arc<dyn PipelineMetrics>,
    start: Instant,
}

impl MetricsSpan {
    fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    fn record_build(self, result: Result<(), ValidationError>) {
        self.recorder.record_build(self.start.elapsed(), result);
    }

    fn record_render(self, document: &RenderedDocument) {
        let failed = document
            .image_outcomes
            .iter()
            .filter(|outcome| !outcome.is_embedded())
            .count();
        self.recorder
            .record_render(self.start.elapsed(), document.page_count, failed);
    }

    fn record_archive<T>(self, result: &Result<T, ArchiveError>) {
        let result = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.recorder.record_archive(self.start.elapsed(), result);
    }
}

/// Per-request presentation choices.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Explicit title; otherwise the narrative's first `#` heading or the default label.
    pub title: Option<String>,
    /// Line under the title, e.g. the property name.
    pub subtitle: Option<String>,
    pub layout: Option<LayoutOverrides>,
}

/// Everything produced by one successful generation.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub payload: ReportPayload,
    pub narrative: String,
    pub title: String,
    pub blocks: Vec<ReportBlock>,
    pub document: RenderedDocument,
    pub ledger: LedgerRecord,
}

/// Fresh identifier for one logical send.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// The four stages wired together.
#[derive(Clone)]
pub struct ReportPipeline {
    builder: PayloadBuilder,
    narrator: Arc<dyn NarrativeGenerator>,
    renderer: DocumentRenderer,
    coordinator: ArchivalCoordinator,
    empty_narrative: String,
}

impl ReportPipeline {
    pub fn new(renderer: DocumentRenderer, coordinator: ArchivalCoordinator) -> Self {
        Self {
            builder: PayloadBuilder,
            narrator: Arc::new(EchoNarrator),
            renderer,
            coordinator,
            empty_narrative: blocks::EMPTY_NARRATIVE_PLACEHOLDER.to_string(),
        }
    }

    pub fn from_config(config: &ReportConfig) -> Result<Self, ConfigLoadError> {
        Ok(Self::new(config.build_renderer()?, config.build_coordinator()?)
            .with_empty_narrative(&config.labels.empty_narrative))
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = narrator;
        self
    }

    pub fn with_empty_narrative(mut self, placeholder: &str) -> Self {
        self.empty_narrative = placeholder.to_string();
        self
    }

    pub fn renderer(&self) -> &DocumentRenderer {
        &self.renderer
    }

    pub fn coordinator(&self) -> &ArchivalCoordinator {
        &self.coordinator
    }

    /// Validate, build, narrate, parse, render and save the ledger.
    pub async fn generate(
        &self,
        ctx: &RequestContext,
        input: &RawReportInput,
        options: GenerateOptions,
    ) -> Result<GeneratedReport, PipelineError> {
        let span = tracing::span!(
            Level::INFO,
            "report.generate",
            subject_id = %input.subject_id,
            period = %input.period
        );
        self.generate_inner(ctx, input, options).instrument(span).await
    }

    async fn generate_inner(
        &self,
        ctx: &RequestContext,
        input: &RawReportInput,
        options: GenerateOptions,
    ) -> Result<GeneratedReport, PipelineError> {
        let start = Instant::now();
        ctx.require_publisher("generate")?;

        let mut build_metrics = MetricsSpan::start();
        let checked = self
            .builder
            .validate_input(input)
            .into_result()
            .map(|_| self.builder.build(input))
            .and_then(|payload| {
                self.builder
                    .validate(&payload)
                    .into_result()
                    .map(|_| payload)
            });
        if let Some(span) = build_metrics.take() {
            span.record_build(checked.as_ref().map(|_| ()).map_err(Clone::clone));
        }
        let payload = checked?;

        let prompt = narrative::build_prompt(&payload);
        let narrative = self.narrator.generate(&prompt, &payload).await?;
        let blocks = parse_blocks_with_placeholder(&narrative, &self.empty_narrative);
        let title = resolve_title(
            options.title.as_deref(),
            &blocks,
            &self.renderer.labels().default_title,
        );

        let mut request = RenderRequest::from_payload(&title, blocks.clone(), &payload);
        request.subtitle = options.subtitle;
        request.layout = options.layout;

        let mut render_metrics = MetricsSpan::start();
        let document = self.renderer.render(&request).await;
        if let Some(span) = render_metrics.take() {
            span.record_render(&document);
        }

        let events = LedgerEvents {
            incident_text: payload.incident_text.clone(),
            generated_narrative: narrative.clone(),
            costs: payload.costs.clone(),
            images: payload.images.clone(),
        };
        let mut archive_metrics = MetricsSpan::start();
        let saved = self
            .coordinator
            .save_ledger(
                ctx,
                &payload.subject_id,
                &payload.period,
                events,
                payload.totals,
                document.bytes.clone(),
            )
            .await;
        if let Some(span) = archive_metrics.take() {
            span.record_archive(&saved);
        }
        let ledger = saved?;

        info!(
            pages = document.page_count,
            bytes = document.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "report_generated"
        );
        Ok(GeneratedReport {
            payload,
            narrative,
            title,
            blocks,
            document,
            ledger,
        })
    }

    /// Stores, versions and archives an already rendered artifact.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        period: &str,
        artifact: Bytes,
        run_id: &str,
    ) -> Result<SendReceipt, PipelineError> {
        let mut archive_metrics = MetricsSpan::start();
        let result = self
            .coordinator
            .send_and_archive(ctx, subject_id, period, artifact, run_id)
            .await;
        if let Some(span) = archive_metrics.take() {
            span.record_archive(&result);
        }
        Ok(result?)
    }

    /// [`send`](Self::send) for a report returned by [`generate`](Self::generate).
    pub async fn send_report(
        &self,
        ctx: &RequestContext,
        report: &GeneratedReport,
        run_id: &str,
    ) -> Result<SendReceipt, PipelineError> {
        self.send(
            ctx,
            &report.payload.subject_id,
            &report.payload.period,
            report.document.bytes.clone(),
            run_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::StaticImageFetcher;
    use async_trait::async_trait;

    fn pipeline() -> ReportPipeline {
        let renderer = DocumentRenderer::new(Arc::new(StaticImageFetcher::new()));
        ReportPipeline::new(renderer, ArchivalCoordinator::in_memory())
    }

    fn input() -> RawReportInput {
        RawReportInput {
            subject_id: "prop-1".into(),
            period: "2026-02".into(),
            incident_text: "# February\nBoiler serviced.\n- Filter replaced".into(),
            images: Vec::new(),
            costs: vec![RawCostRow::new("2026-02-01", "Service", 100.0)],
        }
    }

    #[tokio::test]
    async fn generate_renders_and_saves() {
        let pipeline = pipeline();
        let ctx = RequestContext::admin("admin-1");
        let report = pipeline.generate(&ctx, &input(), GenerateOptions::default()).await.unwrap();

        assert_eq!(report.title, "February");
        assert_eq!(report.payload.totals.total_cost, 100.0);
        assert!(report.document.bytes.starts_with(render::PDF_MAGIC));
        assert_eq!(report.ledger.artifact_size, report.document.len() as u64);

        let stored = pipeline
            .coordinator()
            .load_ledger("prop-1", "2026-02")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.events.generated_narrative, report.narrative);
    }

    #[tokio::test]
    async fn invalid_input_never_renders() {
        let pipeline = pipeline();
        let ctx = RequestContext::admin("admin-1");
        let mut bad = input();
        bad.period = "Feb 2026".into();
        let err = pipeline.generate(&ctx, &bad, GenerateOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(pipeline.coordinator().load_ledger("prop-1", "2026-02").await.unwrap().is_none());
    }

    struct FailingNarrator;

    #[async_trait]
    impl NarrativeGenerator for FailingNarrator {
        async fn generate(&self, _prompt: &str, _payload: &ReportPayload) -> Result<String, NarrativeError> {
            Err(NarrativeError("model unavailable".into()))
        }
    }

    #[tokio::test]
    async fn narrative_failure_propagates() {
        let pipeline = pipeline().with_narrator(Arc::new(FailingNarrator));
        let ctx = RequestContext::admin("admin-1");
        let err = pipeline.generate(&ctx, &input(), GenerateOptions::default()).await.unwrap_err();
        assert_eq!(err, PipelineError::Narrative(NarrativeError("model unavailable".into())));
        assert!(err.remediation().is_none());
    }

    #[tokio::test]
    async fn non_admin_is_refused_up_front() {
        let pipeline = pipeline();
        let ctx = RequestContext::new("contractor-1", Role::Contractor);
        let err = pipeline.generate(&ctx, &input(), GenerateOptions::default()).await.unwrap_err();
        match err {
            PipelineError::Archive(ArchiveError::Persistence(inner)) => {
                assert_eq!(inner.kind, FailureKind::Permission)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[derive(Default)]
    struct CountingMetrics {
        events: RwLock<Vec<&'static str>>,
    }

    impl CountingMetrics {
        fn snapshot(&self) -> Vec<&'static str> {
            self.events.read().unwrap().clone()
        }
    }

    impl PipelineMetrics for CountingMetrics {
        fn record_build(&self, _latency: Duration, result: Result<(), ValidationError>) {
            let label = if result.is_ok() { "build_ok" } else { "build_err" };
            self.events.write().unwrap().push(label);
        }

        fn record_render(&self, _latency: Duration, _pages: usize, _failed_images: usize) {
            self.events.write().unwrap().push("render");
        }

        fn record_archive(&self, _latency: Duration, result: Result<(), ArchiveError>) {
            let label = if result.is_ok() { "archive_ok" } else { "archive_err" };
            self.events.write().unwrap().push(label);
        }
    }

    #[tokio::test]
    async fn metrics_recorder_tracks_pipeline_outcome() {
        let metrics = Arc::new(CountingMetrics::default());
        set_pipeline_metrics(Some(metrics.clone()));

        let pipeline = pipeline();
        let ctx = RequestContext::admin("admin-1");
        let report = pipeline.generate(&ctx, &input(), GenerateOptions::default()).await.unwrap();
        pipeline.send_report(&ctx, &report, "run-1").await.unwrap();

        let events = metrics.snapshot();
        assert!(events.contains(&"build_ok"));
        assert!(events.contains(&"render"));
        assert!(events.contains(&"archive_ok"));

        set_pipeline_metrics(None);
    }
}
