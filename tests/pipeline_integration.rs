use std::sync::Arc;

use chrono::NaiveDate;
use monthly_report::archive::{
    InMemoryArchiveProcedure, InMemoryBlobStore, InMemoryDocumentStore, InMemoryLedgerStore,
};
use monthly_report::render::{StaticImageFetcher, PDF_MAGIC};
use monthly_report::{
    ArchivalCoordinator, DocumentRenderer, GenerateOptions, HeadingLevel, PipelineError,
    RawCostRow, RawReportInput, ReportBlock, ReportConfig, ReportPipeline, RequestContext,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn input() -> RawReportInput {
    RawReportInput {
        subject_id: "prop-9".into(),
        period: "2026-03".into(),
        incident_text: "# March at prop-9\n## Incidents\nA window was replaced.\n- Glazier visit\n- Frame sealed".into(),
        images: Vec::new(),
        costs: vec![
            RawCostRow::new("2026-03-18", "Frame sealant", 35.0),
            RawCostRow::new("2026-03-02", "Glazier", "410.25"),
            RawCostRow::new("", "", ""),
        ],
    }
}

#[tokio::test]
async fn generate_then_send_versions_and_archives() -> Result<(), PipelineError> {
    let procedure = Arc::new(
        InMemoryArchiveProcedure::new()
            .with_record("prop-9", date(2026, 3, 1))
            .with_record("prop-9", date(2026, 3, 31))
            .with_record("prop-9", date(2026, 4, 1)),
    );
    let coordinator = ArchivalCoordinator::new(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryDocumentStore::new()),
        procedure.clone(),
    );
    let pipeline = ReportPipeline::new(
        DocumentRenderer::new(Arc::new(StaticImageFetcher::new())),
        coordinator,
    );
    let ctx = RequestContext::admin("admin-7");

    let report = pipeline.generate(&ctx, &input(), GenerateOptions::default()).await?;
    assert_eq!(report.title, "March at prop-9");
    assert_eq!(report.payload.costs.len(), 2, "blank row is dropped");
    assert_eq!(report.payload.costs[0].concept, "Glazier", "costs sorted by date");
    assert_eq!(report.payload.totals.total_cost, 445.25);
    assert!(matches!(
        report.blocks.first(),
        Some(ReportBlock::Heading { level: HeadingLevel::H1, .. })
    ));
    assert!(report.document.bytes.starts_with(PDF_MAGIC));
    assert_eq!(report.document.table_header_count, 1);

    let first = pipeline.send_report(&ctx, &report, "run-a").await?;
    assert_eq!(first.version_number, 1);
    assert_eq!(first.archive.archived, 2, "only records inside March");
    assert!(!first.archive.replayed);

    let second = pipeline.send_report(&ctx, &report, "run-b").await?;
    assert_eq!(second.version_number, 2);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.archive.archived, 0);

    let versions = pipeline.coordinator().versions(first.document_id).await?;
    let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(procedure.archived_count(), 2);

    let stored = pipeline.coordinator().artifact(&second.path).await?;
    assert_eq!(stored.as_deref(), Some(&report.document.bytes[..]));
    Ok(())
}

#[tokio::test]
async fn explicit_title_and_subtitle_win() -> Result<(), PipelineError> {
    let pipeline = ReportPipeline::new(
        DocumentRenderer::new(Arc::new(StaticImageFetcher::new())),
        ArchivalCoordinator::in_memory(),
    );
    let options = GenerateOptions {
        title: Some("Quarterly Review".into()),
        subtitle: Some("North Wing".into()),
        layout: None,
    };
    let report = pipeline
        .generate(&RequestContext::admin("admin-7"), &input(), options)
        .await?;

    assert_eq!(report.title, "Quarterly Review");
    let pdf = String::from_utf8_lossy(&report.document.bytes);
    assert!(pdf.contains("(Quarterly Review) Tj"));
    assert!(pdf.contains("(North Wing) Tj"));
    Ok(())
}

#[tokio::test]
async fn blank_narrative_from_generator_uses_placeholder() -> Result<(), PipelineError> {
    struct SilentNarrator;

    #[async_trait::async_trait]
    impl monthly_report::NarrativeGenerator for SilentNarrator {
        async fn generate(
            &self,
            _prompt: &str,
            _payload: &monthly_report::ReportPayload,
        ) -> Result<String, monthly_report::NarrativeError> {
            Ok("   \n\n".into())
        }
    }

    let pipeline = ReportPipeline::new(
        DocumentRenderer::new(Arc::new(StaticImageFetcher::new())),
        ArchivalCoordinator::in_memory(),
    )
    .with_narrator(Arc::new(SilentNarrator))
    .with_empty_narrative("Nothing to report.");

    let report = pipeline
        .generate(&RequestContext::admin("admin-7"), &input(), GenerateOptions::default())
        .await?;
    assert_eq!(
        report.blocks,
        vec![ReportBlock::Paragraph {
            text: "Nothing to report.".into()
        }]
    );
    assert_eq!(report.title, "Monthly Report");
    Ok(())
}

#[cfg(feature = "embedded")]
#[tokio::test]
async fn redb_backed_pipeline_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "storage:\n  backend: \"redb\"\n  redb_path: \"{}\"\n",
        dir.path().join("reports.redb").display()
    );
    let config = ReportConfig::from_yaml(&yaml).unwrap();
    let ctx = RequestContext::admin("admin-7");

    let receipt = {
        let pipeline = ReportPipeline::new(config.offline_renderer(), config.build_coordinator().unwrap());
        let report = pipeline
            .generate(&ctx, &input(), GenerateOptions::default())
            .await
            .unwrap();
        pipeline.send_report(&ctx, &report, "run-a").await.unwrap()
    };

    let reopened = config.build_coordinator().unwrap();
    let ledger = reopened.load_ledger("prop-9", "2026-03").await.unwrap().unwrap();
    assert_eq!(ledger.totals.total_cost, 445.25);
    assert_eq!(ledger.created_by, "admin-7");

    let document = reopened.document("prop-9").await.unwrap().unwrap();
    assert_eq!(document.id, receipt.document_id);
    assert_eq!(document.version_number, 1);
    assert!(reopened.artifact(&receipt.path).await.unwrap().is_some());
}
