use std::error::Error;
use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use monthly_report::render::StaticImageFetcher;
use monthly_report::{
    new_run_id, GenerateOptions, RawCostRow, RawImageRow, RawReportInput, ReportConfig,
    ReportPipeline, RequestContext,
};
use tracing_subscriber::EnvFilter;

const SAMPLE_NARRATIVE: &str = include_str!("../demos/sample_narrative.md");
const PHOTO_URL: &str = "https://photos.example.com/unit-3b.png";
const MISSING_URL: &str = "https://photos.example.com/missing.png";

/// Usage: `report-demo [config.yaml] [output.pdf]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var_os("REPORT_LOG_JSON").is_some() {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ReportConfig::from_file(path)?,
        None => ReportConfig::default(),
    };
    let output = args.next().unwrap_or_else(|| "monthly-report.pdf".to_string());

    // The bundled photo is served locally; the second URL stays unresolved
    // and renders as a placeholder.
    let fetcher = StaticImageFetcher::new().with_image(PHOTO_URL, sample_photo()?);
    let renderer = config.renderer_with_fetcher(Arc::new(fetcher));
    let pipeline = ReportPipeline::new(renderer, config.build_coordinator()?)
        .with_empty_narrative(&config.labels.empty_narrative);

    let input = RawReportInput {
        subject_id: "harbor-view".into(),
        period: "2026-02".into(),
        incident_text: SAMPLE_NARRATIVE.into(),
        images: vec![
            RawImageRow::new(PHOTO_URL, 1).with_caption("Unit 3B after the repair"),
            RawImageRow::new(MISSING_URL, 2).with_caption("Lobby door"),
        ],
        costs: vec![
            RawCostRow::new("2026-02-04", "Plumber call-out and parts", 245.5),
            RawCostRow::new("2026-02-11", "Door closer", 89.99),
            RawCostRow::new("2026-02-20", "Boiler annual service", 1200.0),
        ],
    };

    let ctx = RequestContext::admin("demo-admin");
    let options = GenerateOptions {
        subtitle: Some("Harbor View Apartments".into()),
        ..GenerateOptions::default()
    };
    let report = pipeline.generate(&ctx, &input, options).await?;
    tokio::fs::write(&output, &report.document.bytes).await?;

    let receipt = pipeline.send_report(&ctx, &report, &new_run_id()).await?;
    println!(
        "wrote {output}: {} pages, {} bytes; archived as {} version {} ({} records)",
        report.document.page_count,
        report.document.len(),
        receipt.path,
        receipt.version_number,
        receipt.archive.archived
    );
    Ok(())
}

fn sample_photo() -> Result<Vec<u8>, Box<dyn Error>> {
    let photo = RgbImage::from_fn(160, 120, |x, y| {
        Rgb([(x * 255 / 160) as u8, (y * 255 / 120) as u8, 140])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(photo).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
