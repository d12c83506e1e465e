//! Paginated document rendering.
//!
//! The renderer walks a single vertical cursor down the page. Before any
//! atomic unit is drawn (a wrapped line, a table row, an image with its
//! caption) it checks `cursor - h < margin` and, if so, starts a new page with
//! the cursor back at `page_height - margin`. There is no look-ahead beyond the
//! unit being drawn. A cost table that crosses a page break gets its header
//! row redrawn on the new page.
//!
//! Images are fetched concurrently but embedded strictly in request order;
//! a failed fetch or decode is replaced by a one-line placeholder and the
//! document carries on.
//!
//! ```rust
//! use std::sync::Arc;
//! use monthly_report::blocks::parse_blocks;
//! use monthly_report::render::{DocumentRenderer, RenderRequest, StaticImageFetcher, PDF_MAGIC};
//!
//! let renderer = DocumentRenderer::new(Arc::new(StaticImageFetcher::new()));
//! let request = RenderRequest::new("Monthly report", "2026-02", parse_blocks("# Hello\nWorld"));
//! let doc = renderer.compose(&request, Vec::new());
//! assert!(doc.bytes.starts_with(PDF_MAGIC));
//! ```

mod fetch;
mod font;
mod images;
mod layout;
mod money;
mod pdf;
mod wrap;

use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use crate::blocks::{HeadingLevel, ReportBlock};
use crate::payload::{CostRow, ImageItem, ReportPayload};

pub use self::fetch::{ImageFetcher, StaticImageFetcher};
#[cfg(feature = "http")]
pub use self::fetch::HttpImageFetcher;
pub use self::font::{encode_win_ansi, FontMetrics, StandardFont};
pub use self::images::{decode_image, fit_rect, sniff_format, ResourceFetchError, SniffedFormat};
pub use self::layout::{LayoutOverrides, LayoutSpec, PageSize, Rgb};
pub use self::money::{format_amount, MoneyFormatter};
pub use self::pdf::{ColorSpace, ImageFilter, PdfDocument, PdfImage, PDF_MAGIC};
pub use self::wrap::wrap_text;

/// Every user-visible string the renderer draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportLabels {
    pub default_title: String,
    pub period_label: String,
    pub costs_heading: String,
    pub date_header: String,
    pub concept_header: String,
    pub amount_header: String,
    pub total_label: String,
    pub no_costs: String,
    pub images_heading: String,
    pub image_error_prefix: String,
    /// `{page}` and `{pages}` are substituted.
    pub page_footer: String,
}

impl Default for ReportLabels {
    fn default() -> Self {
        Self {
            default_title: "Monthly Report".into(),
            period_label: "Period".into(),
            costs_heading: "Costs".into(),
            date_header: "Date".into(),
            concept_header: "Concept".into(),
            amount_header: "Amount".into(),
            total_label: "Total".into(),
            no_costs: "No costs recorded for this period.".into(),
            images_heading: "Images".into(),
            image_error_prefix: "could not load image:".into(),
            page_footer: "Page {page} of {pages}".into(),
        }
    }
}

impl ReportLabels {
    fn footer(&self, page: usize, pages: usize) -> String {
        self.page_footer
            .replace("{page}", &page.to_string())
            .replace("{pages}", &pages.to_string())
    }
}

/// An image to place in the document, in render order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderImage {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

impl From<&ImageItem> for RenderImage {
    fn from(item: &ImageItem) -> Self {
        Self {
            url: item.url.clone(),
            caption: item.caption.clone(),
        }
    }
}

/// Everything needed to lay out one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub period: String,
    pub blocks: Vec<ReportBlock>,
    #[serde(default)]
    pub costs: Vec<CostRow>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub images: Vec<RenderImage>,
    #[serde(default)]
    pub layout: Option<LayoutOverrides>,
}

impl RenderRequest {
    pub fn new(title: &str, period: &str, blocks: Vec<ReportBlock>) -> Self {
        Self {
            title: title.to_string(),
            subtitle: None,
            period: period.to_string(),
            blocks,
            costs: Vec::new(),
            total_cost: 0.0,
            images: Vec::new(),
            layout: None,
        }
    }

    /// Request for a canonical payload: its costs, total and images in order.
    pub fn from_payload(title: &str, blocks: Vec<ReportBlock>, payload: &ReportPayload) -> Self {
        Self {
            costs: payload.costs.clone(),
            total_cost: payload.totals.total_cost,
            images: payload.images.iter().map(RenderImage::from).collect(),
            ..Self::new(title, &payload.period, blocks)
        }
    }

    pub fn with_subtitle(mut self, subtitle: &str) -> Self {
        self.subtitle = Some(subtitle.to_string());
        self
    }

    pub fn with_layout(mut self, overrides: LayoutOverrides) -> Self {
        self.layout = Some(overrides);
        self
    }
}

/// What happened to each requested image, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Embedded { url: String },
    Placeholder { url: String, error: ResourceFetchError },
}

impl ImageOutcome {
    pub fn is_embedded(&self) -> bool {
        matches!(self, ImageOutcome::Embedded { .. })
    }
}

/// The rendered artifact plus a summary of the layout pass.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Bytes,
    pub page_count: usize,
    /// How many times the cost-table header row was drawn.
    pub table_header_count: usize,
    pub image_outcomes: Vec<ImageOutcome>,
}

impl RenderedDocument {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub type LoadedImage = Result<PdfImage, ResourceFetchError>;

/// Renders report requests into PDF buffers.
#[derive(Clone)]
pub struct DocumentRenderer {
    layout: LayoutSpec,
    labels: ReportLabels,
    money: Option<MoneyFormatter>,
    fetcher: Arc<dyn ImageFetcher>,
    fetch_concurrency: usize,
}

impl DocumentRenderer {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            layout: LayoutSpec::default(),
            labels: ReportLabels::default(),
            money: None,
            fetcher,
            fetch_concurrency: 4,
        }
    }

    pub fn with_layout(mut self, layout: LayoutSpec) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_labels(mut self, labels: ReportLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_money_formatter(mut self, formatter: MoneyFormatter) -> Self {
        self.money = Some(formatter);
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn labels(&self) -> &ReportLabels {
        &self.labels
    }

    /// Fetches the request's images, then lays out the document.
    pub async fn render(&self, request: &RenderRequest) -> RenderedDocument {
        let loaded = self.load_images(&request.images).await;
        self.compose(request, loaded)
    }

    /// Fetches and decodes images concurrently. The returned vector is in
    /// request order whatever order the fetches complete in.
    pub async fn load_images(&self, images: &[RenderImage]) -> Vec<LoadedImage> {
        let fetcher = &self.fetcher;
        stream::iter(images.iter().map(|image| async move {
            let bytes = fetcher.fetch(&image.url).await?;
            decode_image(&image.url, &bytes)
        }))
        .buffered(self.fetch_concurrency)
        .collect()
        .await
    }

    /// Pure layout pass over already-loaded images. `loaded[i]` belongs to
    /// `request.images[i]`; a missing entry is treated as a failed fetch.
    pub fn compose(&self, request: &RenderRequest, loaded: Vec<LoadedImage>) -> RenderedDocument {
        let start = Instant::now();
        let span = tracing::span!(Level::INFO, "render.compose", period = %request.period);
        let _guard = span.enter();

        let spec = match &request.layout {
            Some(overrides) => self.layout.clone().with_overrides(overrides),
            None => self.layout.clone(),
        };
        let mut composer = Composer::new(&spec, &self.labels, &request.title);

        composer.title_block(&request.title, request.subtitle.as_deref(), &request.period);
        for block in &request.blocks {
            match block {
                ReportBlock::Heading { text, level } => composer.heading(text, *level),
                ReportBlock::Paragraph { text } => composer.paragraph(text),
                ReportBlock::BulletGroup { items } => composer.bullets(items),
            }
        }
        composer.cost_table(&request.costs, request.total_cost, |amount| {
            match &self.money {
                Some(format) => format(amount),
                None => format_amount(amount),
            }
        });

        let mut loaded = loaded.into_iter();
        let mut outcomes = Vec::with_capacity(request.images.len());
        if !request.images.is_empty() {
            composer.heading(&self.labels.images_heading, HeadingLevel::H2);
        }
        for image in &request.images {
            let result = loaded.next().unwrap_or_else(|| {
                Err(ResourceFetchError::NotFound {
                    url: image.url.clone(),
                })
            });
            match result {
                Ok(pdf_image) => {
                    composer.image(pdf_image, image.caption.as_deref());
                    outcomes.push(ImageOutcome::Embedded {
                        url: image.url.clone(),
                    });
                }
                Err(error) => {
                    warn!(url = %image.url, error = %error, "image_fetch_failed");
                    composer.image_placeholder(&image.url);
                    outcomes.push(ImageOutcome::Placeholder {
                        url: image.url.clone(),
                        error,
                    });
                }
            }
        }

        let table_header_count = composer.table_headers;
        let doc = composer.finish();
        let page_count = doc.page_count();
        let bytes = Bytes::from(doc.finish());

        info!(
            pages = page_count,
            table_headers = table_header_count,
            images_embedded = outcomes.iter().filter(|o| o.is_embedded()).count(),
            images_failed = outcomes.iter().filter(|o| !o.is_embedded()).count(),
            bytes = bytes.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "render_complete"
        );

        RenderedDocument {
            bytes,
            page_count,
            table_header_count,
            image_outcomes: outcomes,
        }
    }
}

struct Composer<'a> {
    doc: PdfDocument,
    spec: &'a LayoutSpec,
    labels: &'a ReportLabels,
    cursor: f64,
    table_headers: usize,
}

impl<'a> Composer<'a> {
    fn new(spec: &'a LayoutSpec, labels: &'a ReportLabels, title: &str) -> Self {
        let mut doc = PdfDocument::new(spec.page_width(), spec.page_height());
        doc.set_title(title);
        doc.add_page();
        Self {
            doc,
            spec,
            labels,
            cursor: spec.top(),
            table_headers: 0,
        }
    }

    fn new_page(&mut self) {
        self.doc.add_page();
        self.cursor = self.spec.top();
    }

    /// Starts a new page when `height` does not fit above the bottom margin.
    fn ensure_space(&mut self, height: f64) -> bool {
        if self.cursor - height < self.spec.margin {
            self.new_page();
            true
        } else {
            false
        }
    }

    fn left(&self) -> f64 {
        self.spec.margin
    }

    fn title_block(&mut self, title: &str, subtitle: Option<&str>, period: &str) {
        let size = self.spec.heading_size(1);
        self.text_lines(title, StandardFont::HelveticaBold, size, self.spec.primary_color, size + 4.0, 6.0);
        let body = self.spec.body_size;
        if let Some(subtitle) = subtitle.filter(|s| !s.trim().is_empty()) {
            self.text_lines(subtitle, StandardFont::Helvetica, body, Rgb::BLACK, body + 3.0, 0.0);
        }
        let period_line = format!("{}: {period}", self.labels.period_label);
        self.text_lines(&period_line, StandardFont::Helvetica, body, Rgb::GREY, body + 3.0, 0.0);

        self.ensure_space(12.0);
        self.cursor -= 4.0;
        let width = self.spec.content_width();
        let left = self.left();
        self.doc.line(self.spec.primary_color, 1.0, (left, self.cursor), (left + width, self.cursor));
        self.cursor -= 8.0;
    }

    /// Draws wrapped lines advancing `line_height` each, then `gap` below.
    fn text_lines(&mut self, text: &str, font: StandardFont, size: f64, color: Rgb, line_height: f64, gap: f64) {
        for line in wrap_text(text, &font, size, self.spec.content_width()) {
            self.ensure_space(line_height);
            let x = self.left();
            self.doc.text(font, size, color, x, self.cursor - size, &line);
            self.cursor -= line_height;
        }
        self.cursor -= gap;
    }

    fn heading(&mut self, text: &str, level: HeadingLevel) {
        let size = self.spec.heading_size(level.as_u8());
        let color = if level == HeadingLevel::H1 {
            self.spec.primary_color
        } else {
            Rgb::BLACK
        };
        let lines = wrap_text(text, &StandardFont::HelveticaBold, size, self.spec.content_width());
        for (i, line) in lines.iter().enumerate() {
            self.ensure_space(if i == 0 { size + 10.0 } else { size + 4.0 });
            let x = self.left();
            self.doc.text(StandardFont::HelveticaBold, size, color, x, self.cursor - size, line);
            self.cursor -= size + 4.0;
        }
        self.cursor -= 6.0;
    }

    fn paragraph(&mut self, text: &str) {
        let size = self.spec.body_size;
        let line_height = size + 3.0;
        for line in wrap_text(text, &StandardFont::Helvetica, size, self.spec.content_width()) {
            self.ensure_space(line_height);
            let x = self.left();
            self.doc.text(StandardFont::Helvetica, size, Rgb::BLACK, x, self.cursor - size, &line);
            self.cursor -= line_height;
        }
        self.cursor -= 8.0;
    }

    fn bullets(&mut self, items: &[String]) {
        let size = self.spec.body_size;
        let line_height = size + 3.0;
        let indent = self.spec.bullet_indent;
        let width = (self.spec.content_width() - indent).max(size);
        for item in items {
            let lines = wrap_text(item, &StandardFont::Helvetica, size, width);
            for (i, line) in lines.iter().enumerate() {
                self.ensure_space(line_height);
                let baseline = self.cursor - size;
                let left = self.left();
                if i == 0 {
                    self.doc.text(StandardFont::Helvetica, size, Rgb::BLACK, left + 2.0, baseline, "\u{2022}");
                }
                self.doc.text(StandardFont::Helvetica, size, Rgb::BLACK, left + indent, baseline, line);
                self.cursor -= line_height;
            }
            self.cursor -= 2.0;
        }
        self.cursor -= 6.0;
    }

    fn column_x(&self) -> (f64, f64, f64) {
        let date_x = self.left();
        let concept_x = date_x + self.spec.date_column_width + self.spec.column_gutter;
        let amount_x = concept_x + self.spec.concept_column_width() + self.spec.column_gutter;
        (date_x, concept_x, amount_x)
    }

    fn table_header(&mut self) {
        let size = self.spec.table_size;
        let height = size + 8.0;
        self.ensure_space(height);
        let (date_x, concept_x, amount_x) = self.column_x();
        let left = self.left();
        let width = self.spec.content_width();
        self.doc.fill_rect(self.spec.primary_color, left, self.cursor - height, width, height);
        let baseline = self.cursor - size - 2.0;
        let bold = StandardFont::HelveticaBold;
        self.doc.text(bold, size, Rgb::WHITE, date_x + 2.0, baseline, &self.labels.date_header);
        self.doc.text(bold, size, Rgb::WHITE, concept_x, baseline, &self.labels.concept_header);
        let amount_label = self.labels.amount_header.clone();
        let amount_right = self.right_aligned_x(amount_x, &amount_label, bold, size);
        self.doc.text(bold, size, Rgb::WHITE, amount_right, baseline, &amount_label);
        self.cursor -= height;
        self.table_headers += 1;
    }

    fn right_aligned_x(&self, column_x: f64, text: &str, font: StandardFont, size: f64) -> f64 {
        let right_edge = column_x + self.spec.amount_column_width - 2.0;
        (right_edge - font.text_width(text, size)).max(column_x)
    }

    fn cost_table(&mut self, costs: &[CostRow], total: f64, format: impl Fn(f64) -> String) {
        self.heading(&self.labels.costs_heading.clone(), HeadingLevel::H2);
        if costs.is_empty() {
            let line = self.labels.no_costs.clone();
            self.paragraph(&line);
            return;
        }

        let size = self.spec.table_size;
        let line_height = size + 3.0;
        let regular = StandardFont::Helvetica;
        // Keep the header with at least one single-line row.
        self.ensure_space(size + 8.0 + line_height + 6.0);
        self.table_header();

        for row in costs {
            let lines = wrap_text(&row.concept, &regular, size, self.spec.concept_column_width());
            let row_height = lines.len() as f64 * line_height + 6.0;
            if self.ensure_space(row_height) {
                self.table_header();
            }
            let (date_x, concept_x, amount_x) = self.column_x();
            let baseline = self.cursor - size - 2.0;
            self.doc.text(regular, size, Rgb::BLACK, date_x + 2.0, baseline, &row.date);
            for (i, line) in lines.iter().enumerate() {
                self.doc.text(regular, size, Rgb::BLACK, concept_x, baseline - i as f64 * line_height, line);
            }
            let amount = format(row.amount);
            let x = self.right_aligned_x(amount_x, &amount, regular, size);
            self.doc.text(regular, size, Rgb::BLACK, x, baseline, &amount);
            self.cursor -= row_height;
            let left = self.left();
            let width = self.spec.content_width();
            self.doc.line(Rgb::LIGHT_GREY, 0.5, (left, self.cursor), (left + width, self.cursor));
        }

        let bold = StandardFont::HelveticaBold;
        let total_height = line_height + 6.0;
        if self.ensure_space(total_height) {
            self.table_header();
        }
        let (_, concept_x, amount_x) = self.column_x();
        let baseline = self.cursor - size - 2.0;
        let label = self.labels.total_label.clone();
        self.doc.text(bold, size, Rgb::BLACK, concept_x, baseline, &label);
        let amount = format(total);
        let x = self.right_aligned_x(amount_x, &amount, bold, size);
        self.doc.text(bold, size, Rgb::BLACK, x, baseline, &amount);
        self.cursor -= total_height + 8.0;
    }

    fn image(&mut self, image: PdfImage, caption: Option<&str>) {
        let caption_size = self.spec.caption_size;
        let caption_line = caption_size + 3.0;
        let width = self.spec.content_width();
        let caption_lines = caption
            .filter(|c| !c.trim().is_empty())
            .map(|c| wrap_text(c, &StandardFont::Helvetica, caption_size, width))
            .unwrap_or_default();
        let caption_height = caption_lines.len() as f64 * caption_line;

        let max_height = self
            .spec
            .image_max_height
            .min(self.spec.content_height() - caption_height - 14.0)
            .max(1.0);
        let (w, h) = fit_rect(f64::from(image.width), f64::from(image.height), width, max_height);
        self.ensure_space(h + 4.0 + caption_height + 10.0);

        let handle = self.doc.add_image(image);
        let left = self.left();
        self.doc.draw_image(handle, left, self.cursor - h, w, h);
        self.cursor -= h + 4.0;
        for line in caption_lines {
            self.doc.text(StandardFont::Helvetica, caption_size, Rgb::GREY, left, self.cursor - caption_size, &line);
            self.cursor -= caption_line;
        }
        self.cursor -= 10.0;
    }

    fn image_placeholder(&mut self, url: &str) {
        let size = self.spec.body_size;
        self.ensure_space(size + 9.0);
        let text = format!("{} {url}", self.labels.image_error_prefix);
        let left = self.left();
        self.doc.text(StandardFont::Helvetica, size, Rgb::ERROR_RED, left, self.cursor - size, &text);
        self.cursor -= size + 9.0;
    }

    /// Stamps page footers and hands back the document.
    fn finish(mut self) -> PdfDocument {
        let pages = self.doc.page_count();
        let size = self.spec.footer_size;
        let right = self.spec.page_width() - self.spec.margin;
        let y = (self.spec.margin / 2.0).max(2.0);
        for page in 0..pages {
            let footer = self.labels.footer(page + 1, pages);
            let x = right - StandardFont::Helvetica.text_width(&footer, size);
            self.doc.text_on(page, StandardFont::Helvetica, size, Rgb::GREY, x, y, &footer);
        }
        self.doc
    }
}
