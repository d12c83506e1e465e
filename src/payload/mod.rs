//! Payload normalization.
//!
//! Raw form state goes in, a canonical [`ReportPayload`] comes out:
//!
//! - cost rows are kept only when `date` and `concept` are non-empty and the
//!   amount parses to a finite number `> 0`; kept rows are sorted ascending
//!   by date string (lexicographic order is chronological for `YYYY-MM-DD`)
//! - image rows are kept only with an absolute `http(s)` URL and an integral
//!   `order`; kept rows are sorted ascending by `order` (stable)
//! - `totals.total_cost` is the sum of kept amounts
//!
//! Building never fails. Whether the result may be submitted is a separate
//! question answered by [`validate_input`] / [`validate_payload`].

mod types;
mod validate;

use std::time::Instant;

use tracing::debug;

pub use self::types::{
    is_http_url, is_iso_date, CostRow, ImageItem, Period, PeriodParseError, RawCostRow,
    RawImageRow, RawNumber, RawReportInput, ReportPayload, Totals,
};
pub use self::validate::{
    incomplete_cost_rows, validate_input, validate_payload, CostField, ValidationError,
    ValidationIssue, ValidationReport,
};

/// Normalizes one cost row; `None` drops it.
pub fn normalize_cost_row(row: &RawCostRow) -> Option<CostRow> {
    let date = row.date.trim();
    let concept = row.concept.trim();
    let amount = row.amount.to_f64()?;
    if date.is_empty() || concept.is_empty() || !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    Some(CostRow {
        date: date.to_string(),
        concept: concept.to_string(),
        amount,
    })
}

/// Normalizes one image row; `None` drops it.
pub fn normalize_image_row(row: &RawImageRow) -> Option<ImageItem> {
    let url = row.url.trim();
    if !is_http_url(url) {
        return None;
    }
    let order = row.order.as_ref()?.to_f64()?;
    if !order.is_finite() || order.fract() != 0.0 {
        return None;
    }
    Some(ImageItem {
        url: url.to_string(),
        caption: non_empty(row.caption.as_deref()),
        order: order as i64,
        name: non_empty(row.name.as_deref()),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builds the canonical payload from its parts.
pub fn build_payload(
    subject_id: &str,
    period: &str,
    incident_text: &str,
    images: &[RawImageRow],
    costs: &[RawCostRow],
) -> ReportPayload {
    let start = Instant::now();

    let mut kept_costs: Vec<CostRow> = costs.iter().filter_map(normalize_cost_row).collect();
    kept_costs.sort_by(|a, b| a.date.cmp(&b.date));
    let total_cost = kept_costs.iter().map(|row| row.amount).sum();

    let mut kept_images: Vec<ImageItem> = images.iter().filter_map(normalize_image_row).collect();
    kept_images.sort_by_key(|image| image.order);

    debug!(
        subject_id = %subject_id.trim(),
        period = %period.trim(),
        costs_in = costs.len(),
        costs_kept = kept_costs.len(),
        images_in = images.len(),
        images_kept = kept_images.len(),
        elapsed_micros = start.elapsed().as_micros(),
        "payload_built"
    );

    ReportPayload {
        subject_id: subject_id.trim().to_string(),
        period: period.trim().to_string(),
        incident_text: incident_text.trim().to_string(),
        costs: kept_costs,
        images: kept_images,
        totals: Totals { total_cost },
    }
}

/// Stateless facade over [`build_payload`] and the validators.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadBuilder;

impl PayloadBuilder {
    pub fn build(&self, input: &RawReportInput) -> ReportPayload {
        build_payload(
            &input.subject_id,
            &input.period,
            &input.incident_text,
            &input.images,
            &input.costs,
        )
    }

    pub fn validate(&self, payload: &ReportPayload) -> ValidationReport {
        validate_payload(payload)
    }

    pub fn validate_input(&self, input: &RawReportInput) -> ValidationReport {
        validate_input(input)
    }
}
