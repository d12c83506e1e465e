//! Advisory validation.
//!
//! Validation never mutates and never drops anything; it reports. Building
//! ([`build_payload`](crate::payload::build_payload)) is deliberately more
//! lenient: a half-filled cost row is silently dropped by the builder but is
//! reported here as [`ValidationIssue::IncompleteCostRow`], which blocks
//! submission from an interactive entry form.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::types::{
    is_http_url, is_iso_date, Period, RawCostRow, RawImageRow, RawReportInput, ReportPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostField {
    Date,
    Concept,
    Amount,
}

impl fmt::Display for CostField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CostField::Date => "date",
            CostField::Concept => "concept",
            CostField::Amount => "amount",
        })
    }
}

/// One structural problem found in an input or payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "issue", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ValidationIssue {
    #[error("subject id is required")]
    MissingSubject,
    #[error("period {value:?} is not a valid YYYY-MM month")]
    InvalidPeriod { value: String },
    #[error("incident text is empty")]
    EmptyIncidentText,
    #[error("cost row {index}: invalid {field}")]
    InvalidCostRow { index: usize, field: CostField },
    #[error("cost row {index} is incomplete: date, concept and a positive amount are all required")]
    IncompleteCostRow { index: usize },
    #[error("image {index}: {url:?} is not an absolute http(s) URL")]
    InvalidImageUrl { index: usize, url: String },
    #[error("image {index}: order must be an integer")]
    InvalidImageOrder { index: usize },
}

/// `{ ok, errors }` result of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.ok {
            Ok(())
        } else {
            Err(ValidationError {
                issues: self.errors,
            })
        }
    }
}

/// A payload failed structural checks; raised before rendering starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("report input failed validation: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn header_issues(subject_id: &str, period: &str, incident_text: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if subject_id.trim().is_empty() {
        issues.push(ValidationIssue::MissingSubject);
    }
    if period.trim().parse::<Period>().is_err() {
        issues.push(ValidationIssue::InvalidPeriod {
            value: period.to_string(),
        });
    }
    if incident_text.trim().is_empty() {
        issues.push(ValidationIssue::EmptyIncidentText);
    }
    issues
}

/// Re-checks a canonical payload. A payload straight out of the builder can
/// still fail here on subject, period or incident text.
pub fn validate_payload(payload: &ReportPayload) -> ValidationReport {
    let mut issues = header_issues(&payload.subject_id, &payload.period, &payload.incident_text);
    for (index, row) in payload.costs.iter().enumerate() {
        if !is_iso_date(&row.date) {
            issues.push(ValidationIssue::InvalidCostRow {
                index,
                field: CostField::Date,
            });
        }
        if row.concept.trim().is_empty() {
            issues.push(ValidationIssue::InvalidCostRow {
                index,
                field: CostField::Concept,
            });
        }
        if !(row.amount.is_finite() && row.amount > 0.0) {
            issues.push(ValidationIssue::InvalidCostRow {
                index,
                field: CostField::Amount,
            });
        }
    }
    for (index, image) in payload.images.iter().enumerate() {
        if !is_http_url(image.url.trim()) {
            issues.push(ValidationIssue::InvalidImageUrl {
                index,
                url: image.url.clone(),
            });
        }
    }
    ValidationReport::from_issues(issues)
}

/// Submission-time validation of raw form state. Fully blank cost rows are
/// empty editor rows and are ignored.
pub fn validate_input(input: &RawReportInput) -> ValidationReport {
    let mut issues = header_issues(&input.subject_id, &input.period, &input.incident_text);
    for (index, row) in input.costs.iter().enumerate() {
        issues.extend(cost_row_issues(index, row));
    }
    for (index, image) in input.images.iter().enumerate() {
        issues.extend(image_row_issues(index, image));
    }
    ValidationReport::from_issues(issues)
}

fn cost_row_issues(index: usize, row: &RawCostRow) -> Vec<ValidationIssue> {
    let has_date = !row.date.trim().is_empty();
    let has_concept = !row.concept.trim().is_empty();
    let amount = row.amount.to_f64();
    let valid_amount = amount.is_some_and(|a| a.is_finite() && a > 0.0);

    let filled = [has_date, has_concept, valid_amount]
        .iter()
        .filter(|f| **f)
        .count();
    if filled == 0 && row.amount.is_blank() {
        return Vec::new();
    }

    let mut issues = Vec::new();
    if !row.amount.is_blank() && !valid_amount {
        issues.push(ValidationIssue::InvalidCostRow {
            index,
            field: CostField::Amount,
        });
    }
    if has_date && !is_iso_date(row.date.trim()) {
        issues.push(ValidationIssue::InvalidCostRow {
            index,
            field: CostField::Date,
        });
    }
    if filled < 3 && issues.is_empty() {
        issues.push(ValidationIssue::IncompleteCostRow { index });
    }
    issues
}

fn image_row_issues(index: usize, row: &RawImageRow) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if !is_http_url(row.url.trim()) {
        issues.push(ValidationIssue::InvalidImageUrl {
            index,
            url: row.url.clone(),
        });
    }
    let order_ok = row
        .order
        .as_ref()
        .and_then(|o| o.to_f64())
        .is_some_and(|o| o.is_finite() && o.fract() == 0.0);
    if !order_ok {
        issues.push(ValidationIssue::InvalidImageOrder { index });
    }
    issues
}

/// Indices of cost rows with some, but not all, of date / concept / valid
/// amount filled in. These block submission even though the builder would
/// simply drop them.
pub fn incomplete_cost_rows(rows: &[RawCostRow]) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(index, row)| {
            cost_row_issues(*index, row)
                .iter()
                .any(|issue| matches!(issue, ValidationIssue::IncompleteCostRow { .. }))
        })
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::types::RawNumber;

    fn input() -> RawReportInput {
        RawReportInput {
            subject_id: "prop-1".into(),
            period: "2026-02".into(),
            incident_text: "Roof leak repaired.".into(),
            images: vec![RawImageRow::new("https://cdn.example.com/a.jpg", 1)],
            costs: vec![RawCostRow::new("2026-02-01", "Service", 100.0)],
        }
    }

    #[test]
    fn valid_input_passes() {
        let report = validate_input(&input());
        assert!(report.ok, "{:?}", report.errors);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn header_fields_are_flagged() {
        let mut raw = input();
        raw.subject_id = " ".into();
        raw.period = "2026-2".into();
        raw.incident_text = "\n".into();
        let report = validate_input(&raw);
        assert!(!report.ok);
        assert_eq!(
            report.errors,
            vec![
                ValidationIssue::MissingSubject,
                ValidationIssue::InvalidPeriod {
                    value: "2026-2".into()
                },
                ValidationIssue::EmptyIncidentText,
            ]
        );
    }

    #[test]
    fn half_filled_cost_row_blocks_submission() {
        let mut raw = input();
        raw.costs.push(RawCostRow::new("2026-02-03", "", ""));
        raw.costs.push(RawCostRow::default());
        let report = validate_input(&raw);
        assert_eq!(report.errors, vec![ValidationIssue::IncompleteCostRow { index: 1 }]);
        assert_eq!(incomplete_cost_rows(&raw.costs), vec![1]);
    }

    #[test]
    fn bad_fields_in_filled_rows_are_invalid() {
        let rows = vec![
            RawCostRow::new("2026-02-01", "Paint", "-5"),
            RawCostRow::new("01/02/2026", "Paint", 5.0),
        ];
        let mut raw = input();
        raw.costs = rows;
        let report = validate_input(&raw);
        assert_eq!(
            report.errors,
            vec![
                ValidationIssue::InvalidCostRow {
                    index: 0,
                    field: CostField::Amount
                },
                ValidationIssue::InvalidCostRow {
                    index: 1,
                    field: CostField::Date
                },
            ]
        );
    }

    #[test]
    fn image_rows_are_checked() {
        let mut raw = input();
        raw.images = vec![
            RawImageRow::new("data:image/png;base64,AAAA", 1),
            RawImageRow {
                url: "https://x.example/b.png".into(),
                order: Some(RawNumber::Number(1.5)),
                ..Default::default()
            },
        ];
        let report = validate_input(&raw);
        assert_eq!(
            report.errors,
            vec![
                ValidationIssue::InvalidImageUrl {
                    index: 0,
                    url: "data:image/png;base64,AAAA".into()
                },
                ValidationIssue::InvalidImageOrder { index: 1 },
            ]
        );
    }

    #[test]
    fn validation_error_lists_every_issue() {
        let mut raw = input();
        raw.subject_id.clear();
        raw.incident_text.clear();
        let err = validate_input(&raw).into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("subject id is required"));
        assert!(message.contains("incident text is empty"));
    }
}
