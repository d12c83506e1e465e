//! Raw UI-facing input rows and the canonical payload they normalize into.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A loosely typed number as it arrives from a form: either already numeric
/// or still the text the user typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    /// Parses the value; blank text and non-numeric text yield `None`.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            RawNumber::Number(n) => Some(*n),
            RawNumber::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, RawNumber::Text(s) if s.trim().is_empty())
    }
}

impl Default for RawNumber {
    fn default() -> Self {
        RawNumber::Text(String::new())
    }
}

impl From<f64> for RawNumber {
    fn from(value: f64) -> Self {
        RawNumber::Number(value)
    }
}

impl From<&str> for RawNumber {
    fn from(value: &str) -> Self {
        RawNumber::Text(value.to_string())
    }
}

/// A cost row exactly as the entry form holds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCostRow {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub amount: RawNumber,
}

impl RawCostRow {
    pub fn new(date: &str, concept: &str, amount: impl Into<RawNumber>) -> Self {
        Self {
            date: date.to_string(),
            concept: concept.to_string(),
            amount: amount.into(),
        }
    }
}

/// An image row as uploaded by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawImageRow {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub order: Option<RawNumber>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawImageRow {
    pub fn new(url: &str, order: i64) -> Self {
        Self {
            url: url.to_string(),
            caption: None,
            order: Some(RawNumber::Number(order as f64)),
            name: None,
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = Some(caption.to_string());
        self
    }
}

/// Everything a generation request carries before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReportInput {
    pub subject_id: String,
    pub period: String,
    pub incident_text: String,
    #[serde(default)]
    pub images: Vec<RawImageRow>,
    #[serde(default)]
    pub costs: Vec<RawCostRow>,
}

/// A validated cost entry. Rows reaching this type have every field valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRow {
    pub date: String,
    pub concept: String,
    pub amount: f64,
}

/// A validated image reference; `order` defines render sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub order: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub total_cost: f64,
}

/// The canonical, orderable payload for one (subject, period) generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub subject_id: String,
    pub period: String,
    pub incident_text: String,
    pub costs: Vec<CostRow>,
    pub images: Vec<ImageItem>,
    pub totals: Totals,
}

/// A `YYYY-MM` month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period {0:?}: expected YYYY-MM")]
pub struct PeriodParseError(pub String);

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        ((0..=9999).contains(&year) && (1..=12).contains(&month)).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Constructor guarantees a valid month.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// `[first-of-month, first-of-next-month)`.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let from = self.first_day();
        let to = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        }
        .unwrap_or(NaiveDate::MAX);
        (from, to)
    }

    /// Whether `date` (a `YYYY-MM-DD` string) falls inside this month.
    pub fn contains(&self, date: &str) -> bool {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(|d| d.year() == self.year && d.month() == self.month)
            .unwrap_or(false)
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let shape_ok = bytes.len() == 7
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        if !shape_ok {
            return Err(PeriodParseError(s.to_string()));
        }
        let year: i32 = s[..4].parse().map_err(|_| PeriodParseError(s.to_string()))?;
        let month: u32 = s[5..].parse().map_err(|_| PeriodParseError(s.to_string()))?;
        Period::new(year, month).ok_or_else(|| PeriodParseError(s.to_string()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// `YYYY-MM-DD` with a real calendar date.
pub fn is_iso_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Absolute `http`/`https` URL with a non-empty host.
pub fn is_http_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    let rest = if let Some(rest) = lower.strip_prefix("https://") {
        rest
    } else if let Some(rest) = lower.strip_prefix("http://") {
        rest
    } else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && !s.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_exact_shape_only() {
        assert_eq!("2026-02".parse::<Period>().map(|p| p.to_string()), Ok("2026-02".into()));
        for bad in ["2026-2", "2026-13", "2026-00", "26-02", "2026/02", " 2026-02", "2026-02-01"] {
            assert!(bad.parse::<Period>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn period_range_rolls_over_year() {
        let p: Period = "2025-12".parse().unwrap();
        let (from, to) = p.date_range();
        assert_eq!(from.to_string(), "2025-12-01");
        assert_eq!(to.to_string(), "2026-01-01");

        let p: Period = "2026-02".parse().unwrap();
        assert_eq!(p.date_range().1.to_string(), "2026-03-01");
        assert!(p.contains("2026-02-28"));
        assert!(!p.contains("2026-03-01"));
    }

    #[test]
    fn raw_number_parses_text() {
        assert_eq!(RawNumber::from(" 12.5 ").to_f64(), Some(12.5));
        assert_eq!(RawNumber::from("").to_f64(), None);
        assert_eq!(RawNumber::from("abc").to_f64(), None);
        assert_eq!(RawNumber::Number(3.0).to_f64(), Some(3.0));
    }

    #[test]
    fn raw_rows_deserialize_loose_json() {
        let row: RawCostRow =
            serde_json::from_str(r#"{"date":"2026-02-01","concept":"Service","amount":"100"}"#)
                .unwrap();
        assert_eq!(row.amount.to_f64(), Some(100.0));
        let row: RawCostRow = serde_json::from_str(r#"{"amount":42}"#).unwrap();
        assert_eq!(row.amount, RawNumber::Number(42.0));
        assert!(row.date.is_empty());
    }

    #[test]
    fn url_check() {
        assert!(is_http_url("https://cdn.example.com/a.png"));
        assert!(is_http_url("HTTP://example.com"));
        assert!(!is_http_url("ftp://example.com/a.png"));
        assert!(!is_http_url("/relative/a.png"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https://exa mple.com"));
    }

    #[test]
    fn iso_date_check() {
        assert!(is_iso_date("2026-02-01"));
        assert!(!is_iso_date("2026-02-30"));
        assert!(!is_iso_date("2026-2-1"));
    }
}
