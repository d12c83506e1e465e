//! Boundary to the text-generation service that writes the report narrative.
//!
//! The service is opaque: a prompt goes in, markdown-lite text comes out.

use std::fmt::Write as _;

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::ReportPayload;
use crate::render::format_amount;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("narrative generation failed: {0}")]
pub struct NarrativeError(pub String);

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, payload: &ReportPayload) -> Result<String, NarrativeError>;
}

/// Returns the incident text unchanged. Used when no generator is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoNarrator;

#[async_trait]
impl NarrativeGenerator for EchoNarrator {
    async fn generate(&self, _prompt: &str, payload: &ReportPayload) -> Result<String, NarrativeError> {
        Ok(payload.incident_text.clone())
    }
}

/// Prompt asking for a sentence-per-line narrative with `#` headings and `-`
/// bullets, which is what the block parser expects.
pub fn build_prompt(payload: &ReportPayload) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Write the monthly report for subject {} covering {}.",
        payload.subject_id, payload.period
    );
    prompt.push_str(
        "Use '# ' for the title, '## ' for sections and '- ' for bullet points. \
         Put one sentence per line. Do not use any other markup.\n\n",
    );
    prompt.push_str("Incidents reported this month:\n");
    prompt.push_str(&payload.incident_text);
    prompt.push('\n');

    if !payload.costs.is_empty() {
        prompt.push_str("\nCosts:\n");
        for row in &payload.costs {
            let _ = writeln!(prompt, "- {} {}: {}", row.date, row.concept, format_amount(row.amount));
        }
        let _ = writeln!(prompt, "Total: {}", format_amount(payload.totals.total_cost));
    }
    if !payload.images.is_empty() {
        let _ = writeln!(prompt, "\n{} photos are attached.", payload.images.len());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{build_payload, RawCostRow};

    #[test]
    fn prompt_lists_costs_and_total() {
        let payload = build_payload(
            "p-1",
            "2026-02",
            "Leak in unit 3.",
            &[],
            &[RawCostRow::new("2026-02-01", "Plumber", 1200.0)],
        );
        let prompt = build_prompt(&payload);
        assert!(prompt.contains("subject p-1 covering 2026-02"));
        assert!(prompt.contains("- 2026-02-01 Plumber: 1,200.00"));
        assert!(prompt.contains("Total: 1,200.00"));
        assert!(!prompt.contains("photos"));
    }

    #[tokio::test]
    async fn echo_returns_incident_text() {
        let payload = build_payload("p-1", "2026-02", "  Quiet month.  ", &[], &[]);
        let text = EchoNarrator.generate("ignored", &payload).await.unwrap();
        assert_eq!(text, "Quiet month.");
    }
}
