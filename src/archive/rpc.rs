use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::backend::ArchiveProcedure;
use super::error::{ArchiveRpcError, FailureKind, RpcFailureKind};
use super::types::{ArchiveOutcome, ArchiveRequest};

#[derive(Debug, Deserialize)]
struct ProcedureResponse {
    ok: bool,
    #[serde(default)]
    archived: u64,
    #[serde(default)]
    replayed: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Calls the archive procedure as a JSON POST.
///
/// The body is the [`ArchiveRequest`]; the response is
/// `{ "ok": bool, "archived": n, "replayed": bool, "error": "..." }`.
#[derive(Debug, Clone)]
pub struct HttpArchiveProcedure {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpArchiveProcedure {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

fn classify(err: &reqwest::Error) -> RpcFailureKind {
    if err.is_connect() || err.is_timeout() {
        RpcFailureKind::Transport
    } else if let Some(status) = err.status() {
        FailureKind::from_status(status.as_u16()).into()
    } else {
        RpcFailureKind::Other
    }
}

#[async_trait]
impl ArchiveProcedure for HttpArchiveProcedure {
    async fn archive_range(&self, request: &ArchiveRequest) -> Result<ArchiveOutcome, ArchiveRpcError> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| ArchiveRpcError::new(classify(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArchiveRpcError::new(
                FailureKind::from_status(status.as_u16()).into(),
                format!("HTTP {status}: {body}"),
            ));
        }

        let parsed: ProcedureResponse = response
            .json()
            .await
            .map_err(|e| ArchiveRpcError::new(RpcFailureKind::Other, e.to_string()))?;
        if !parsed.ok {
            return Err(ArchiveRpcError::rejected(
                parsed.error.unwrap_or_else(|| "procedure returned ok=false".to_string()),
            ));
        }
        debug!(run_id = %request.run_id, archived = parsed.archived, "archive_rpc_ok");
        Ok(ArchiveOutcome {
            archived: parsed.archived,
            replayed: parsed.replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_defaults_are_lenient() {
        let parsed: ProcedureResponse = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(parsed.ok);
        assert_eq!(parsed.archived, 0);
        assert!(!parsed.replayed);

        let parsed: ProcedureResponse =
            serde_json::from_str(r#"{"ok":false,"error":"range locked"}"#).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("range locked"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport() {
        let procedure = HttpArchiveProcedure::new("http://127.0.0.1:9/archive", Duration::from_secs(2)).unwrap();
        let request = ArchiveRequest {
            subject_id: "p-1".into(),
            from: chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            to: chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            run_id: "run".into(),
        };
        let err = procedure.archive_range(&request).await.unwrap_err();
        assert_eq!(err.kind, RpcFailureKind::Transport);
    }
}
