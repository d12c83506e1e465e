//! YAML configuration for the report pipeline.
//!
//! Every section is optional and falls back to defaults. Layout values are
//! cosmetic: a malformed color or unknown page size is ignored at render time
//! instead of failing the load. `validate` only rejects structural problems.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "back office"
//!
//! layout:
//!   page_size: "A4"
//!   margin: 48
//!   primary_color: "#1F4E79"
//!
//! labels:
//!   default_title: "Monthly Report"
//!   empty_narrative: "No content available."
//!   page_footer: "Page {page} of {pages}"
//!
//! fetch:
//!   timeout_secs: 10
//!   max_image_bytes: 10485760
//!   concurrency: 4
//!
//! storage:
//!   backend: "redb"
//!   redb_path: "/var/lib/reports/reports.redb"
//!   blob_root: "/var/lib/reports/blobs"
//!
//! archive:
//!   endpoint: "https://ops.example.com/rpc/archive_range"
//!   api_key_env: "ARCHIVE_API_KEY"
//!   document_name: "Monthly report"
//!   document_type: "report"
//!   subtype: "monthly-reports"
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
#[cfg(feature = "http")]
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::archive::{
    ArchivalCoordinator, ArchiveProcedure, ArchiveSettings, BlobStore, DocumentStore, FsBlobStore,
    InMemoryArchiveProcedure, InMemoryBlobStore, InMemoryDocumentStore, InMemoryLedgerStore,
    LedgerStore,
};
use crate::blocks::EMPTY_NARRATIVE_PLACEHOLDER;
use crate::render::{
    DocumentRenderer, ImageFetcher, LayoutOverrides, LayoutSpec, ReportLabels, StaticImageFetcher,
};

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("failed to build {0}")]
    Backend(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportConfig {
    #[serde(default = "default_config_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub layout: LayoutYamlConfig,

    #[serde(default)]
    pub labels: LabelsYamlConfig,

    #[serde(default)]
    pub fetch: FetchYamlConfig,

    #[serde(default)]
    pub storage: StorageYamlConfig,

    #[serde(default)]
    pub archive: ArchiveYamlConfig,
}

impl ReportConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: ReportConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.fetch.validate()?;
        self.storage.validate()?;
        self.archive.validate()?;
        Ok(())
    }

    pub fn layout_spec(&self) -> LayoutSpec {
        self.layout.to_layout_spec()
    }

    /// HTTP fetcher when the `http` feature is on; otherwise an empty static
    /// fetcher, so every image renders as a placeholder.
    pub fn build_image_fetcher(&self) -> Result<Arc<dyn ImageFetcher>, ConfigLoadError> {
        #[cfg(feature = "http")]
        {
            let fetcher = crate::render::HttpImageFetcher::new(
                Duration::from_secs(self.fetch.timeout_secs),
                self.fetch.max_image_bytes,
            )
            .map_err(|e| ConfigLoadError::Backend(format!("image fetcher: {e}")))?;
            Ok(Arc::new(fetcher))
        }
        #[cfg(not(feature = "http"))]
        {
            warn!("http feature disabled; images will render as placeholders");
            Ok(Arc::new(StaticImageFetcher::new()))
        }
    }

    pub fn build_renderer(&self) -> Result<DocumentRenderer, ConfigLoadError> {
        Ok(self.renderer_with_fetcher(self.build_image_fetcher()?))
    }

    /// Renderer using this config's layout and labels with a caller-supplied fetcher.
    pub fn renderer_with_fetcher(&self, fetcher: Arc<dyn ImageFetcher>) -> DocumentRenderer {
        DocumentRenderer::new(fetcher)
            .with_layout(self.layout_spec())
            .with_labels(self.labels.render.clone())
            .with_fetch_concurrency(self.fetch.concurrency)
    }

    /// Renderer that never touches the network; every image becomes a placeholder.
    pub fn offline_renderer(&self) -> DocumentRenderer {
        self.renderer_with_fetcher(Arc::new(StaticImageFetcher::new()))
    }

    pub fn build_coordinator(&self) -> Result<ArchivalCoordinator, ConfigLoadError> {
        let (ledger, documents, embedded_blobs) = self.storage.build_stores()?;
        let blobs: Arc<dyn BlobStore> = match (&self.storage.blob_root, embedded_blobs) {
            (Some(root), _) => Arc::new(FsBlobStore::new(root)),
            (None, Some(embedded)) => embedded,
            (None, None) => Arc::new(InMemoryBlobStore::new()),
        };
        let procedure = self.archive.build_procedure()?;
        Ok(ArchivalCoordinator::new(ledger, blobs, documents, procedure)
            .with_settings(self.archive.settings.clone()))
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            name: None,
            layout: LayoutYamlConfig::default(),
            labels: LabelsYamlConfig::default(),
            fetch: FetchYamlConfig::default(),
            storage: StorageYamlConfig::default(),
            archive: ArchiveYamlConfig::default(),
        }
    }
}

/// Page geometry and typography.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutYamlConfig {
    #[serde(default = "default_page_size")]
    pub page_size: String,

    #[serde(default = "default_margin")]
    pub margin: f64,

    #[serde(default = "default_primary_color")]
    pub primary_color: String,

    #[serde(default)]
    pub heading_sizes: Option<[f64; 3]>,

    #[serde(default)]
    pub body_size: Option<f64>,

    #[serde(default)]
    pub caption_size: Option<f64>,

    #[serde(default)]
    pub table_size: Option<f64>,

    #[serde(default)]
    pub date_column_width: Option<f64>,

    #[serde(default)]
    pub amount_column_width: Option<f64>,

    #[serde(default)]
    pub image_max_height: Option<f64>,
}

impl LayoutYamlConfig {
    /// Defaults, then any positive finite sizes, then the cosmetic overrides.
    pub fn to_layout_spec(&self) -> LayoutSpec {
        let mut spec = LayoutSpec::default();
        let positive = |value: Option<f64>| value.filter(|v| v.is_finite() && *v > 0.0);

        if let Some(sizes) = self.heading_sizes.filter(|s| s.iter().all(|v| v.is_finite() && *v > 0.0)) {
            spec.heading_sizes = sizes;
        }
        if let Some(v) = positive(self.body_size) {
            spec.body_size = v;
        }
        if let Some(v) = positive(self.caption_size) {
            spec.caption_size = v;
        }
        if let Some(v) = positive(self.table_size) {
            spec.table_size = v;
        }
        if let Some(v) = positive(self.date_column_width) {
            spec.date_column_width = v;
        }
        if let Some(v) = positive(self.amount_column_width) {
            spec.amount_column_width = v;
        }
        if let Some(v) = positive(self.image_max_height) {
            spec.image_max_height = v;
        }

        spec.with_overrides(&LayoutOverrides {
            page_size: Some(self.page_size.clone()),
            margin: Some(self.margin),
            primary_color: Some(self.primary_color.clone()),
        })
    }
}

impl Default for LayoutYamlConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            margin: default_margin(),
            primary_color: default_primary_color(),
            heading_sizes: None,
            body_size: None,
            caption_size: None,
            table_size: None,
            date_column_width: None,
            amount_column_width: None,
            image_max_height: None,
        }
    }
}

/// User-visible strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsYamlConfig {
    /// Paragraph shown when the narrative is empty.
    #[serde(default = "default_empty_narrative")]
    pub empty_narrative: String,

    #[serde(flatten)]
    pub render: ReportLabels,
}

impl Default for LabelsYamlConfig {
    fn default() -> Self {
        Self {
            empty_narrative: default_empty_narrative(),
            render: ReportLabels::default(),
        }
    }
}

/// Image download limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchYamlConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl FetchYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.concurrency must be >= 1".to_string(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.max_image_bytes must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FetchYamlConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_image_bytes: default_max_image_bytes(),
            concurrency: default_concurrency(),
        }
    }
}

/// Ledger, document and blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageYamlConfig {
    /// `in_memory` or `redb`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub redb_path: Option<String>,

    /// Filesystem blob root. Without it blobs live in the storage backend.
    #[serde(default)]
    pub blob_root: Option<String>,
}

type Stores = (
    Arc<dyn LedgerStore>,
    Arc<dyn DocumentStore>,
    Option<Arc<dyn BlobStore>>,
);

impl StorageYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.backend.as_str() {
            "in_memory" => Ok(()),
            "redb" if self.redb_path.as_deref().is_some_and(|p| !p.trim().is_empty()) => Ok(()),
            "redb" => Err(ConfigLoadError::Validation(
                "storage.redb_path is required for the redb backend".to_string(),
            )),
            other => Err(ConfigLoadError::Validation(format!(
                "storage.backend must be in_memory or redb, got {other:?}"
            ))),
        }
    }

    fn build_stores(&self) -> Result<Stores, ConfigLoadError> {
        match self.backend.as_str() {
            "redb" => {
                #[cfg(feature = "embedded")]
                {
                    let path = self.redb_path.as_deref().unwrap_or_default();
                    let store = crate::archive::RedbArchiveStore::open(path)
                        .map_err(|e| ConfigLoadError::Backend(format!("redb store: {e}")))?;
                    let store = Arc::new(store);
                    let ledger: Arc<dyn LedgerStore> = store.clone();
                    let documents: Arc<dyn DocumentStore> = store.clone();
                    let blobs: Arc<dyn BlobStore> = store;
                    Ok((ledger, documents, Some(blobs)))
                }
                #[cfg(not(feature = "embedded"))]
                {
                    Err(ConfigLoadError::Backend(
                        "redb store: embedded feature disabled at compile time".to_string(),
                    ))
                }
            }
            _ => {
                let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
                let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
                Ok((ledger, documents, None))
            }
        }
    }
}

impl Default for StorageYamlConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redb_path: None,
            blob_root: None,
        }
    }
}

/// Archive procedure endpoint and document naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveYamlConfig {
    /// HTTP endpoint of the archive procedure. In-memory when absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token for `endpoint`.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_archive_timeout")]
    pub timeout_secs: u64,

    #[serde(flatten)]
    pub settings: ArchiveSettings,
}

impl ArchiveYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "archive.timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.settings.document_name.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "archive.document_name must not be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint
            && !crate::payload::is_http_url(endpoint)
        {
            return Err(ConfigLoadError::Validation(format!(
                "archive.endpoint must be an http(s) URL, got {endpoint:?}"
            )));
        }
        Ok(())
    }

    fn build_procedure(&self) -> Result<Arc<dyn ArchiveProcedure>, ConfigLoadError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(Arc::new(InMemoryArchiveProcedure::new()));
        };

        #[cfg(feature = "http")]
        {
            let mut procedure = crate::archive::HttpArchiveProcedure::new(
                endpoint.clone(),
                Duration::from_secs(self.timeout_secs),
            )
            .map_err(|e| ConfigLoadError::Backend(format!("archive procedure: {e}")))?;
            if let Some(var) = &self.api_key_env {
                match std::env::var(var) {
                    Ok(key) => procedure = procedure.with_api_key(key),
                    Err(_) => warn!(env = %var, "archive_api_key_missing"),
                }
            }
            Ok(Arc::new(procedure))
        }
        #[cfg(not(feature = "http"))]
        {
            Err(ConfigLoadError::Backend(format!(
                "archive procedure {endpoint}: http feature disabled at compile time"
            )))
        }
    }
}

impl Default for ArchiveYamlConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_archive_timeout(),
            settings: ArchiveSettings::default(),
        }
    }
}

fn default_config_version() -> String {
    "1.0".to_string()
}
fn default_page_size() -> String {
    "LETTER".to_string()
}
fn default_margin() -> f64 {
    40.0
}
fn default_primary_color() -> String {
    "#1F4E79".to_string()
}
fn default_empty_narrative() -> String {
    EMPTY_NARRATIVE_PLACEHOLDER.to_string()
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_concurrency() -> usize {
    4
}
fn default_backend() -> String {
    "in_memory".to_string()
}
fn default_archive_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{PageSize, Rgb};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
layout:
  page_size: "A4"
  margin: 50
labels:
  costs_heading: "Gastos"
  empty_narrative: "Sin contenido."
fetch:
  concurrency: 2
"#;

        let config = ReportConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.labels.render.costs_heading, "Gastos");
        assert_eq!(config.labels.render.total_label, "Total");
        assert_eq!(config.labels.empty_narrative, "Sin contenido.");
        assert_eq!(config.fetch.concurrency, 2);

        let spec = config.layout_spec();
        assert_eq!(spec.page_size, PageSize::A4);
        assert_eq!(spec.margin, 50.0);
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1.0"
storage:
  backend: "in_memory"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = ReportConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.storage.backend, "in_memory");
    }

    #[test]
    fn test_default_config() {
        let config = ReportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.layout_spec(), LayoutSpec::default());
        assert_eq!(config.archive.settings, ArchiveSettings::default());
    }

    #[test]
    fn malformed_layout_values_fall_back() {
        let yaml = r#"
layout:
  page_size: "TABLOID"
  primary_color: "blue-ish"
  body_size: -3
"#;
        let config = ReportConfig::from_yaml(yaml).unwrap();
        let spec = config.layout_spec();
        assert_eq!(spec.page_size, PageSize::Letter);
        assert_eq!(spec.primary_color, Rgb::BRAND);
        assert_eq!(spec.body_size, 11.0);
    }

    #[test]
    fn test_unsupported_version() {
        let err = ReportConfig::from_yaml("version: \"2.0\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn test_storage_validation() {
        let err = ReportConfig::from_yaml("storage:\n  backend: \"redb\"\n").unwrap_err();
        assert!(err.to_string().contains("redb_path"));

        let err = ReportConfig::from_yaml("storage:\n  backend: \"postgres\"\n").unwrap_err();
        assert!(err.to_string().contains("in_memory or redb"));

        let err = ReportConfig::from_yaml("fetch:\n  concurrency: 0\n").unwrap_err();
        assert!(err.to_string().contains("concurrency must be >= 1"));
    }

    #[test]
    fn test_archive_settings_flatten() {
        let yaml = r#"
archive:
  document_name: "Informe mensual"
  subtype: "informes"
"#;
        let config = ReportConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.archive.settings.document_name, "Informe mensual");
        assert_eq!(config.archive.settings.subtype, "informes");
        assert_eq!(config.archive.settings.mime_type, "application/pdf");
        assert!(config.archive.endpoint.is_none());
    }

    #[cfg(feature = "embedded")]
    #[tokio::test]
    async fn test_redb_coordinator_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "storage:\n  backend: \"redb\"\n  redb_path: \"{}\"\n",
            dir.path().join("reports.redb").display()
        );
        let config = ReportConfig::from_yaml(&yaml).unwrap();
        let coordinator = config.build_coordinator().unwrap();
        let record = coordinator.load_ledger("p-1", "2026-02").await.unwrap();
        assert!(record.is_none());
    }
}
