//! Crawl configuration

use fipe_common::types::{Brand, Model, Year};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Public FIPE mirror
pub const DEFAULT_BASE_URL: &str = "https://parallelum.com.br/fipe/api/v1";

pub const DEFAULT_USER_AGENT: &str = "fipe-ingest/0.1";

/// Brand pipelines run concurrently per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 20;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20);
pub const DEFAULT_JITTER: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Vehicle catalog to crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    #[default]
    Carros,
    Motos,
    Caminhoes,
}

impl VehicleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleKind::Carros => "carros",
            VehicleKind::Motos => "motos",
            VehicleKind::Caminhoes => "caminhoes",
        }
    }
}

impl std::fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream catalog endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    pub vehicle: VehicleKind,
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            vehicle: VehicleKind::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn root(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.vehicle)
    }

    /// `GET <root>/marcas`
    pub fn brands_url(&self) -> String {
        format!("{}/marcas", self.root())
    }

    /// `GET <root>/marcas/{brand}/modelos`
    pub fn models_url(&self, brand: &Brand) -> String {
        format!("{}/{}/modelos", self.root(), brand.path())
    }

    /// `GET <root>/marcas/{brand}/modelos/{model}/anos`
    pub fn years_url(&self, model: &Model) -> String {
        format!("{}/{}/anos", self.root(), model.path())
    }

    /// `GET <root>/marcas/{brand}/modelos/{model}/anos/{year}`
    pub fn detail_url(&self, year: &Year) -> String {
        format!("{}/{}", self.root(), year.path())
    }
}

/// Bounded exponential backoff for catalog requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the uniform random delay added to each backoff
    pub jitter: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryConfig {
    /// Delay before jitter for the retry numbered `attempt` (0 for the first retry)
    ///
    /// `min(max_delay, base_delay * 2^attempt)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Per-brand pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum detail records per brand, `None` for the whole subtree
    pub limit: Option<usize>,
    /// Capacity of the models and years queues
    pub queue_capacity: usize,
    /// Watchdog for one brand run
    pub timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limit: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Negative limits mean unbounded, mirroring the `--limit -1` CLI default
    pub fn limit_from_signed(limit: i64) -> Option<usize> {
        usize::try_from(limit).ok()
    }

    pub fn limit_reached(&self, details: usize) -> bool {
        self.limit.is_some_and(|limit| details >= limit)
    }
}

/// Everything a crawl run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub catalog: CatalogConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    /// Brand pipelines per concurrent wave
    pub chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog.base_url.is_empty() {
            return Err("Catalog base URL cannot be empty".to_string());
        }

        self.retry.validate()?;

        if self.chunk_size == 0 {
            return Err("Chunk size must be greater than 0".to_string());
        }

        if self.pipeline.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let retry = RetryConfig::default();

        assert_eq!(retry.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(retry.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(retry.backoff_delay(2), Duration::from_secs(20));
        // fourth retry: min(20, 5 * 2^3)
        assert_eq!(retry.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(retry.backoff_delay(64), Duration::from_secs(20));
    }

    #[test]
    fn test_catalog_urls() {
        let catalog = CatalogConfig::new("http://localhost:9000/fipe/api/v1/");
        let brand = Arc::new(Brand::new("21", "Fiat"));
        let model = Arc::new(Model::new(brand.clone(), "4828", "Uno"));
        let year = Year::new(model.clone(), "2014-1", "2014 Gasolina");

        assert_eq!(
            catalog.brands_url(),
            "http://localhost:9000/fipe/api/v1/carros/marcas"
        );
        assert_eq!(
            catalog.models_url(&brand),
            "http://localhost:9000/fipe/api/v1/carros/marcas/21/modelos"
        );
        assert_eq!(
            catalog.years_url(&model),
            "http://localhost:9000/fipe/api/v1/carros/marcas/21/modelos/4828/anos"
        );
        assert_eq!(
            catalog.detail_url(&year),
            "http://localhost:9000/fipe/api/v1/carros/marcas/21/modelos/4828/anos/2014-1"
        );
    }

    #[test]
    fn test_vehicle_kind_in_urls() {
        let catalog = CatalogConfig {
            vehicle: VehicleKind::Motos,
            ..CatalogConfig::default()
        };
        assert_eq!(
            catalog.brands_url(),
            "https://parallelum.com.br/fipe/api/v1/motos/marcas"
        );
    }

    #[test]
    fn test_signed_limit() {
        assert_eq!(PipelineConfig::limit_from_signed(-1), None);
        assert_eq!(PipelineConfig::limit_from_signed(0), Some(0));
        assert_eq!(PipelineConfig::limit_from_signed(10), Some(10));
    }

    #[test]
    fn test_limit_reached() {
        let unbounded = PipelineConfig::default();
        assert!(!unbounded.limit_reached(usize::MAX));

        let limited = PipelineConfig {
            limit: Some(2),
            ..PipelineConfig::default()
        };
        assert!(!limited.limit_reached(1));
        assert!(limited.limit_reached(2));
    }

    #[test]
    fn test_validate() {
        assert!(IngestConfig::default().validate().is_ok());

        let mut config = IngestConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
    }
}
