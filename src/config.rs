use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::NmdcError;

pub const DEFAULT_BASE_URL: &str = "https://api.microbiomedata.org/nmdcschema";
pub const DEFAULT_CONFIG_FILE: &str = "nmdc-fetcher.json";
pub const BASE_URL_ENV: &str = "NMDC_API_BASE_URL";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub default_page_size: usize,
    /// Page size for full-collection scans (ID universes, DOI search).
    pub scan_page_size: usize,
    /// Above this many documents an unbounded batch request is capped to one batch.
    pub large_collection_threshold: usize,
    pub max_batch_size: usize,
    /// Hard clamp applied to every requested sample size.
    pub max_sample_size: usize,
    pub oversample_factor: usize,
    pub min_candidate_pool: usize,
    pub max_ids_per_request: usize,
    pub doi_result_cap: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            default_page_size: 100,
            scan_page_size: 1_000,
            large_collection_threshold: 10_000,
            max_batch_size: 10_000,
            max_sample_size: 1_000,
            oversample_factor: 3,
            min_candidate_pool: 100,
            max_ids_per_request: 100,
            doi_result_cap: 50,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit paths must exist; without one, `nmdc-fetcher.json` is used when
    /// present and the defaults otherwise.
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, NmdcError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            ClientConfig::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| NmdcError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| NmdcError::ConfigParse(err.to_string()))?
        };

        let base_url_override = std::env::var(BASE_URL_ENV).ok();
        Self::resolve_config(config, base_url_override.as_deref())
    }

    pub fn resolve_config(
        mut config: ClientConfig,
        base_url_override: Option<&str>,
    ) -> Result<ClientConfig, NmdcError> {
        if let Some(base_url) = base_url_override {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().to_string();
            }
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        if config.base_url.is_empty() {
            return Err(NmdcError::ConfigParse("base_url must not be empty".to_string()));
        }
        if config.default_page_size == 0 || config.scan_page_size == 0 {
            return Err(NmdcError::ConfigParse(
                "default_page_size and scan_page_size must be at least 1".to_string(),
            ));
        }
        if config.oversample_factor == 0 {
            return Err(NmdcError::ConfigParse(
                "oversample_factor must be at least 1".to_string(),
            ));
        }
        if config.max_batch_size == 0 || config.max_sample_size == 0 {
            return Err(NmdcError::ConfigParse(
                "max_batch_size and max_sample_size must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}
