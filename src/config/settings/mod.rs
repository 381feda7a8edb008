#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::analysis::{AnalysisConfig, QuadrantConfig};
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::retrieval::RetrievalConfig;
use crate::synthesis::SynthesisConfig;

/// Environment variable overriding the configuration directory
pub const HOME_ENV_VAR: &str = "CGM_INSIGHT_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub quadrant: QuadrantConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0}s (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid minimum day count: {0} (must be between 1 and 90)")]
    InvalidMinDays(usize),
    #[error("Invalid ratio for {name}: {value} (must be greater than 0 and at most 1)")]
    InvalidRatio { name: &'static str, value: f64 },
    #[error("Invalid target range: {0}-{1} mg/dL (low must be positive and below high)")]
    InvalidTargetRange(f64, f64),
    #[error("Invalid CV threshold: {0}% (must be between 1 and 100)")]
    InvalidCvThreshold(f64),
    #[error("Invalid sustained bucket count: {0} (must be between 1 and 288)")]
    InvalidSustainedBuckets(usize),
    #[error("Invalid band widths for {name}: narrow {narrow} must be positive and below wide {wide}")]
    InvalidBandWidths {
        name: &'static str,
        narrow: f64,
        wide: f64,
    },
    #[error("Invalid slope threshold: {0} (must be positive)")]
    InvalidSlopeThreshold(f64),
    #[error("Invalid window: {size} buckets with stride {stride} (both must be between 1 and 288)")]
    InvalidWindow { size: usize, stride: usize },
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid hashing dimension: {0} (must be between 64 and 4096)")]
    InvalidHashingDimension(usize),
    #[error("Invalid max tokens: {0} (must be between 64 and 8192)")]
    InvalidMaxTokens(u32),
    #[error("Invalid target chunk size: {0} (must be between 50 and 2048)")]
    InvalidTargetChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 100 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 10 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Invalid overlap size: {0} (must be between 0 and 512)")]
    InvalidOverlapSize(usize),
    #[error("Max chunk size ({0}) must be greater than target chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Target chunk size ({0}) must be greater than min chunk size ({1})")]
    TargetChunkSizeTooSmall(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Resolve the default configuration directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        dirs::home_dir()
            .map(|home| home.join(".cgm-insight"))
            .or_else(|| dirs::data_dir().map(|data| data.join("cgm-insight")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load configuration from the default directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir().context("Failed to resolve configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_analysis_config()?;
        self.validate_quadrant_config()?;
        self.validate_retrieval_config()?;
        self.validate_synthesis_config()?;
        self.validate_chunking_config()?;
        Ok(())
    }

    fn validate_analysis_config(&self) -> Result<(), ConfigError> {
        let config = &self.analysis;

        if !(1..=90).contains(&config.min_days) {
            return Err(ConfigError::InvalidMinDays(config.min_days));
        }

        validate_ratio("min_coverage_ratio", config.min_coverage_ratio)?;
        validate_ratio("min_day_fill_ratio", config.min_day_fill_ratio)?;
        validate_ratio(
            "low_confidence_missing_ratio",
            config.low_confidence_missing_ratio,
        )?;

        let (low, high) = config.target_range();
        if !(low > 0.0 && low < high) {
            return Err(ConfigError::InvalidTargetRange(low, high));
        }

        if !(1.0..=100.0).contains(&config.cv_threshold) {
            return Err(ConfigError::InvalidCvThreshold(config.cv_threshold));
        }

        if !(1..=288).contains(&config.sustained_buckets) {
            return Err(ConfigError::InvalidSustainedBuckets(
                config.sustained_buckets,
            ));
        }

        Ok(())
    }

    fn validate_quadrant_config(&self) -> Result<(), ConfigError> {
        let config = &self.quadrant;

        validate_band_widths("IQR", config.iqr_narrow, config.iqr_wide)?;
        validate_band_widths("IDR", config.idr_narrow, config.idr_wide)?;

        if config.slope_threshold <= 0.0 || !config.slope_threshold.is_finite() {
            return Err(ConfigError::InvalidSlopeThreshold(config.slope_threshold));
        }

        if !(1..=288).contains(&config.window_buckets) || !(1..=288).contains(&config.window_stride)
        {
            return Err(ConfigError::InvalidWindow {
                size: config.window_buckets,
                stride: config.window_stride,
            });
        }

        validate_ratio("min_window_coverage", config.min_window_coverage)?;

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(1..=50).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        if !(64..=4096).contains(&config.hashing_dimension) {
            return Err(ConfigError::InvalidHashingDimension(
                config.hashing_dimension,
            ));
        }

        Ok(())
    }

    fn validate_synthesis_config(&self) -> Result<(), ConfigError> {
        let config = &self.synthesis;

        if config.primary_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(config.primary_model.clone()));
        }

        if let Some(empty) = config.fallback_models.iter().find(|m| m.trim().is_empty()) {
            return Err(ConfigError::InvalidModel(empty.clone()));
        }

        if !(1..=600).contains(&config.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(config.timeout_secs));
        }

        if !(1..=10).contains(&config.attempts_per_model) {
            return Err(ConfigError::InvalidRetryAttempts(config.attempts_per_model));
        }

        if !(64..=8192).contains(&config.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(config.max_tokens));
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        // Validate individual bounds
        if !(50..=2048).contains(&config.target_chunk_size) {
            return Err(ConfigError::InvalidTargetChunkSize(
                config.target_chunk_size,
            ));
        }

        if !(100..=4096).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if !(10..=1024).contains(&config.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(config.min_chunk_size));
        }

        if config.overlap_size > 512 {
            return Err(ConfigError::InvalidOverlapSize(config.overlap_size));
        }

        // Validate relationships between sizes
        if config.max_chunk_size <= config.target_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                config.max_chunk_size,
                config.target_chunk_size,
            ));
        }

        if config.target_chunk_size <= config.min_chunk_size {
            return Err(ConfigError::TargetChunkSizeTooSmall(
                config.target_chunk_size,
                config.min_chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite reference index
    #[inline]
    pub fn index_database_path(&self) -> PathBuf {
        self.get_base_dir().join("reference_index.db")
    }

    /// Directory scanned for reference documents
    #[inline]
    pub fn corpus_dir(&self) -> PathBuf {
        self.retrieval
            .corpus_dir
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("references"))
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

fn validate_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRatio { name, value })
    }
}

fn validate_band_widths(name: &'static str, narrow: f64, wide: f64) -> Result<(), ConfigError> {
    if narrow > 0.0 && narrow < wide {
        Ok(())
    } else {
        Err(ConfigError::InvalidBandWidths { name, narrow, wide })
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}
