//! Configuration for the document intelligence store.
//!
//! Covers exactly the recognized keys in the spec's external-interfaces
//! section: storage root, OCR mode, pipeline concurrency, chunking defaults,
//! embedding batching, image pre-processing, and log level. Layered loading
//! (defaults → TOML file → environment) is provided by the `config` crate,
//! matching how the teacher loaded `AgentConfig`.

use crate::model::OcrMode;
use serde::{Deserialize, Serialize};

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocProvConfig {
    /// Filesystem root for `<name>.db`, `images/`, `kg-archives/`.
    pub default_storage_path: String,

    /// Selects the OCR backend preset.
    #[serde(default = "default_ocr_mode")]
    pub default_ocr_mode: OcrMode,

    /// Pipeline parallelism: documents in flight simultaneously.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Embedder batch size.
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    /// Backend device hint (e.g. "cpu", "cuda:0").
    #[serde(default = "default_embedding_device")]
    pub embedding_device: String,

    /// Chunker defaults.
    #[serde(default)]
    pub chunk_size: ChunkDefaults,

    /// Image pre-processing knobs.
    #[serde(default)]
    pub image_optimization: ImageOptimizationConfig,

    /// Logging verbosity, passed straight through to `tracing_subscriber::EnvFilter`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Backend call timeouts and retry policy.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Optional pipeline stage: run entity extraction after embedding/VLM complete.
    #[serde(default = "default_true")]
    pub auto_extract_entities: bool,

    /// Optional pipeline stage: build the knowledge graph after extraction.
    /// Requires `auto_extract_entities` in the same run.
    #[serde(default)]
    pub auto_build_kg: bool,
}

fn default_ocr_mode() -> OcrMode {
    OcrMode::Balanced
}

fn default_max_concurrent() -> usize {
    3
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_embedding_device() -> String {
    "cpu".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Chunker defaults: `chunk_size` (characters) and `chunk_overlap_percent` (0-50).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkDefaults {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap_percent")]
    pub chunk_overlap_percent: u8,
}

fn default_chunk_size() -> usize {
    2000
}

fn default_chunk_overlap_percent() -> u8 {
    10
}

impl Default for ChunkDefaults {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap_percent: default_chunk_overlap_percent(),
        }
    }
}

impl ChunkDefaults {
    /// Validated overlap ratio in `[0.0, 0.5]`.
    pub fn overlap_ratio(&self) -> f64 {
        (self.chunk_overlap_percent.min(50) as f64) / 100.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageOptimizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ocr_max_width")]
    pub ocr_max_width: u32,

    #[serde(default = "default_vlm_max_dimension")]
    pub vlm_max_dimension: u32,

    #[serde(default = "default_vlm_skip_below_size")]
    pub vlm_skip_below_size: u64,

    #[serde(default = "default_vlm_min_relevance")]
    pub vlm_min_relevance: f32,

    #[serde(default)]
    pub vlm_skip_logos_icons: bool,
}

fn default_true() -> bool {
    true
}

fn default_ocr_max_width() -> u32 {
    2048
}

fn default_vlm_max_dimension() -> u32 {
    1024
}

fn default_vlm_skip_below_size() -> u64 {
    4096
}

fn default_vlm_min_relevance() -> f32 {
    0.3
}

impl Default for ImageOptimizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ocr_max_width: default_ocr_max_width(),
            vlm_max_dimension: default_vlm_max_dimension(),
            vlm_skip_below_size: default_vlm_skip_below_size(),
            vlm_min_relevance: default_vlm_min_relevance(),
            vlm_skip_logos_icons: false,
        }
    }
}

/// Rate limiter + circuit breaker policy (§6), shared by every external backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_time_ms")]
    pub recovery_time_ms: u64,

    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,

    /// OCR backend call timeout; defaults to 15 minutes per §5.
    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_time_ms() -> u64 {
    60_000
}

fn default_half_open_success_threshold() -> u32 {
    3
}

fn default_ocr_timeout_secs() -> u64 {
    15 * 60
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_time_ms: default_recovery_time_ms(),
            half_open_success_threshold: default_half_open_success_threshold(),
            ocr_timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

impl Default for DocProvConfig {
    fn default() -> Self {
        Self {
            default_storage_path: "./storage".to_string(),
            default_ocr_mode: default_ocr_mode(),
            max_concurrent: default_max_concurrent(),
            embedding_batch_size: default_embedding_batch_size(),
            embedding_device: default_embedding_device(),
            chunk_size: ChunkDefaults::default(),
            image_optimization: ImageOptimizationConfig::default(),
            log_level: default_log_level(),
            resilience: ResilienceConfig::default(),
            auto_extract_entities: default_true(),
            auto_build_kg: false,
        }
    }
}

impl DocProvConfig {
    /// Layered load: built-in defaults, then an optional TOML file, then
    /// `DOCPROV_*` environment overrides (e.g. `DOCPROV_MAX_CONCURRENT=8`).
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&defaults)?,
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DOCPROV")
                .separator("__")
                .try_parsing(true),
        );
        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be >= 1");
        }
        if self.embedding_batch_size == 0 {
            anyhow::bail!("embedding_batch_size must be >= 1");
        }
        if self.chunk_size.chunk_size == 0 {
            anyhow::bail!("chunk_size must be >= 1");
        }
        if self.chunk_size.chunk_overlap_percent > 50 {
            anyhow::bail!("chunk_overlap_percent must be in 0..=50");
        }
        if self.auto_build_kg && !self.auto_extract_entities {
            anyhow::bail!("auto_build_kg requires auto_extract_entities in the same run");
        }
        Ok(())
    }
}
