//! TOML configuration parsing and validation.
//!
//! Every section is optional; omitted keys fall back to the defaults the
//! workflow has always used (100-page PDF ceiling, ten levels of archive
//! nesting, the built-in abbreviation grammar, the standard video list).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: usize,
    #[serde(default)]
    pub sentence_split: bool,
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    #[serde(default = "default_release_after_pages")]
    pub release_after_pages: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pdf_pages: default_max_pdf_pages(),
            max_archive_depth: default_max_archive_depth(),
            sentence_split: false,
            temp_root: None,
            release_after_pages: default_release_after_pages(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_pdf_pages() -> usize {
    100
}
fn default_max_archive_depth() -> usize {
    10
}
fn default_release_after_pages() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// Literature OCR/fetch service keyed by `<article>_<file>`; tried first.
    #[serde(default)]
    pub primary_url: Option<String>,
    /// Generic OCR endpoint accepting raw image bytes.
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            fallback_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

impl OcrConfig {
    pub fn is_enabled(&self) -> bool {
        self.primary_url.is_some() || self.fallback_url.is_some()
    }
}

/// Abbreviation grammar overrides for the sentence segmenter.
///
/// `suffix_exceptions` / `token_exceptions` replace the built-in lists when
/// present; the `extra_*` lists are appended to whichever list is active.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmenterConfig {
    #[serde(default)]
    pub suffix_exceptions: Option<Vec<String>>,
    #[serde(default)]
    pub token_exceptions: Option<Vec<String>>,
    #[serde(default)]
    pub extra_suffix_exceptions: Vec<String>,
    #[serde(default)]
    pub extra_token_exceptions: Vec<String>,
    #[serde(default = "default_true")]
    pub single_letter_initials: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            suffix_exceptions: None,
            token_exceptions: None,
            extra_suffix_exceptions: Vec::new(),
            extra_token_exceptions: Vec::new(),
            single_letter_initials: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
        }
    }
}

fn default_video_extensions() -> Vec<String> {
    [
        ".mp4", ".mov", ".avi", ".wmv", ".webm", ".flv", ".mpg", ".movi", ".m4v", ".3gp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Defaults for every section, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.pipeline.max_pdf_pages == 0 {
        anyhow::bail!("pipeline.max_pdf_pages must be > 0");
    }
    if config.pipeline.max_archive_depth == 0 {
        anyhow::bail!("pipeline.max_archive_depth must be > 0");
    }
    if config.pipeline.release_after_pages == 0 {
        anyhow::bail!("pipeline.release_after_pages must be > 0");
    }
    if config.ocr.timeout_secs == 0 {
        anyhow::bail!("ocr.timeout_secs must be > 0");
    }
    for ext in &config.media.video_extensions {
        if !ext.starts_with('.') {
            anyhow::bail!(
                "media.video_extensions entries must start with '.', got '{}'",
                ext
            );
        }
    }
    for pattern in &config.pipeline.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid pipeline.exclude_globs pattern: {}", pattern))?;
    }
    Ok(())
}
