//! OCR for supplementary images: a literature service first, generic OCR second.
//!
//! The chain asks each [`OcrService`] in order and stops at the first that
//! returns text. A miss (the service has nothing for this file) moves on
//! quietly; an error is logged and remembered as the failure reason in case
//! nothing later succeeds.
//!
//! Wire formats:
//!
//! - literature service: `GET <primary_url>?ids=<article>_<file>&col=suppdata`
//!   returning `{"sibils_article_set": [<BioC document>], "warning": ...}`;
//!   a warning mentioning `missing ids` is a miss.
//! - generic OCR: `POST <fallback_url>` with the raw image bytes, returning
//!   `{"ocr_output": "<text>"}`; lines become paragraphs.

use crate::config::OcrConfig;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Connection failed with OCR service {service}: {source}")]
    Http {
        service: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("OCR service {service} returned HTTP {status}")]
    Status { service: String, status: u16 },
    #[error("OCR service {service} returned an unexpected response: {detail}")]
    Response { service: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text (or not) for one image, with where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrOutcome {
    pub paragraphs: Option<Vec<String>>,
    pub source: Option<String>,
    pub failure: Option<String>,
}

/// Collaborator used by the dispatcher for images.
pub trait OcrExtractor {
    fn recognize(&self, path: &Path, article_id: &str) -> OcrOutcome;
}

/// One OCR provider in the chain.
pub trait OcrService {
    fn label(&self) -> &str;
    /// `Ok(None)` when the service has no text for this file.
    fn recognize(&self, path: &Path, article_id: &str) -> Result<Option<Vec<String>>, OcrError>;
}

/// Ordered fallback chain of OCR services.
pub struct OcrChain {
    services: Vec<Box<dyn OcrService>>,
}

impl OcrChain {
    pub fn new(services: Vec<Box<dyn OcrService>>) -> Self {
        Self { services }
    }

    /// Services for every configured URL, primary first.
    pub fn from_config(cfg: &OcrConfig) -> anyhow::Result<Self> {
        let mut services: Vec<Box<dyn OcrService>> = Vec::new();
        if !cfg.is_enabled() {
            return Ok(Self::new(services));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("supp-harness/", env!("CARGO_PKG_VERSION")))
            .build()?;
        if let Some(url) = &cfg.primary_url {
            services.push(Box::new(LiteratureOcrService::new(url, client.clone())));
        }
        if let Some(url) = &cfg.fallback_url {
            services.push(Box::new(GenericOcrService::new(url, client)));
        }
        Ok(Self::new(services))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl OcrExtractor for OcrChain {
    fn recognize(&self, path: &Path, article_id: &str) -> OcrOutcome {
        if self.services.is_empty() {
            return NoOcr.recognize(path, article_id);
        }
        let mut outcome = OcrOutcome::default();
        for service in &self.services {
            outcome.source = Some(service.label().to_string());
            match service.recognize(path, article_id) {
                Ok(Some(paragraphs)) if !paragraphs.is_empty() => {
                    debug!(service = service.label(), file = %path.display(), "OCR succeeded");
                    outcome.paragraphs = Some(paragraphs);
                    outcome.failure = None;
                    return outcome;
                }
                Ok(_) => {
                    debug!(service = service.label(), file = %path.display(), "OCR service had no text");
                }
                Err(e) => {
                    warn!(service = service.label(), file = %path.display(), error = %e, "OCR service failed, trying next");
                    outcome.failure = Some(e.to_string());
                }
            }
        }
        outcome
    }
}

/// Used when no OCR service is configured.
pub struct NoOcr;

impl OcrExtractor for NoOcr {
    fn recognize(&self, _path: &Path, _article_id: &str) -> OcrOutcome {
        OcrOutcome {
            paragraphs: None,
            source: None,
            failure: Some("No OCR service configured".to_string()),
        }
    }
}

/// Literature-mining service that already holds OCR for published supplements.
pub struct LiteratureOcrService {
    url: String,
    client: reqwest::blocking::Client,
}

impl LiteratureOcrService {
    pub fn new(url: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }
}

impl OcrService for LiteratureOcrService {
    fn label(&self) -> &str {
        "literature"
    }

    fn recognize(&self, path: &Path, article_id: &str) -> Result<Option<Vec<String>>, OcrError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ids = format!("{}_{}", article_id, file_name);
        let response = self
            .client
            .get(&self.url)
            .query(&[("ids", ids.as_str()), ("col", "suppdata")])
            .send()
            .map_err(|source| OcrError::Http {
                service: self.label().into(),
                source,
            })?;
        let body = json_body(self.label(), response)?;
        Ok(parse_literature_response(&body))
    }
}

/// Passage texts of the first returned document, `None` for a miss.
pub fn parse_literature_response(body: &serde_json::Value) -> Option<Vec<String>> {
    let missing = body
        .get("warning")
        .and_then(|w| w.as_str())
        .is_some_and(|w| w.contains("missing ids"));
    if missing {
        return None;
    }
    let first = body.get("sibils_article_set")?.as_array()?.first()?;
    let document = first.get("document").unwrap_or(first);
    let paragraphs: Vec<String> = document
        .get("passages")?
        .as_array()?
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs)
    }
}

/// Any OCR endpoint that takes image bytes and answers with `ocr_output`.
pub struct GenericOcrService {
    url: String,
    client: reqwest::blocking::Client,
}

impl GenericOcrService {
    pub fn new(url: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }
}

impl OcrService for GenericOcrService {
    fn label(&self) -> &str {
        "generic"
    }

    fn recognize(&self, path: &Path, _article_id: &str) -> Result<Option<Vec<String>>, OcrError> {
        let bytes = std::fs::read(path)?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, image_content_type(path))
            .body(bytes)
            .send()
            .map_err(|source| OcrError::Http {
                service: self.label().into(),
                source,
            })?;
        let body = json_body(self.label(), response)?;
        Ok(parse_ocr_output(&body))
    }
}

/// Non-blank lines of `ocr_output`.
pub fn parse_ocr_output(body: &serde_json::Value) -> Option<Vec<String>> {
    let text = body.get("ocr_output")?.as_str()?;
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}

fn json_body(
    service: &str,
    response: reqwest::blocking::Response,
) -> Result<serde_json::Value, OcrError> {
    let status = response.status();
    if !status.is_success() {
        return Err(OcrError::Status {
            service: service.into(),
            status: status.as_u16(),
        });
    }
    response.json().map_err(|e| OcrError::Response {
        service: service.into(),
        detail: e.to_string(),
    })
}

fn image_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
