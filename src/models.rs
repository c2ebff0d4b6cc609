//! Core data types flowing through the ingestion pipeline.
//!
//! A file travels as an [`ArtifactPath`] from the scanner (or the archive
//! walker) to the dispatcher, which turns it into exactly one
//! [`ExtractionOutcome`]. Extractors hand back a [`RawExtraction`] that the
//! assembler normalizes; [`Table`] is the canonical tabular form shared by
//! every adapter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix of per-article directories inside a set (`PMC123_supplementary`).
pub const ARTICLE_DIR_SUFFIX: &str = "_supplementary";

/// A file on disk plus the logical location it came from.
///
/// `chain` lists every enclosing archive from outermost to innermost, each as
/// the path it had inside its parent (the first entry is relative to the raw
/// tree). `member` is the path within the innermost archive, or the raw-tree
/// relative path for top-level files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    pub physical: PathBuf,
    pub chain: Vec<String>,
    pub member: String,
}

impl ArtifactPath {
    pub fn top_level(physical: PathBuf, relative: impl Into<String>) -> Self {
        Self {
            physical,
            chain: Vec::new(),
            member: relative.into(),
        }
    }

    pub fn is_archived(&self) -> bool {
        !self.chain.is_empty()
    }

    /// `outer.zip/inner/inner.zip/docs/a.pdf` style path, unique within an article.
    pub fn logical(&self) -> String {
        let mut parts: Vec<&str> = self.chain.iter().map(String::as_str).collect();
        parts.push(&self.member);
        parts.join("/")
    }

    /// Path of this file inside the outermost archive, `None` for top-level files.
    pub fn archived_member(&self) -> Option<String> {
        if self.chain.is_empty() {
            return None;
        }
        let mut parts: Vec<&str> = self.chain[1..].iter().map(String::as_str).collect();
        parts.push(&self.member);
        Some(parts.join("/"))
    }

    /// Raw-tree relative path of the top-level file this artifact came from.
    pub fn top_level_relative(&self) -> &str {
        self.chain.first().unwrap_or(&self.member)
    }

    pub fn file_name(&self) -> &str {
        self.member.rsplit('/').next().unwrap_or(&self.member)
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.logical())
    }
}

/// Closed set of file kinds the dispatcher routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClassification {
    Word,
    Spreadsheet,
    Image,
    Pdf,
    Presentation,
    Archive,
    Unknown,
}

impl FileClassification {
    pub const ALL: [FileClassification; 7] = [
        FileClassification::Word,
        FileClassification::Spreadsheet,
        FileClassification::Image,
        FileClassification::Pdf,
        FileClassification::Presentation,
        FileClassification::Archive,
        FileClassification::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileClassification::Word => "word",
            FileClassification::Spreadsheet => "spreadsheet",
            FileClassification::Image => "image",
            FileClassification::Pdf => "pdf",
            FileClassification::Presentation => "presentation",
            FileClassification::Archive => "archive",
            FileClassification::Unknown => "unknown",
        }
    }

    /// Leaf kinds that an extractor can turn into text or tables.
    pub fn is_extractable(&self) -> bool {
        !matches!(
            self,
            FileClassification::Archive | FileClassification::Unknown
        )
    }
}

impl fmt::Display for FileClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file was deliberately not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    Directory,
    UnsupportedType,
    PageLimit { pages: usize, limit: usize },
    DisallowedMedia,
    NoSupportedMembers,
}

impl SkipReason {
    /// Exclusions go to the excluded ledger; everything else is "unprocessed".
    pub fn is_exclusion(&self) -> bool {
        matches!(
            self,
            SkipReason::DisallowedMedia | SkipReason::NoSupportedMembers
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing => f.write_str("file does not exist"),
            SkipReason::Directory => f.write_str("path is a directory"),
            SkipReason::UnsupportedType => f.write_str("unsupported file type"),
            SkipReason::PageLimit { limit, .. } => write!(
                f,
                "PDF file contains over {} pages. This file was skipped.",
                limit
            ),
            SkipReason::DisallowedMedia => f.write_str("video or media file excluded"),
            SkipReason::NoSupportedMembers => {
                f.write_str("archive contains no supported files")
            }
        }
    }
}

/// Paths of the canonical files written for one successful source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedOutput {
    pub bioc: Option<PathBuf>,
    pub tables: Option<PathBuf>,
}

/// Member tallies for an archive that was unpacked and walked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Terminal result for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success(ProcessedOutput),
    /// The archive itself was readable; each member carries its own outcome.
    Expanded(ArchiveSummary),
    Skipped(SkipReason),
    Failed {
        reason: String,
        member: Option<String>,
    },
}

impl ExtractionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ExtractionOutcome::Failed {
            reason: reason.into(),
            member: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }
}

/// Two-dimensional table with a distinguished header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// First row becomes the header; every row is padded to the widest one.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Option<Self> {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return None;
        }
        for row in rows.iter_mut() {
            row.resize(width, String::new());
        }
        let header = rows.remove(0);
        Some(Self {
            title: None,
            header,
            rows,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }
}

/// What a fragment of narrative came from; becomes the passage `type` infon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassageKind {
    Paragraph,
    Slide,
}

impl PassageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassageKind::Paragraph => "paragraph",
            PassageKind::Slide => "slide",
        }
    }
}

/// One unit of extractor output: narrative text, a table, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: PassageKind,
    pub text: Option<String>,
    pub table: Option<Table>,
}

impl Fragment {
    pub fn text(kind: PassageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: Some(text.into()),
            table: None,
        }
    }

    pub fn table(table: Table) -> Self {
        Self {
            kind: PassageKind::Paragraph,
            text: None,
            table: Some(table),
        }
    }
}

/// Extractor output before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawExtraction {
    Text(String),
    Fragments(Vec<Fragment>),
}

/// Per-article context for one run of the dispatcher.
#[derive(Debug, Clone)]
pub struct ArticleContext {
    /// Article directory name, e.g. `PMC123_supplementary`.
    pub dir_name: String,
    /// Identifier with the directory suffix removed, e.g. `PMC123`.
    pub article_id: String,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// File name to download URL, from the set's download log.
    pub urls: HashMap<String, String>,
}

impl ArticleContext {
    pub fn from_dir(article_dir: &Path) -> Self {
        let dir_name = article_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let article_id = dir_name
            .strip_suffix(ARTICLE_DIR_SUFFIX)
            .unwrap_or(&dir_name)
            .to_string();
        Self {
            dir_name,
            article_id,
            raw_dir: article_dir.join("Raw"),
            processed_dir: article_dir.join("Processed"),
            urls: HashMap::new(),
        }
    }

    /// Download URL of a top-level file, or its name when the log has none.
    pub fn source_url(&self, artifact: &ArtifactPath) -> String {
        let rel = artifact.top_level_relative();
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.urls
            .get(name)
            .cloned()
            .unwrap_or_else(|| rel.to_string())
    }
}
