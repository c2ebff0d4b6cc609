//! Set driver and per-file dispatcher.
//!
//! ```text
//! <set>/
//!   download_log.tsv              folder  article  url   (optional)
//!   PMC123_supplementary/
//!     Raw/        inputs, any depth
//!     Processed/  mirror of Raw: <file>_bioc.json, <file>_tables.json
//! ```
//!
//! For each file the [`Dispatcher`] checks existence, filters media,
//! classifies, routes through the handler table, assembles and writes the
//! canonical files, and records the outcome in the ledger. Archives are
//! walked and every leaf goes through the same steps. Adapter errors and
//! panics are converted to `Failed` here and nowhere else, so one bad file
//! never stops a run.

use crate::archive::{self, WalkEvent, WalkLimits};
use crate::assemble::{self, SourceInfo, BIOC_SUFFIX, TABLES_SUFFIX};
use crate::bioc::Infons;
use crate::classify;
use crate::config::Config;
use crate::extract::{ExtractError, ExtractionContext};
use crate::ledger::{self, Ledger, LedgerEntry};
use crate::media;
use crate::models::{
    ArchiveSummary, ArticleContext, ArtifactPath, ExtractionOutcome, FileClassification, Fragment,
    PassageKind, RawExtraction, SkipReason,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::segment::Segmenter;
use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const DOWNLOAD_LOG: &str = "download_log.tsv";

/// What a handler produced before assembly.
enum Extracted {
    Content { raw: RawExtraction, infons: Infons },
    Skip(SkipReason),
}

impl Extracted {
    fn content(raw: RawExtraction) -> Self {
        Extracted::Content {
            raw,
            infons: Infons::new(),
        }
    }
}

type Route = fn(&mut Dispatcher, &ArtifactPath, &ArticleContext) -> Result<Extracted, ExtractError>;

/// Classification to handler. Archives and unknown files are handled
/// before this table is consulted.
const ROUTES: &[(FileClassification, Route)] = &[
    (FileClassification::Word, Dispatcher::extract_word as Route),
    (FileClassification::Spreadsheet, Dispatcher::extract_spreadsheet as Route),
    (FileClassification::Image, Dispatcher::extract_image as Route),
    (FileClassification::Pdf, Dispatcher::extract_pdf as Route),
    (FileClassification::Presentation, Dispatcher::extract_presentation as Route),
];

fn route_for(class: FileClassification) -> Option<Route> {
    ROUTES.iter().find(|(c, _)| *c == class).map(|(_, r)| *r)
}

/// Turns one file into one [`ExtractionOutcome`] and records it.
pub struct Dispatcher {
    config: Config,
    ctx: ExtractionContext,
    ledger: Arc<Ledger>,
    segmenter: Option<Segmenter>,
    limits: WalkLimits,
}

impl Dispatcher {
    pub fn new(config: &Config, ctx: ExtractionContext, ledger: Arc<Ledger>) -> Self {
        let segmenter = config
            .pipeline
            .sentence_split
            .then(|| Segmenter::from_config(&config.segmenter));
        Self {
            config: config.clone(),
            ctx,
            ledger,
            segmenter,
            limits: WalkLimits::from(&config.pipeline),
        }
    }

    pub fn context(&self) -> &ExtractionContext {
        &self.ctx
    }

    /// Release the PDF backend at the end of a run.
    pub fn release(&mut self) {
        self.ctx.release();
    }

    /// Process one file and record its outcome in the ledger.
    pub fn handle(&mut self, artifact: &ArtifactPath, article: &ArticleContext) -> ExtractionOutcome {
        let outcome = self.process(artifact, article);
        self.record(artifact, article, &outcome);
        outcome
    }

    /// Process one file. Archive members are recorded as they are reached;
    /// the returned outcome is for `artifact` itself.
    pub fn process(&mut self, artifact: &ArtifactPath, article: &ArticleContext) -> ExtractionOutcome {
        match std::fs::metadata(&artifact.physical) {
            Err(_) => return ExtractionOutcome::Skipped(SkipReason::Missing),
            Ok(meta) if meta.is_dir() => return ExtractionOutcome::Skipped(SkipReason::Directory),
            Ok(_) => {}
        }
        if media::is_media(artifact.file_name(), &self.config.media) {
            return ExtractionOutcome::Skipped(SkipReason::DisallowedMedia);
        }

        let classified = classify::classify_with_fallback(&artifact.physical);
        if let Some(mime) = &classified.sniffed_mime {
            self.record_identified(artifact, article, mime, classified.class);
        }
        let class = classified.class;
        debug!(file = %artifact, class = %class, "classified");

        match class {
            FileClassification::Unknown => ExtractionOutcome::Skipped(SkipReason::UnsupportedType),
            FileClassification::Archive if artifact.is_archived() => {
                // the walker expands nested archives itself
                self.failed(artifact, "unreadable archive")
            }
            FileClassification::Archive => self.process_archive(artifact, article),
            _ => self.process_leaf(artifact, article, class),
        }
    }

    fn process_leaf(
        &mut self,
        artifact: &ArtifactPath,
        article: &ArticleContext,
        class: FileClassification,
    ) -> ExtractionOutcome {
        let Some(route) = route_for(class) else {
            return ExtractionOutcome::Skipped(SkipReason::UnsupportedType);
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| route(self, artifact, article)));
        let extracted = match result {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => return self.failed(artifact, e.to_string()),
            Err(payload) => {
                // a panicking backend may hold inconsistent state
                self.ctx.release();
                return self.failed(artifact, panic_message(payload.as_ref()));
            }
        };
        match extracted {
            Extracted::Skip(reason) => ExtractionOutcome::Skipped(reason),
            Extracted::Content { raw, infons } => self.finish(artifact, article, class, raw, infons),
        }
    }

    fn finish(
        &mut self,
        artifact: &ArtifactPath,
        article: &ArticleContext,
        class: FileClassification,
        raw: RawExtraction,
        infons: Infons,
    ) -> ExtractionOutcome {
        let logical = artifact.logical();
        let source = SourceInfo {
            file_name: artifact.file_name().to_string(),
            logical_path: logical.clone(),
            classification: class,
            infons,
        };
        let output = assemble::assemble(&raw, &source, self.segmenter.as_ref());
        if output.is_empty() {
            return self.failed(artifact, ExtractError::Empty.to_string());
        }
        let base = assemble::output_base(&article.processed_dir, &logical);
        match assemble::write_outputs(&output, &base, &logical) {
            Ok(written) => {
                debug!(file = %artifact, bioc = written.bioc.is_some(), tables = written.tables.is_some(), "wrote outputs");
                ExtractionOutcome::Success(written)
            }
            Err(e) => self.failed(artifact, format!("could not write output: {}", e)),
        }
    }

    fn process_archive(&mut self, archive: &ArtifactPath, article: &ArticleContext) -> ExtractionOutcome {
        let items = match archive::inventory(archive, &self.limits) {
            Ok(items) => items,
            Err(e) => return self.failed(archive, e.to_string()),
        };
        let supported = items.iter().any(|item| {
            item.class.is_extractable() && !media::is_media(&item.member, &self.config.media)
        });
        if !supported {
            return ExtractionOutcome::Skipped(SkipReason::NoSupportedMembers);
        }

        let mut summary = ArchiveSummary::default();
        for event in archive::walk(archive.clone(), self.limits.clone()) {
            let (member, outcome) = match event {
                WalkEvent::Member(member) => {
                    let outcome = self.process(&member, article);
                    (member, outcome)
                }
                WalkEvent::Unreadable { archive: a, error } if a == *archive => {
                    return self.failed(archive, error.to_string());
                }
                WalkEvent::Unreadable { archive: nested, error } => {
                    let outcome = self.failed(&nested, error.to_string());
                    (nested, outcome)
                }
            };
            match &outcome {
                ExtractionOutcome::Success(_) => summary.succeeded += 1,
                ExtractionOutcome::Skipped(_) => summary.skipped += 1,
                ExtractionOutcome::Failed { .. } => summary.failed += 1,
                ExtractionOutcome::Expanded(_) => {}
            }
            self.record(&member, article, &outcome);
        }
        info!(
            archive = %archive,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "archive processed"
        );
        ExtractionOutcome::Expanded(summary)
    }

    fn failed(&self, artifact: &ArtifactPath, reason: impl Into<String>) -> ExtractionOutcome {
        let reason = reason.into();
        warn!(file = %artifact, reason = %reason, "extraction failed");
        ExtractionOutcome::Failed {
            reason,
            member: artifact.archived_member(),
        }
    }

    // -- handlers ---------------------------------------------------------

    fn extract_word(&mut self, artifact: &ArtifactPath, _: &ArticleContext) -> Result<Extracted, ExtractError> {
        let text = self.ctx.word.extract_text(&artifact.physical)?;
        Ok(Extracted::content(RawExtraction::Text(text)))
    }

    fn extract_spreadsheet(
        &mut self,
        artifact: &ArtifactPath,
        _: &ArticleContext,
    ) -> Result<Extracted, ExtractError> {
        let tables = self.ctx.tables.extract_tables(&artifact.physical)?;
        if tables.is_empty() {
            return Err(ExtractError::Empty);
        }
        let fragments = tables.into_iter().map(Fragment::table).collect();
        Ok(Extracted::content(RawExtraction::Fragments(fragments)))
    }

    fn extract_image(
        &mut self,
        artifact: &ArtifactPath,
        article: &ArticleContext,
    ) -> Result<Extracted, ExtractError> {
        let outcome = self.ctx.ocr.recognize(&artifact.physical, &article.article_id);
        let Some(paragraphs) = outcome.paragraphs else {
            let reason = outcome
                .failure
                .unwrap_or_else(|| ExtractError::Empty.to_string());
            return Err(ExtractError::Ocr(reason));
        };
        let mut infons = Infons::new();
        if let Some(source) = outcome.source {
            infons.insert("ocr_source".into(), source);
        }
        let fragments = paragraphs
            .into_iter()
            .map(|p| Fragment::text(PassageKind::Paragraph, p))
            .collect();
        Ok(Extracted::Content {
            raw: RawExtraction::Fragments(fragments),
            infons,
        })
    }

    fn extract_pdf(&mut self, artifact: &ArtifactPath, _: &ArticleContext) -> Result<Extracted, ExtractError> {
        let limit = self.config.pipeline.max_pdf_pages;
        let pages = self.ctx.pdf()?.page_count(&artifact.physical)?;
        if pages > limit {
            return Ok(Extracted::Skip(SkipReason::PageLimit { pages, limit }));
        }
        let content = self.ctx.pdf()?.extract(&artifact.physical)?;
        self.ctx.note_pdf_pages(pages);
        let mut fragments = vec![Fragment::text(PassageKind::Paragraph, content.text)];
        fragments.extend(content.tables.into_iter().map(Fragment::table));
        let mut infons = Infons::new();
        infons.insert("pages".into(), pages.to_string());
        Ok(Extracted::Content {
            raw: RawExtraction::Fragments(fragments),
            infons,
        })
    }

    fn extract_presentation(
        &mut self,
        artifact: &ArtifactPath,
        _: &ArticleContext,
    ) -> Result<Extracted, ExtractError> {
        let slides = self.ctx.presentation.extract_slides(&artifact.physical)?;
        let fragments = slides
            .into_iter()
            .map(|s| Fragment::text(PassageKind::Slide, s))
            .collect();
        Ok(Extracted::content(RawExtraction::Fragments(fragments)))
    }

    // -- ledger -----------------------------------------------------------

    fn record(&self, artifact: &ArtifactPath, article: &ArticleContext, outcome: &ExtractionOutcome) {
        let top_level = !artifact.is_archived();
        let entry = match outcome {
            ExtractionOutcome::Success(_) if top_level => Some(self.included(artifact, article)),
            ExtractionOutcome::Expanded(s) if top_level && s.succeeded > 0 => {
                Some(self.included(artifact, article))
            }
            ExtractionOutcome::Success(_) | ExtractionOutcome::Expanded(_) => None,
            ExtractionOutcome::Skipped(reason) if reason.is_exclusion() => Some(LedgerEntry::Excluded {
                article_id: article.article_id.clone(),
                source_url: article.source_url(artifact),
                member: artifact.archived_member(),
            }),
            ExtractionOutcome::Skipped(reason) => Some(self.unprocessed(
                artifact,
                article,
                artifact.archived_member(),
                reason.to_string(),
            )),
            ExtractionOutcome::Failed { reason, member } => {
                Some(self.unprocessed(artifact, article, member.clone(), reason.clone()))
            }
        };
        if let Some(entry) = entry {
            if let Err(e) = self.ledger.record(&entry) {
                error!(file = %artifact, error = %e, "could not write ledger entry");
            }
        }
    }

    fn included(&self, artifact: &ArtifactPath, article: &ArticleContext) -> LedgerEntry {
        LedgerEntry::Included {
            article_dir: article.dir_name.clone(),
            article_id: article.article_id.clone(),
            source_url: article.source_url(artifact),
        }
    }

    fn unprocessed(
        &self,
        artifact: &ArtifactPath,
        article: &ArticleContext,
        member: Option<String>,
        reason: String,
    ) -> LedgerEntry {
        LedgerEntry::Unprocessed {
            article_dir: article.dir_name.clone(),
            article_id: article.article_id.clone(),
            file_name: artifact.top_level_relative().to_string(),
            member,
            reason,
        }
    }

    fn record_identified(
        &self,
        artifact: &ArtifactPath,
        article: &ArticleContext,
        mime: &str,
        class: FileClassification,
    ) {
        let entry = LedgerEntry::IdentifiedType {
            article_dir: article.dir_name.clone(),
            article_id: article.article_id.clone(),
            file_name: artifact.logical(),
            mime: mime.to_string(),
            class: class.to_string(),
        };
        if let Err(e) = self.ledger.record(&entry) {
            error!(file = %artifact, error = %e, "could not write ledger entry");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("extractor panicked: {}", detail)
}

// ---------------------------------------------------------------------------
// Set driver
// ---------------------------------------------------------------------------

/// Totals for one `process_set` run. Archive members count as files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetReport {
    pub articles: usize,
    pub files: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SetReport {
    fn tally(&mut self, outcome: &ExtractionOutcome) {
        match outcome {
            ExtractionOutcome::Success(_) => {
                self.files += 1;
                self.succeeded += 1;
            }
            ExtractionOutcome::Expanded(s) => {
                self.files += s.succeeded + s.skipped + s.failed;
                self.succeeded += s.succeeded;
                self.skipped += s.skipped;
                self.failed += s.failed;
            }
            ExtractionOutcome::Skipped(_) => {
                self.files += 1;
                self.skipped += 1;
            }
            ExtractionOutcome::Failed { .. } => {
                self.files += 1;
                self.failed += 1;
            }
        }
    }
}

/// Process every article of a set with the built-in adapters.
pub fn process_set(config: &Config, set_dir: &Path, reporter: &dyn ProgressReporter) -> Result<SetReport> {
    let ctx = ExtractionContext::builtin(config)?;
    process_set_with(config, set_dir, ctx, reporter)
}

/// Process every article of a set with the given collaborators.
pub fn process_set_with(
    config: &Config,
    set_dir: &Path,
    ctx: ExtractionContext,
    reporter: &dyn ProgressReporter,
) -> Result<SetReport> {
    if !set_dir.is_dir() {
        bail!("Set directory does not exist: {}", set_dir.display());
    }
    let set_name = set_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    reporter.report(ProgressEvent::Discovering {
        set: set_name.clone(),
    });

    let ledger = Arc::new(Ledger::open(set_dir));
    let mut urls = load_download_log(set_dir)?;
    let exclude = build_globset(&config.pipeline.exclude_globs)?;
    let articles = discover_articles(set_dir)?;
    let mut dispatcher = Dispatcher::new(config, ctx, ledger);
    let mut report = SetReport::default();

    for (i, article_dir) in articles.iter().enumerate() {
        let mut article = ArticleContext::from_dir(article_dir);
        article.urls = urls.remove(&article.article_id).unwrap_or_default();
        reporter.report(ProgressEvent::Processing {
            set: set_name.clone(),
            article: article.dir_name.clone(),
            n: (i + 1) as u64,
            total: articles.len() as u64,
        });
        for (relative, path) in scan_raw(&article.raw_dir, &exclude)? {
            let artifact = ArtifactPath::top_level(path, relative);
            let outcome = dispatcher.handle(&artifact, &article);
            report.tally(&outcome);
        }
        report.articles += 1;
    }
    dispatcher.release();

    info!(
        set = %set_name,
        articles = report.articles,
        files = report.files,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        "set processed"
    );
    Ok(report)
}

/// Article directories (those with a `Raw` subdirectory), sorted by name.
pub fn discover_articles(set_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut articles = Vec::new();
    for entry in std::fs::read_dir(set_dir)? {
        let path = entry?.path();
        if path.is_dir() && path.join("Raw").is_dir() {
            articles.push(path);
        }
    }
    articles.sort();
    Ok(articles)
}

/// Files under `raw_dir` as (`/`-separated relative path, absolute path),
/// sorted for deterministic ordering.
pub fn scan_raw(raw_dir: &Path, exclude: &GlobSet) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    if !raw_dir.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(raw_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(raw_dir).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if exclude.is_match(&rel_str) || rel_str.ends_with(BIOC_SUFFIX) || rel_str.ends_with(TABLES_SUFFIX) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }
    Ok(files)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// `article id -> (file name -> url)` from the set's download log.
pub fn load_download_log(set_dir: &Path) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut map: HashMap<String, HashMap<String, String>> = HashMap::new();
    for row in ledger::read_rows(&set_dir.join(DOWNLOAD_LOG))? {
        let (Some(article), Some(url)) = (row.get(1), row.get(2)) else {
            continue;
        };
        let name = url_file_name(url);
        if name.is_empty() {
            continue;
        }
        map.entry(article.trim().to_string())
            .or_default()
            .insert(name, url.trim().to_string());
    }
    Ok(map)
}

/// Last path segment of a URL, without query or fragment.
pub fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}
