//! Format adapters and the shared extraction context.
//!
//! Each collaborator is a trait so the dispatcher can be driven with stubs:
//!
//! | Trait | Input | Output |
//! |-------|-------|--------|
//! | [`WordExtractor`] | `.docx`, `.txt` | text; docx tables as pipe rows |
//! | [`TableExtractor`] | `.csv`, `.tsv`, `.xlsx` | one [`Table`] per sheet |
//! | [`PresentationExtractor`] | `.pptx` | one string per slide |
//! | [`PdfExtractor`] | `.pdf` | page count, text |
//! | [`OcrExtractor`](crate::ocr::OcrExtractor) | images | paragraphs |
//!
//! OOXML parts are read with a per-entry size cap (zip-bomb protection) and
//! parsed with `quick-xml`. Legacy binary formats (`.doc`, `.xls`, `.ppt`)
//! and ODF/RTF are reported as unsupported rather than guessed at.

use crate::classify;
use crate::config::Config;
use crate::models::{FileClassification, Table};
use crate::ocr::{OcrChain, OcrExtractor};
use quick_xml::events::Event;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet, counting the blanks padded in before a
/// cell placed by reference.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Columns in a worksheet (`A` through `XFD`).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes read from a single OOXML part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("table extraction failed: {0}")]
    Table(String),
    #[error("{0}")]
    Ocr(String),
    #[error("Failed to identify extractable text")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait WordExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;
}

pub trait TableExtractor {
    fn extract_tables(&self, path: &Path) -> Result<Vec<Table>, ExtractError>;
}

pub trait PresentationExtractor {
    fn extract_slides(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

pub trait PdfExtractor {
    fn page_count(&self, path: &Path) -> Result<usize, ExtractError>;
    fn extract(&self, path: &Path) -> Result<PdfContent, ExtractError>;
}

#[derive(Debug, Clone, Default)]
pub struct PdfContent {
    pub text: String,
    pub tables: Vec<Table>,
}

/// Builds the PDF backend on first use.
pub type PdfFactory = Box<dyn Fn() -> Result<Box<dyn PdfExtractor>, ExtractError>>;

/// Collaborators for one pipeline run.
///
/// The PDF backend is created lazily, at most once between releases, and is
/// released after `release_after_pages` pages to bound its memory.
pub struct ExtractionContext {
    pub word: Box<dyn WordExtractor>,
    pub tables: Box<dyn TableExtractor>,
    pub presentation: Box<dyn PresentationExtractor>,
    pub ocr: Box<dyn OcrExtractor>,
    pdf_factory: PdfFactory,
    pdf: Option<Box<dyn PdfExtractor>>,
    pages_since_init: usize,
    release_after_pages: usize,
    initializations: usize,
}

impl ExtractionContext {
    /// Built-in adapters plus the OCR chain described by `config`.
    pub fn builtin(config: &Config) -> anyhow::Result<Self> {
        let ocr = OcrChain::from_config(&config.ocr)?;
        Ok(Self::new(Box::new(ocr), config.pipeline.release_after_pages))
    }

    pub fn new(ocr: Box<dyn OcrExtractor>, release_after_pages: usize) -> Self {
        Self {
            word: Box::new(OoxmlWordExtractor),
            tables: Box::new(DelimitedTableExtractor),
            presentation: Box::new(OoxmlPresentationExtractor),
            ocr,
            pdf_factory: Box::new(|| Ok(Box::new(LopdfExtractor) as Box<dyn PdfExtractor>)),
            pdf: None,
            pages_since_init: 0,
            release_after_pages: release_after_pages.max(1),
            initializations: 0,
        }
    }

    pub fn with_word(mut self, word: Box<dyn WordExtractor>) -> Self {
        self.word = word;
        self
    }

    pub fn with_tables(mut self, tables: Box<dyn TableExtractor>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_presentation(mut self, presentation: Box<dyn PresentationExtractor>) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn with_pdf_factory(mut self, factory: PdfFactory) -> Self {
        self.pdf_factory = factory;
        self.pdf = None;
        self
    }

    /// The PDF backend, initializing it if needed.
    pub fn pdf(&mut self) -> Result<&dyn PdfExtractor, ExtractError> {
        if self.pdf.is_none() {
            let backend = (self.pdf_factory)()?;
            self.initializations += 1;
            self.pages_since_init = 0;
            debug!(count = self.initializations, "initialized PDF backend");
            self.pdf = Some(backend);
        }
        self.pdf
            .as_deref()
            .ok_or_else(|| ExtractError::Pdf("backend unavailable".into()))
    }

    /// Count pages handled by the current backend; releases it past the threshold.
    pub fn note_pdf_pages(&mut self, pages: usize) {
        self.pages_since_init += pages;
        if self.pages_since_init >= self.release_after_pages {
            self.release();
        }
    }

    pub fn release(&mut self) {
        if self.pdf.take().is_some() {
            debug!(pages = self.pages_since_init, "released PDF backend");
        }
        self.pages_since_init = 0;
    }

    /// How many times the PDF backend has been created.
    pub fn pdf_initializations(&self) -> usize {
        self.initializations
    }
}

fn extension(path: &Path) -> String {
    path.file_name()
        .and_then(|n| classify::extension_of(&n.to_string_lossy()))
        .unwrap_or_default()
}

/// Recognized extension, otherwise the sniffed MIME type. Follows the same
/// order as `classify_with_fallback`, so a text file named `model.pdb` reads
/// as `.txt` here just as it classifies as Word there.
fn format_key(path: &Path) -> String {
    let ext = extension(path);
    let recognized = !ext.is_empty()
        && !classify::AMBIGUOUS_EXTENSIONS.contains(&ext.as_str())
        && classify::classify_extension(&ext) != FileClassification::Unknown;
    if recognized {
        return ext;
    }
    match classify::sniff_mime(path).as_deref() {
        Some(MIME_DOCX) => ".docx".into(),
        Some(MIME_PPTX) => ".pptx".into(),
        Some(MIME_XLSX) => ".xlsx".into(),
        Some("application/pdf") => ".pdf".into(),
        Some("text/plain") => ".txt".into(),
        Some(other) => other.to_string(),
        None => ext,
    }
}

// ---------------------------------------------------------------------------
// Word
// ---------------------------------------------------------------------------

/// `.docx` via `word/document.xml`, `.txt` as (lossy) UTF-8.
pub struct OoxmlWordExtractor;

impl WordExtractor for OoxmlWordExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        match format_key(path).as_str() {
            ".docx" => {
                let mut archive = open_ooxml(path)?;
                let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
                docx_text(&xml)
            }
            ".txt" => {
                let bytes = std::fs::read(path)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => Err(ExtractError::Unsupported(format!("word document {}", other))),
        }
    }
}

/// Paragraph text one per line; tables rendered as `a | b | c` rows so the
/// assembler lifts them out like any other pipe block.
fn docx_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_t = false;
    let mut table_depth = 0usize;
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut paragraph = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_t = true,
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 && !paragraph.trim().is_empty() {
                        out.push_str(paragraph.trim_end());
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push(' '),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if table_depth > 0 {
                        if !cell.is_empty() && !paragraph.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(paragraph.trim());
                    } else if !paragraph.trim().is_empty() {
                        out.push_str(paragraph.trim_end());
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                b"tc" if table_depth == 1 => {
                    row.push(std::mem::take(&mut cell).replace('|', "/"));
                }
                b"tr" if table_depth == 1 => {
                    if row.iter().any(|c| !c.is_empty()) {
                        out.push_str(&row.join(" | "));
                        out.push('\n');
                    }
                    row.clear();
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 {
                        // blank line ends the pipe block
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !paragraph.trim().is_empty() {
        out.push_str(paragraph.trim_end());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Presentations
// ---------------------------------------------------------------------------

/// `.pptx` slides in slide-number order.
pub struct OoxmlPresentationExtractor;

impl PresentationExtractor for OoxmlPresentationExtractor {
    fn extract_slides(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let key = format_key(path);
        if key != ".pptx" {
            return Err(ExtractError::Unsupported(format!("presentation {}", key)));
        }
        let mut archive = open_ooxml(path)?;
        let mut slide_names: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .map(|s| s.to_string())
            .collect();
        slide_names.sort_by_key(|name| numbered_part(name, "ppt/slides/slide"));
        let mut slides = Vec::with_capacity(slide_names.len());
        for name in slide_names {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            slides.push(slide_text(&xml)?);
        }
        Ok(slides)
    }
}

fn numbered_part(name: &str, prefix: &str) -> u32 {
    name.trim_start_matches(prefix)
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

/// `a:t` runs, one line per `a:p` paragraph.
fn slide_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        lines.push(current.trim().to_string());
    }
    Ok(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// `.csv` / `.tsv` through the `csv` reader, `.xlsx` one table per sheet.
pub struct DelimitedTableExtractor;

impl TableExtractor for DelimitedTableExtractor {
    fn extract_tables(&self, path: &Path) -> Result<Vec<Table>, ExtractError> {
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match format_key(path).as_str() {
            ".csv" => delimited_table(path, b',', &title),
            ".tsv" => delimited_table(path, b'\t', &title),
            ".txt" => {
                let head = std::fs::read(path)?;
                let delimiter = if head.contains(&b'\t') { b'\t' } else { b',' };
                delimited_table(path, delimiter, &title)
            }
            ".xlsx" => xlsx_tables(path),
            other => Err(ExtractError::Unsupported(format!("spreadsheet {}", other))),
        }
    }
}

fn delimited_table(path: &Path, delimiter: u8, title: &str) -> Result<Vec<Table>, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ExtractError::Table(e.to_string()))?;
    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| ExtractError::Table(e.to_string()))?;
        let row: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).trim().to_string())
            .collect();
        if row.iter().any(|c| !c.is_empty()) {
            rows.push(row);
        }
    }
    Ok(Table::from_rows(rows)
        .map(|t| t.with_title(title))
        .into_iter()
        .collect())
}

fn xlsx_tables(path: &Path) -> Result<Vec<Table>, ExtractError> {
    let mut archive = open_ooxml(path)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_titles = read_sheet_titles(&mut archive)?;
    let mut sheet_parts: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_parts.sort_by_key(|name| numbered_part(name, "xl/worksheets/sheet"));

    let mut tables = Vec::new();
    for (idx, part) in sheet_parts.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        let title = sheet_titles
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        if let Some(table) = Table::from_rows(rows) {
            tables.push(table.with_title(title));
        }
    }
    Ok(tables)
}

fn read_shared_strings<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, ExtractError> {
    const PART: &str = "xl/sharedStrings.xml";
    if !archive.file_names().any(|n| n == PART) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, PART, MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_titles<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, ExtractError> {
    const PART: &str = "xl/workbook.xml";
    if !archive.file_names().any(|n| n == PART) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, PART, MAX_XML_ENTRY_BYTES)?;
    let mut titles = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"name" {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                        titles.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(titles)
}

/// Zero-based column from a cell reference such as `AB12`; `None` without
/// column letters or past `XFD`.
fn column_index(reference: &str) -> Option<usize> {
    let mut index = 0usize;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
        if index > XLSX_MAX_COLUMNS {
            return None;
        }
    }
    index.checked_sub(1)
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut column: Option<usize> = None;
    let mut padded = 0usize;
    let mut cell_type: Vec<u8> = Vec::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    column = Some(row.len());
                    cell_type.clear();
                    value.clear();
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"r" => {
                                column = column_index(&String::from_utf8_lossy(&attr.value));
                            }
                            b"t" => cell_type = attr.value.to_vec(),
                            _ => {}
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                value.push_str(&te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    // cells with an unusable reference are dropped
                    if let Some(column) = column {
                        let resolved = if cell_type == b"s" {
                            value
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared_strings.get(i).cloned())
                                .unwrap_or_default()
                        } else {
                            value.clone()
                        };
                        if row.len() <= column {
                            padded += column + 1 - row.len();
                            if padded > XLSX_MAX_CELLS_PER_SHEET {
                                debug!(padded, "sheet truncated at cell limit");
                                break;
                            }
                            row.resize(column + 1, String::new());
                        }
                        row[column] = resolved.trim().to_string();
                    }
                    cell_count += 1;
                }
                b"row" => {
                    let done = std::mem::take(&mut row);
                    if done.iter().any(|c| !c.is_empty()) {
                        rows.push(done);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if row.iter().any(|c| !c.is_empty()) {
        rows.push(row);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

/// Page counts from `lopdf`, text from `pdf-extract`.
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn page_count(&self, path: &Path) -> Result<usize, ExtractError> {
        let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(doc.get_pages().len())
    }

    fn extract(&self, path: &Path) -> Result<PdfContent, ExtractError> {
        let bytes = std::fs::read(path)?;
        let text =
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(PdfContent {
            text,
            tables: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// OOXML helpers
// ---------------------------------------------------------------------------

fn open_ooxml(path: &Path) -> Result<zip::ZipArchive<File>, ExtractError> {
    let file = File::open(path)?;
    zip::ZipArchive::new(file).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}
