//! Normalize extractor output into the canonical document and table files.
//!
//! Free text is scanned line by line for pipe-delimited blocks (the shape
//! PDF and OCR extractors give tables). Each block becomes a [`Table`];
//! every other non-blank line becomes one passage. Fragment lists (slides,
//! OCR paragraphs, spreadsheet sheets) are handled per fragment, so passage
//! offsets stay contiguous however the text arrived.

use crate::bioc::{BiocCollection, BiocDocument, Infons};
use crate::models::{FileClassification, Fragment, PassageKind, ProcessedOutput, RawExtraction, Table};
use crate::segment::Segmenter;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const BIOC_SUFFIX: &str = "_bioc.json";
pub const TABLES_SUFFIX: &str = "_tables.json";

/// Where a piece of extracted content came from.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Document id; the file's own name.
    pub file_name: String,
    /// Archive-qualified path relative to the raw tree.
    pub logical_path: String,
    pub classification: FileClassification,
    /// Extra document infons such as the OCR service used.
    pub infons: Infons,
}

/// Assembled output for one source file.
#[derive(Debug, Clone, Default)]
pub struct CanonicalOutput {
    pub document: Option<BiocCollection>,
    pub tables: Vec<Table>,
}

impl CanonicalOutput {
    pub fn is_empty(&self) -> bool {
        self.document.is_none() && self.tables.is_empty()
    }
}

#[derive(Serialize)]
struct TablesFile<'a> {
    source: &'a str,
    tables: &'a [Table],
}

fn dash_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-+\s*$").expect("static regex"))
}

/// Separate pipe-delimited blocks from narrative text.
///
/// A block is a run of consecutive lines containing `|`. It ends at the first
/// line without one, at a blank line, or at the end of input. Returns the
/// remaining narrative lines and the tables in reading order.
pub fn split_tables(text: &str) -> (Vec<String>, Vec<Table>) {
    let mut narrative = Vec::new();
    let mut tables = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            if in_block {
                in_block = false;
                tables.extend(Table::from_rows(std::mem::take(&mut block)));
            }
            continue;
        }
        if line.contains('|') {
            in_block = true;
            let row = split_row(line);
            if !row.is_empty() {
                block.push(row);
            }
            continue;
        }
        if in_block {
            in_block = false;
            tables.extend(Table::from_rows(std::mem::take(&mut block)));
        }
        if !dash_line().is_match(line) {
            narrative.push(line.trim_end().to_string());
        }
    }
    if in_block {
        tables.extend(Table::from_rows(block));
    }
    (narrative, tables)
}

fn split_row(line: &str) -> Vec<String> {
    line.split('|')
        .filter(|cell| !cell.chars().all(|c| c == '|' || c == '-'))
        .map(|cell| cell.trim().to_string())
        .collect()
}

/// Build the canonical document and tables for one source file.
///
/// With `segmenter` set, every passage is also split into sentences.
pub fn assemble(
    raw: &RawExtraction,
    source: &SourceInfo,
    segmenter: Option<&Segmenter>,
) -> CanonicalOutput {
    let mut document = BiocDocument::new(source.file_name.clone());
    document.infons = source.infons.clone();
    document
        .infons
        .insert("source_path".into(), source.logical_path.clone());
    document
        .infons
        .insert("classification".into(), source.classification.to_string());

    let mut tables = Vec::new();
    match raw {
        RawExtraction::Text(body) => {
            push_narrative(&mut document, &mut tables, body, PassageKind::Paragraph, None);
        }
        RawExtraction::Fragments(fragments) => {
            for (index, fragment) in fragments.iter().enumerate() {
                push_fragment(&mut document, &mut tables, fragment, index);
            }
        }
    }

    let document = if document.passages.is_empty() {
        None
    } else {
        let collection = BiocCollection::new().with_document(document);
        Some(match segmenter {
            Some(seg) => collection.with_sentences(seg),
            None => collection,
        })
    };
    CanonicalOutput { document, tables }
}

fn push_fragment(
    document: &mut BiocDocument,
    tables: &mut Vec<Table>,
    fragment: &Fragment,
    index: usize,
) {
    if let Some(text) = &fragment.text {
        let number = match fragment.kind {
            PassageKind::Slide => Some(index + 1),
            PassageKind::Paragraph => None,
        };
        push_narrative(document, tables, text, fragment.kind, number);
    }
    if let Some(table) = &fragment.table {
        tables.push(table.clone());
    }
}

fn push_narrative(
    document: &mut BiocDocument,
    tables: &mut Vec<Table>,
    text: &str,
    kind: PassageKind,
    slide: Option<usize>,
) {
    let (lines, found) = split_tables(text);
    tables.extend(found);
    for line in lines {
        let mut infons = Infons::new();
        infons.insert("type".into(), kind.as_str().into());
        if let Some(n) = slide {
            infons.insert("slide".into(), n.to_string());
        }
        document.push_passage(line, infons);
    }
}

/// `Processed/<logical path>`; suffixes are appended to this base.
pub fn output_base(processed_dir: &Path, logical_path: &str) -> PathBuf {
    let mut base = processed_dir.to_path_buf();
    for part in logical_path.split('/').filter(|p| !p.is_empty() && *p != "..") {
        base.push(part);
    }
    base
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write the canonical files next to `base`, creating directories as needed.
/// Stale files from an earlier run are removed when this run produced none.
pub fn write_outputs(
    output: &CanonicalOutput,
    base: &Path,
    source: &str,
) -> anyhow::Result<ProcessedOutput> {
    if let Some(parent) = base.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bioc_path = with_suffix(base, BIOC_SUFFIX);
    let tables_path = with_suffix(base, TABLES_SUFFIX);
    let mut written = ProcessedOutput::default();

    match &output.document {
        Some(collection) => {
            collection.write(&bioc_path)?;
            written.bioc = Some(bioc_path);
        }
        None => remove_if_exists(&bioc_path)?,
    }
    if output.tables.is_empty() {
        remove_if_exists(&tables_path)?;
    } else {
        let file = TablesFile {
            source,
            tables: &output.tables,
        };
        let mut json = serde_json::to_string_pretty(&file)?;
        json.push('\n');
        std::fs::write(&tables_path, json)?;
        written.tables = Some(tables_path);
    }
    Ok(written)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::AbbreviationSet;
    use tempfile::TempDir;

    fn source() -> SourceInfo {
        SourceInfo {
            file_name: "S1.pdf".into(),
            logical_path: "S1.pdf".into(),
            classification: FileClassification::Pdf,
            infons: Infons::new(),
        }
    }

    #[test]
    fn pipe_block_becomes_table() {
        let text = "Intro line\n| Gene | Count |\n|------|-------|\n| BRCA1 | 3 |\n| TP53 | 5 |\nAfter table\n";
        let (lines, tables) = split_tables(text);
        assert_eq!(lines, vec!["Intro line", "After table"]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].header, vec!["Gene", "Count"]);
        assert_eq!(tables[0].rows, vec![vec!["BRCA1", "3"], vec!["TP53", "5"]]);
    }

    #[test]
    fn ragged_rows_padded() {
        let (_, tables) = split_tables("a | b | c\n1 | 2\nend");
        assert_eq!(tables[0].header, vec!["a", "b", "c"]);
        assert_eq!(tables[0].rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn table_at_end_of_text_is_kept() {
        let (lines, tables) = split_tables("Caption\nx | y\n1 | 2");
        assert_eq!(lines, vec!["Caption"]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn dash_only_lines_dropped() {
        let (lines, tables) = split_tables("Heading\n-----\nBody");
        assert_eq!(lines, vec!["Heading", "Body"]);
        assert!(tables.is_empty());
    }

    #[test]
    fn passages_have_contiguous_offsets() {
        let raw = RawExtraction::Text("First line.\n\nSecond line.\nThird.".into());
        let out = assemble(&raw, &source(), None);
        let doc = &out.document.as_ref().unwrap().documents[0];
        let offsets: Vec<usize> = doc.passages.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 11, 23]);
        assert_eq!(doc.infons["classification"], "pdf");
        assert!(out.document.unwrap().validate_offsets().is_ok());
    }

    #[test]
    fn slide_fragments_numbered() {
        let raw = RawExtraction::Fragments(vec![
            Fragment::text(PassageKind::Slide, "Title slide"),
            Fragment::text(PassageKind::Slide, "Results\nMore results"),
        ]);
        let out = assemble(&raw, &source(), None);
        let doc = &out.document.unwrap().documents[0];
        assert_eq!(doc.passages.len(), 3);
        assert_eq!(doc.passages[2].infons["slide"], "2");
        assert_eq!(doc.passages[2].infons["type"], "slide");
    }

    #[test]
    fn table_only_input_has_no_document() {
        let table = Table::from_rows(vec![vec!["h".into()], vec!["v".into()]]).unwrap();
        let raw = RawExtraction::Fragments(vec![Fragment::table(table)]);
        let out = assemble(&raw, &source(), None);
        assert!(out.document.is_none());
        assert_eq!(out.tables.len(), 1);
        assert!(!out.is_empty());
    }

    #[test]
    fn sentence_split_when_requested() {
        let raw = RawExtraction::Text("One. Two.".into());
        let seg = Segmenter::new(AbbreviationSet::default());
        let out = assemble(&raw, &source(), Some(&seg));
        let p = &out.document.unwrap().documents[0].passages[0];
        assert_eq!(p.sentences.len(), 2);
    }

    #[test]
    fn writing_twice_is_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let raw = RawExtraction::Text("Text\na | b\n1 | 2\n".into());
        let out = assemble(&raw, &source(), None);
        let base = output_base(tmp.path(), "dir/S1.pdf");
        let first = write_outputs(&out, &base, "dir/S1.pdf").unwrap();
        let bioc1 = std::fs::read(first.bioc.as_ref().unwrap()).unwrap();
        let tables1 = std::fs::read(first.tables.as_ref().unwrap()).unwrap();
        let second = write_outputs(&out, &base, "dir/S1.pdf").unwrap();
        assert_eq!(bioc1, std::fs::read(second.bioc.unwrap()).unwrap());
        assert_eq!(tables1, std::fs::read(second.tables.unwrap()).unwrap());
        assert!(tmp.path().join("dir/S1.pdf_bioc.json").exists());
    }

    #[test]
    fn output_base_ignores_parent_components() {
        let base = output_base(Path::new("/p"), "a.zip/../x.pdf");
        assert_eq!(base, PathBuf::from("/p/a.zip/x.pdf"));
    }
}
