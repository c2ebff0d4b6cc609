//! End-to-end runs of `process_set` over a small synthetic download set.
//!
//! Asserts: every input ends up either mirrored under Processed or in a
//! ledger, archives are expanded member by member, policy skips carry their
//! reason, and re-running rewrites byte-identical outputs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use supp_harness::config::Config;
use supp_harness::extract::{ExtractError, ExtractionContext, PdfContent, PdfExtractor};
use supp_harness::ledger::{Ledger, LedgerKind};
use supp_harness::ocr::NoOcr;
use supp_harness::pipeline::{self, SetReport};
use supp_harness::progress::NoProgress;
use tempfile::TempDir;
use walkdir::WalkDir;

fn zip_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_bytes(&[("word/document.xml", xml.into_bytes())])
}

/// Minimal one-page PDF showing "supp test phrase".
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (supp test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

const BINARY: &[u8] = &[0, 1, 2, 0, 255, 254, 7];

struct OversizedPdf;

impl PdfExtractor for OversizedPdf {
    fn page_count(&self, _: &Path) -> Result<usize, ExtractError> {
        Ok(250)
    }
    fn extract(&self, _: &Path) -> Result<PdfContent, ExtractError> {
        Err(ExtractError::Pdf("oversized PDFs are never extracted".into()))
    }
}

fn article(set: &Path, id: &str) -> PathBuf {
    let raw = set.join(format!("{}_supplementary", id)).join("Raw");
    fs::create_dir_all(&raw).unwrap();
    raw
}

fn build_set() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let set = tmp.path().join("set1");

    let raw = article(&set, "PMC1");
    fs::write(raw.join("notes.txt"), "Alpha line.\nBeta line.\n").unwrap();
    fs::write(raw.join("table.csv"), "gene,count\nBRCA1,3\nTP53,5\n").unwrap();
    fs::write(raw.join("report.docx"), minimal_docx(&["Results", "More results"])).unwrap();
    fs::write(raw.join("README"), "Plain words without an extension.\n").unwrap();
    let inner = zip_bytes(&[("deep.txt", b"Deep text.".to_vec())]);
    fs::write(
        raw.join("data.zip"),
        zip_bytes(&[
            ("inner/more.zip", inner),
            ("t.tsv", b"a\tb\n1\t2\n".to_vec()),
            ("clip.mp4", b"....".to_vec()),
            ("bad.xyz", BINARY.to_vec()),
        ]),
    )
    .unwrap();
    fs::write(raw.join("broken.zip"), b"PK\x03\x04 not really").unwrap();
    fs::write(raw.join("movie.mp4"), b"....").unwrap();
    fs::write(raw.join("fig.png"), b"\x89PNG\r\n\x1a\n").unwrap();
    fs::write(raw.join("model.pdb"), BINARY).unwrap();
    fs::write(
        raw.join("videos.zip"),
        zip_bytes(&[("a.mov", b"x".to_vec())]),
    )
    .unwrap();

    let raw2 = article(&set, "PMC2");
    fs::write(raw2.join("huge.pdf"), b"%PDF-1.4\n").unwrap();

    fs::write(
        set.join("download_log.tsv"),
        "PMC1_supplementary\tPMC1\thttps://example.org/PMC1/bin/data.zip\n",
    )
    .unwrap();
    (tmp, set)
}

fn stub_context() -> ExtractionContext {
    ExtractionContext::new(Box::new(NoOcr), 500)
        .with_pdf_factory(Box::new(|| Ok(Box::new(OversizedPdf) as Box<dyn PdfExtractor>)))
}

fn run(set: &Path) -> SetReport {
    pipeline::process_set_with(&Config::minimal(), set, stub_context(), &NoProgress).unwrap()
}

fn processed_files(set: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(set)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().components().any(|c| c.as_os_str() == "Processed"))
        .map(|e| {
            let rel = e.path().strip_prefix(set).unwrap().to_string_lossy().replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn every_input_is_accounted_for() {
    let (_tmp, set) = build_set();
    let report = run(&set);
    assert_eq!(
        report,
        SetReport {
            articles: 2,
            files: 14,
            succeeded: 6,
            skipped: 6,
            failed: 2,
        }
    );

    let outputs = processed_files(&set);
    let names: Vec<&str> = outputs.keys().map(|k| k.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "PMC1_supplementary/Processed/README_bioc.json",
            "PMC1_supplementary/Processed/data.zip/inner/more.zip/deep.txt_bioc.json",
            "PMC1_supplementary/Processed/data.zip/t.tsv_tables.json",
            "PMC1_supplementary/Processed/notes.txt_bioc.json",
            "PMC1_supplementary/Processed/report.docx_bioc.json",
            "PMC1_supplementary/Processed/table.csv_tables.json",
        ]
    );

    let ledger = Ledger::open(&set);
    let unprocessed = ledger.read(LedgerKind::Unprocessed).unwrap();
    let reasons: Vec<(String, String, String)> = unprocessed
        .iter()
        .map(|r| (r[2].clone(), r[3].clone(), r[4].clone()))
        .collect();
    assert!(reasons.contains(&(
        "broken.zip".into(),
        "".into(),
        "unreadable archive".into()
    )));
    assert!(reasons.contains(&(
        "data.zip".into(),
        "bad.xyz".into(),
        "unsupported file type".into()
    )));
    assert!(reasons.contains(&(
        "fig.png".into(),
        "".into(),
        "No OCR service configured".into()
    )));
    assert!(reasons.contains(&(
        "huge.pdf".into(),
        "".into(),
        "PDF file contains over 100 pages. This file was skipped.".into()
    )));
    assert_eq!(unprocessed.len(), 5);

    let excluded = ledger.read(LedgerKind::Excluded).unwrap();
    assert_eq!(
        excluded,
        vec![
            vec![
                "PMC1".to_string(),
                "https://example.org/PMC1/bin/data.zip".to_string(),
                "clip.mp4".to_string()
            ],
            vec!["PMC1".to_string(), "movie.mp4".to_string()],
            vec!["PMC1".to_string(), "videos.zip".to_string()],
        ]
    );

    let included = ledger.read(LedgerKind::Included).unwrap();
    let included: Vec<&str> = included.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(
        included,
        vec![
            "README",
            "https://example.org/PMC1/bin/data.zip",
            "notes.txt",
            "report.docx",
            "table.csv",
        ]
    );

    let identified = ledger.read(LedgerKind::IdentifiedTypes).unwrap();
    assert_eq!(identified.len(), 1);
    assert_eq!(identified[0][2], "README");
    assert_eq!(identified[0][3], "text/plain");
}

#[test]
fn rerun_rewrites_identical_outputs() {
    let (_tmp, set) = build_set();
    run(&set);
    let first = processed_files(&set);
    run(&set);
    let second = processed_files(&set);
    assert_eq!(first, second);
}

#[test]
fn outputs_pass_offset_validation() {
    let (_tmp, set) = build_set();
    let mut config = Config::minimal();
    config.pipeline.sentence_split = true;
    pipeline::process_set_with(&config, &set, stub_context(), &NoProgress).unwrap();
    for (rel, _) in processed_files(&set) {
        if !rel.ends_with("_bioc.json") {
            continue;
        }
        let collection = supp_harness::bioc::BiocCollection::load(&set.join(&rel)).unwrap();
        collection.validate_offsets().unwrap();
        assert!(collection.documents[0].passages[0].sentences.len() >= 1);
    }
}

#[test]
fn real_pdf_is_extracted() {
    let tmp = TempDir::new().unwrap();
    let set = tmp.path().join("set2");
    let raw = article(&set, "PMC3");
    fs::write(raw.join("S1.pdf"), minimal_pdf()).unwrap();

    let ctx = ExtractionContext::new(Box::new(NoOcr), 500);
    let report = pipeline::process_set_with(&Config::minimal(), &set, ctx, &NoProgress).unwrap();
    assert_eq!(report.succeeded, 1, "{:?}", report);
    let bioc = fs::read_to_string(set.join("PMC3_supplementary/Processed/S1.pdf_bioc.json")).unwrap();
    assert!(bioc.contains("supp test phrase"));
    assert!(bioc.contains("\"pages\": \"1\""));
}

#[test]
fn missing_set_dir_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let result = pipeline::process_set_with(
        &Config::minimal(),
        &tmp.path().join("nope"),
        stub_context(),
        &NoProgress,
    );
    assert!(result.is_err());
}
