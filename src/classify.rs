//! File classification: extension table first, content sniffing second.
//!
//! The extension table is authoritative. Magic-byte sniffing (via `infer`) is
//! consulted only when a file has no extension or one of the
//! [`AMBIGUOUS_EXTENSIONS`], and once more by the dispatcher when the
//! extension is unknown. A `.tsv` that sniffs as `text/plain` therefore stays
//! a spreadsheet.

use crate::models::FileClassification;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from the head of a file for sniffing.
const SNIFF_BYTES: usize = 8192;

/// Extensions that carry no type information.
pub const AMBIGUOUS_EXTENSIONS: &[&str] = &[".bin", ".dat", ".download", ".tmp"];

/// Lower-case extension (with the dot) to classification.
const EXTENSION_TABLE: &[(&str, FileClassification)] = &[
    (".doc", FileClassification::Word),
    (".docx", FileClassification::Word),
    (".txt", FileClassification::Word),
    (".odt", FileClassification::Word),
    (".rtf", FileClassification::Word),
    (".csv", FileClassification::Spreadsheet),
    (".tsv", FileClassification::Spreadsheet),
    (".xls", FileClassification::Spreadsheet),
    (".xlsx", FileClassification::Spreadsheet),
    (".jpg", FileClassification::Image),
    (".jpeg", FileClassification::Image),
    (".png", FileClassification::Image),
    (".tif", FileClassification::Image),
    (".tiff", FileClassification::Image),
    (".bmp", FileClassification::Image),
    (".pdf", FileClassification::Pdf),
    (".pptx", FileClassification::Presentation),
    (".ppt", FileClassification::Presentation),
    (".odp", FileClassification::Presentation),
    (".zip", FileClassification::Archive),
    (".tar", FileClassification::Archive),
    (".tgz", FileClassification::Archive),
    (".gz", FileClassification::Archive),
    (".gzip", FileClassification::Archive),
    (".bgz", FileClassification::Archive),
    (".7z", FileClassification::Archive),
    (".7-zip", FileClassification::Archive),
    (".rar", FileClassification::Archive),
    (".xz", FileClassification::Archive),
    (".zlib", FileClassification::Archive),
    (".pzip", FileClassification::Archive),
];

/// MIME type (as reported by sniffing) to classification.
const MIME_TABLE: &[(&str, FileClassification)] = &[
    ("text/plain", FileClassification::Word),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        FileClassification::Word,
    ),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.template",
        FileClassification::Word,
    ),
    ("application/msword", FileClassification::Word),
    ("application/vnd.oasis.opendocument.text", FileClassification::Word),
    ("application/rtf", FileClassification::Word),
    ("text/rtf", FileClassification::Word),
    ("application/pdf", FileClassification::Pdf),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        FileClassification::Spreadsheet,
    ),
    ("application/vnd.ms-excel", FileClassification::Spreadsheet),
    (
        "application/vnd.oasis.opendocument.spreadsheet",
        FileClassification::Spreadsheet,
    ),
    ("text/csv", FileClassification::Spreadsheet),
    ("text/tsv", FileClassification::Spreadsheet),
    ("text/tab-separated-values", FileClassification::Spreadsheet),
    ("image/png", FileClassification::Image),
    ("image/jpeg", FileClassification::Image),
    ("image/tiff", FileClassification::Image),
    ("image/bmp", FileClassification::Image),
    (
        "application/vnd.oasis.opendocument.presentation",
        FileClassification::Presentation,
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        FileClassification::Presentation,
    ),
    ("application/vnd.ms-powerpoint", FileClassification::Presentation),
    ("application/zip", FileClassification::Archive),
    ("application/gzip", FileClassification::Archive),
    ("application/x-tar", FileClassification::Archive),
    ("application/x-7z-compressed", FileClassification::Archive),
    ("application/vnd.rar", FileClassification::Archive),
    ("application/x-xz", FileClassification::Archive),
];

/// Result of classifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub class: FileClassification,
    /// MIME type reported by sniffing, when sniffing decided the class.
    pub sniffed_mime: Option<String>,
}

/// Lower-cased final extension including the dot, or `None`.
pub fn extension_of(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let idx = base.rfind('.')?;
    if idx == 0 && base.len() > 1 && !base[1..].contains('.') {
        // dotfile such as ".hidden"
        return None;
    }
    Some(base[idx..].to_lowercase())
}

/// Classification from the file name alone.
pub fn classify_name(name: &str) -> FileClassification {
    match extension_of(name) {
        Some(ext) => classify_extension(&ext),
        None => FileClassification::Unknown,
    }
}

/// Classification of a lower-case extension such as `.docx`.
pub fn classify_extension(ext: &str) -> FileClassification {
    EXTENSION_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, c)| *c)
        .unwrap_or(FileClassification::Unknown)
}

pub fn classify_mime(mime: &str) -> FileClassification {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    MIME_TABLE
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mime))
        .map(|(_, c)| *c)
        .unwrap_or(FileClassification::Unknown)
}

/// Classify a file on disk.
///
/// Sniffing runs only when the name has no extension or an ambiguous one.
pub fn classify(path: &Path) -> Classified {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(&name);
    let needs_sniff = match &ext {
        None => true,
        Some(e) => AMBIGUOUS_EXTENSIONS.contains(&e.as_str()),
    };
    if !needs_sniff {
        return Classified {
            class: classify_name(&name),
            sniffed_mime: None,
        };
    }
    reclassify_by_content(path)
}

/// [`classify`], then one content-based retry when the result is unknown.
pub fn classify_with_fallback(path: &Path) -> Classified {
    let first = classify(path);
    if first.class != FileClassification::Unknown || first.sniffed_mime.is_some() {
        return first;
    }
    reclassify_by_content(path)
}

/// Best-effort classification from file content.
pub fn reclassify_by_content(path: &Path) -> Classified {
    match sniff_mime(path) {
        Some(mime) => Classified {
            class: classify_mime(&mime),
            sniffed_mime: Some(mime),
        },
        None => Classified {
            class: FileClassification::Unknown,
            sniffed_mime: None,
        },
    }
}

/// MIME type from magic bytes, falling back to `text/plain` for UTF-8 text.
pub fn sniff_mime(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut buffer = vec![0u8; SNIFF_BYTES];
    let n = read_head(&mut file, &mut buffer).ok()?;
    if n == 0 {
        return None;
    }
    let head = &buffer[..n];
    if let Some(kind) = infer::get(head) {
        return Some(kind.mime_type().to_string());
    }
    if looks_like_text(head) {
        return Some("text/plain".to_string());
    }
    None
}

fn read_head(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte char may be cut at the buffer edge
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 >= head.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn extension_table_is_authoritative() {
        assert_eq!(classify_name("Table S1.TSV"), FileClassification::Spreadsheet);
        assert_eq!(classify_name("fig.JPEG"), FileClassification::Image);
        assert_eq!(classify_name("a.tar.gz"), FileClassification::Archive);
        assert_eq!(classify_name("slides.pptx"), FileClassification::Presentation);
        assert_eq!(classify_name("notes.txt"), FileClassification::Word);
        assert_eq!(classify_name("model.pdb"), FileClassification::Unknown);
        assert_eq!(classify_name("README"), FileClassification::Unknown);
    }

    #[test]
    fn extension_helper() {
        assert_eq!(extension_of("a/b/c.PDF").as_deref(), Some(".pdf"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("x.tar.gz").as_deref(), Some(".gz"));
    }

    #[test]
    fn tsv_sniffed_as_text_stays_spreadsheet() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.tsv");
        std::fs::write(&path, "a\tb\n1\t2\n").unwrap();
        assert_eq!(sniff_mime(&path).as_deref(), Some("text/plain"));
        let c = classify(&path);
        assert_eq!(c.class, FileClassification::Spreadsheet);
        assert!(c.sniffed_mime.is_none());
    }

    #[test]
    fn extensionless_pdf_is_sniffed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("download");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n").unwrap();
        let c = classify(&path);
        assert_eq!(c.class, FileClassification::Pdf);
        assert_eq!(c.sniffed_mime.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn ambiguous_extension_is_sniffed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("payload.bin");
        std::fs::write(&path, "plain words here\n").unwrap();
        assert_eq!(classify(&path).class, FileClassification::Word);
    }

    #[test]
    fn binary_garbage_is_unknown() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        std::fs::write(&path, [0u8, 1, 2, 3, 0, 255, 254]).unwrap();
        assert_eq!(classify(&path).class, FileClassification::Unknown);
    }

    #[test]
    fn mime_parameters_ignored() {
        assert_eq!(
            classify_mime("text/plain; charset=utf-8"),
            FileClassification::Word
        );
        assert_eq!(classify_mime("video/mp4"), FileClassification::Unknown);
    }
}
