//! BioC document model and JSON serialization.
//!
//! Collection → documents → passages → sentences. Offsets are counted in
//! Unicode scalar values, never bytes: within a document each passage starts
//! where the previous one ended, and within a passage the first sentence
//! starts at the passage offset.
//!
//! Collections are written with an empty `date` so that re-running the
//! pipeline over unchanged input produces byte-identical files.

use crate::segment::Segmenter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const COLLECTION_KEY: &str = "supp_harness.key";
pub const COLLECTION_SOURCE: &str = "supp-harness";

pub type Infons = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiocCollection {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub infons: Infons,
    #[serde(default)]
    pub documents: Vec<BiocDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiocDocument {
    pub id: String,
    #[serde(default)]
    pub infons: Infons,
    #[serde(default)]
    pub passages: Vec<BiocPassage>,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
    #[serde(default)]
    pub relations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiocPassage {
    pub offset: usize,
    #[serde(default)]
    pub infons: Infons,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sentences: Vec<BiocSentence>,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
    #[serde(default)]
    pub relations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiocSentence {
    pub offset: usize,
    #[serde(default)]
    pub infons: Infons,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
    #[serde(default)]
    pub relations: Vec<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum BiocError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid BioC JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document {document}: passage {index} has offset {found}, expected {expected}")]
    PassageOffset {
        document: String,
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("document {document}: passage {passage} sentence {index} has offset {found}, expected {expected}")]
    SentenceOffset {
        document: String,
        passage: usize,
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// Length in offset units.
pub fn text_len(text: &str) -> usize {
    text.chars().count()
}

impl BiocCollection {
    pub fn new() -> Self {
        Self {
            source: COLLECTION_SOURCE.to_string(),
            date: String::new(),
            key: COLLECTION_KEY.to_string(),
            infons: Infons::new(),
            documents: Vec::new(),
        }
    }

    pub fn with_document(mut self, document: BiocDocument) -> Self {
        self.documents.push(document);
        self
    }

    pub fn load(path: &Path) -> Result<Self, BiocError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json(&self) -> Result<String, BiocError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), BiocError> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the passage and sentence offset invariants of every document.
    pub fn validate_offsets(&self) -> Result<(), BiocError> {
        for doc in &self.documents {
            doc.validate_offsets()?;
        }
        Ok(())
    }

    /// Copy of this collection with every passage that has text segmented
    /// into sentences. Passages that already carry sentences are kept.
    pub fn with_sentences(&self, segmenter: &Segmenter) -> Self {
        let mut out = self.clone();
        for doc in out.documents.iter_mut() {
            for passage in doc.passages.iter_mut() {
                if !passage.sentences.is_empty() || passage.text.is_empty() {
                    continue;
                }
                passage.sentences = segmenter
                    .segment_at(&passage.text, passage.offset)
                    .into_iter()
                    .map(|s| BiocSentence {
                        offset: s.offset,
                        text: s.text,
                        ..Default::default()
                    })
                    .collect();
            }
        }
        out
    }
}

impl BiocDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Append a passage at the next offset in the document text stream.
    pub fn push_passage(&mut self, text: impl Into<String>, infons: Infons) {
        let offset = self.next_offset();
        self.passages.push(BiocPassage {
            offset,
            infons,
            text: text.into(),
            ..Default::default()
        });
    }

    /// Offset one past the end of the last passage.
    pub fn next_offset(&self) -> usize {
        self.passages
            .last()
            .map(|p| p.offset + p.content_len())
            .unwrap_or(0)
    }

    pub fn validate_offsets(&self) -> Result<(), BiocError> {
        let mut expected = 0usize;
        for (index, passage) in self.passages.iter().enumerate() {
            if passage.offset != expected {
                return Err(BiocError::PassageOffset {
                    document: self.id.clone(),
                    index,
                    expected,
                    found: passage.offset,
                });
            }
            let mut sentence_expected = passage.offset;
            for (s_index, sentence) in passage.sentences.iter().enumerate() {
                if sentence.offset != sentence_expected {
                    return Err(BiocError::SentenceOffset {
                        document: self.id.clone(),
                        passage: index,
                        index: s_index,
                        expected: sentence_expected,
                        found: sentence.offset,
                    });
                }
                sentence_expected += text_len(&sentence.text);
            }
            expected += passage.content_len();
        }
        Ok(())
    }
}

impl BiocPassage {
    /// Length of the passage text, or of its sentences when it has no text.
    pub fn content_len(&self) -> usize {
        if self.text.is_empty() {
            self.sentences.iter().map(|s| text_len(&s.text)).sum()
        } else {
            text_len(&self.text)
        }
    }
}

/// Segment every `*_bioc.json` under `input` (a file or a directory) and
/// write the results under `output`, mirroring relative paths. Returns the
/// number of collections written. The input tree is never modified.
pub fn split_tree(input: &Path, output: &Path, segmenter: &Segmenter) -> anyhow::Result<usize> {
    use anyhow::Context;

    if output == input {
        anyhow::bail!("output directory must differ from input: {}", input.display());
    }
    let files: Vec<(std::path::PathBuf, std::path::PathBuf)> = if input.is_file() {
        let name = input
            .file_name()
            .with_context(|| format!("not a file: {}", input.display()))?;
        vec![(input.to_path_buf(), std::path::PathBuf::from(name))]
    } else {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(input).sort_by_file_name() {
            let entry = entry?;
            let is_bioc = entry.file_type().is_file()
                && entry.file_name().to_string_lossy().ends_with("_bioc.json");
            if is_bioc {
                let rel = entry.path().strip_prefix(input)?.to_path_buf();
                files.push((entry.path().to_path_buf(), rel));
            }
        }
        files
    };

    for (path, rel) in &files {
        let collection = BiocCollection::load(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let split = collection.with_sentences(segmenter);
        split
            .validate_offsets()
            .with_context(|| format!("Offsets invalid after splitting {}", path.display()))?;
        let target = output.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        split.write(&target)?;
        tracing::debug!(file = %path.display(), "sentences written");
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::AbbreviationSet;

    fn doc(texts: &[&str]) -> BiocDocument {
        let mut d = BiocDocument::new("a.docx");
        for t in texts {
            d.push_passage(*t, Infons::new());
        }
        d
    }

    #[test]
    fn passage_offsets_accumulate() {
        let d = doc(&["abc", "de", "f"]);
        let offsets: Vec<usize> = d.passages.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 3, 5]);
        assert!(d.validate_offsets().is_ok());
    }

    #[test]
    fn offsets_count_chars_not_bytes() {
        let d = doc(&["αβγ", "x"]);
        assert_eq!(d.passages[1].offset, 3);
    }

    #[test]
    fn broken_offsets_detected() {
        let mut d = doc(&["abc", "de"]);
        d.passages[1].offset = 4;
        let err = d.validate_offsets().unwrap_err();
        assert!(matches!(
            err,
            BiocError::PassageOffset {
                expected: 3,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn sentences_start_at_passage_offset() {
        let c = BiocCollection::new().with_document(doc(&["Intro.", "One. Two."]));
        let seg = Segmenter::new(AbbreviationSet::default());
        let split = c.with_sentences(&seg);
        let p = &split.documents[0].passages[1];
        assert_eq!(p.offset, 6);
        assert_eq!(p.sentences.len(), 2);
        assert_eq!(p.sentences[0].offset, 6);
        assert_eq!(p.sentences[1].offset, 11);
        assert!(split.validate_offsets().is_ok());
    }

    #[test]
    fn json_has_empty_date_and_key() {
        let c = BiocCollection::new().with_document(doc(&["x"]));
        let json = c.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["date"], "");
        assert_eq!(v["key"], COLLECTION_KEY);
        assert_eq!(v["documents"][0]["passages"][0]["offset"], 0);
        let back: BiocCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
