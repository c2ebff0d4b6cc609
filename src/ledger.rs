//! Append-only outcome ledgers, one TSV file per category per set.
//!
//! ```text
//! <set>/<set>_unprocessed.tsv       article-dir  article-id  file  member  reason
//! <set>/<set>_excluded.tsv          article-id   url         [member]
//! <set>/<set>_included.tsv          article-dir  article-id  url
//! <set>/<set>_identified_types.tsv  article-dir  article-id  file  mime  class
//! ```
//!
//! Every row is built in memory and written with a single `write_all` on a
//! file opened in append mode, under a lock shared by every handle opened on
//! the same set directory in this process, so concurrent writers never
//! interleave partial lines. Tabs and line breaks inside
//! fields are replaced with spaces.

use std::fs::OpenOptions;
use std::io::Write;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger parse error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    Unprocessed,
    Excluded,
    Included,
    IdentifiedTypes,
}

impl LedgerKind {
    pub const ALL: [LedgerKind; 4] = [
        LedgerKind::Unprocessed,
        LedgerKind::Excluded,
        LedgerKind::Included,
        LedgerKind::IdentifiedTypes,
    ];

    pub fn file_suffix(&self) -> &'static str {
        match self {
            LedgerKind::Unprocessed => "unprocessed",
            LedgerKind::Excluded => "excluded",
            LedgerKind::Included => "included",
            LedgerKind::IdentifiedTypes => "identified_types",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Unprocessed {
        article_dir: String,
        article_id: String,
        file_name: String,
        member: Option<String>,
        reason: String,
    },
    Excluded {
        article_id: String,
        source_url: String,
        member: Option<String>,
    },
    Included {
        article_dir: String,
        article_id: String,
        source_url: String,
    },
    IdentifiedType {
        article_dir: String,
        article_id: String,
        file_name: String,
        mime: String,
        class: String,
    },
}

impl LedgerEntry {
    pub fn kind(&self) -> LedgerKind {
        match self {
            LedgerEntry::Unprocessed { .. } => LedgerKind::Unprocessed,
            LedgerEntry::Excluded { .. } => LedgerKind::Excluded,
            LedgerEntry::Included { .. } => LedgerKind::Included,
            LedgerEntry::IdentifiedType { .. } => LedgerKind::IdentifiedTypes,
        }
    }

    fn fields(&self) -> Vec<&str> {
        match self {
            LedgerEntry::Unprocessed {
                article_dir,
                article_id,
                file_name,
                member,
                reason,
            } => vec![
                article_dir,
                article_id,
                file_name,
                member.as_deref().unwrap_or(""),
                reason,
            ],
            LedgerEntry::Excluded {
                article_id,
                source_url,
                member,
            } => {
                let mut f = vec![article_id.as_str(), source_url.as_str()];
                if let Some(m) = member {
                    f.push(m);
                }
                f
            }
            LedgerEntry::Included {
                article_dir,
                article_id,
                source_url,
            } => vec![article_dir, article_id, source_url],
            LedgerEntry::IdentifiedType {
                article_dir,
                article_id,
                file_name,
                mime,
                class,
            } => vec![article_dir, article_id, file_name, mime, class],
        }
    }

    /// One complete TSV line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = self
            .fields()
            .into_iter()
            .map(sanitize)
            .collect::<Vec<_>>()
            .join("\t");
        line.push('\n');
        line
    }
}

fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// Ledger files for one set directory.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    corpus: String,
    lock: Arc<Mutex<()>>,
}

/// One write lock per set directory.
fn lock_for(dir: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|p| p.into_inner());
    Arc::clone(locks.entry(key).or_default())
}

impl Ledger {
    /// Ledgers live in `set_dir` and are named after it.
    pub fn open(set_dir: &Path) -> Self {
        let corpus = set_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "set".to_string());
        Self {
            dir: set_dir.to_path_buf(),
            corpus,
            lock: lock_for(set_dir),
        }
    }

    pub fn path(&self, kind: LedgerKind) -> PathBuf {
        self.dir
            .join(format!("{}_{}.tsv", self.corpus, kind.file_suffix()))
    }

    pub fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let path = self.path(entry.kind());
        let line = entry.to_line();
        // a poisoned lock only means another writer panicked mid-call
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| LedgerError::Io { path, source })
    }

    /// All rows of one ledger; a missing file reads as empty.
    pub fn read(&self, kind: LedgerKind) -> Result<Vec<Vec<String>>, LedgerError> {
        read_rows(&self.path(kind))
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}
