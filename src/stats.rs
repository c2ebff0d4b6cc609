//! Corpus statistics for one set.
//!
//! Summarizes what a run left behind: Raw inventory by extension (archive
//! members included), Processed outputs by source classification, and row
//! counts per ledger. Used by `supp stats` to check a run end to end.

use crate::archive::{self, WalkLimits};
use crate::assemble::{BIOC_SUFFIX, TABLES_SUFFIX};
use crate::bioc::BiocCollection;
use crate::classify;
use crate::config::Config;
use crate::ledger::{Ledger, LedgerKind};
use crate::models::{ArticleContext, ArtifactPath, FileClassification};
use crate::pipeline;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetStats {
    pub articles: usize,
    /// Raw files (and archive members) per lower-case extension.
    pub raw_by_extension: BTreeMap<String, usize>,
    /// Processed sources per classification.
    pub processed_by_class: BTreeMap<FileClassification, usize>,
    pub processed_bytes: u64,
    /// Ledger file suffix to row count.
    pub ledger_rows: BTreeMap<&'static str, usize>,
}

/// Walk a set directory and count what is there.
pub fn collect_stats(config: &Config, set_dir: &Path) -> Result<SetStats> {
    let limits = WalkLimits::from(&config.pipeline);
    let exclude = pipeline::build_globset(&config.pipeline.exclude_globs)?;
    let mut stats = SetStats::default();

    for article_dir in pipeline::discover_articles(set_dir)? {
        stats.articles += 1;
        let article = ArticleContext::from_dir(&article_dir);
        for (relative, path) in pipeline::scan_raw(&article.raw_dir, &exclude)? {
            count_extension(&mut stats.raw_by_extension, &relative);
            let artifact = ArtifactPath::top_level(path, relative);
            if classify::classify(&artifact.physical).class != FileClassification::Archive {
                continue;
            }
            // an unreadable archive still counts as itself
            if let Ok(items) = archive::inventory(&artifact, &limits) {
                for item in items {
                    count_extension(&mut stats.raw_by_extension, &item.member);
                }
            }
        }
        count_processed(&article.processed_dir, &mut stats)?;
    }

    let ledger = Ledger::open(set_dir);
    for kind in LedgerKind::ALL {
        stats
            .ledger_rows
            .insert(kind.file_suffix(), ledger.read(kind)?.len());
    }
    Ok(stats)
}

fn count_extension(counts: &mut BTreeMap<String, usize>, name: &str) {
    let ext = classify::extension_of(name).unwrap_or_else(|| NO_EXTENSION.to_string());
    *counts.entry(ext).or_insert(0) += 1;
}

/// One source may have a document file, a tables file, or both.
fn count_processed(processed_dir: &Path, stats: &mut SetStats) -> Result<()> {
    if !processed_dir.is_dir() {
        return Ok(());
    }
    let mut bases: BTreeSet<PathBuf> = BTreeSet::new();
    for entry in WalkDir::new(processed_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let stem = name
            .strip_suffix(BIOC_SUFFIX)
            .or_else(|| name.strip_suffix(TABLES_SUFFIX));
        if let Some(stem) = stem {
            stats.processed_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            bases.insert(entry.path().with_file_name(stem));
        }
    }
    for base in bases {
        let class = source_class(&base);
        *stats.processed_by_class.entry(class).or_insert(0) += 1;
    }
    Ok(())
}

fn source_class(base: &Path) -> FileClassification {
    let mut bioc = base.as_os_str().to_os_string();
    bioc.push(BIOC_SUFFIX);
    let recorded = BiocCollection::load(Path::new(&bioc)).ok().and_then(|c| {
        c.documents
            .first()
            .and_then(|d| d.infons.get("classification").cloned())
    });
    recorded
        .and_then(|name| {
            FileClassification::ALL
                .into_iter()
                .find(|c| c.as_str() == name)
        })
        .unwrap_or_else(|| {
            let name = base
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            classify::classify_name(&name)
        })
}

/// Collect and print the report on stdout.
pub fn run_stats(config: &Config, set_dir: &Path) -> Result<()> {
    let stats = collect_stats(config, set_dir)?;

    println!("Supplementary Harness: Set Stats");
    println!("=================================");
    println!();
    println!("  Set:         {}", set_dir.display());
    println!("  Articles:    {}", stats.articles);
    println!("  Output size: {}", format_bytes(stats.processed_bytes));

    println!();
    println!("  Processed by source type:");
    for class in FileClassification::ALL {
        if !class.is_extractable() {
            continue;
        }
        let n = stats.processed_by_class.get(&class).copied().unwrap_or(0);
        println!("  {:<16} {:>8}", class.as_str(), n);
    }

    println!();
    println!("  Ledgers:");
    for (kind, rows) in &stats.ledger_rows {
        println!("  {:<16} {:>8}", kind, rows);
    }

    if !stats.raw_by_extension.is_empty() {
        println!();
        println!("  Raw files by extension:");
        println!("  {:<16} {:>8}", "EXTENSION", "FILES");
        println!("  {}", "-".repeat(25));
        for (ext, n) in &stats.raw_by_extension {
            println!("  {:<16} {:>8}", ext, n);
        }
    }
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn counts_raw_processed_and_ledgers() {
        let tmp = TempDir::new().unwrap();
        let set = tmp.path().join("set1");
        let article = set.join("PMC1_supplementary");
        std::fs::create_dir_all(article.join("Raw")).unwrap();
        std::fs::create_dir_all(article.join("Processed")).unwrap();
        std::fs::write(article.join("Raw/a.csv"), "x,y\n1,2\n").unwrap();
        std::fs::write(article.join("Raw/b.CSV"), "x,y\n").unwrap();
        std::fs::write(article.join("Raw/README"), "hi").unwrap();
        std::fs::write(article.join("Processed/a.csv_tables.json"), "{}").unwrap();
        std::fs::write(article.join("Processed/n.txt_bioc.json"), "not json").unwrap();
        std::fs::write(
            set.join("set1_unprocessed.tsv"),
            "PMC1_supplementary\tPMC1\tREADME\t\tunsupported file type\n",
        )
        .unwrap();

        let stats = collect_stats(&Config::minimal(), &set).unwrap();
        assert_eq!(stats.articles, 1);
        assert_eq!(stats.raw_by_extension[".csv"], 2);
        assert_eq!(stats.raw_by_extension[NO_EXTENSION], 1);
        assert_eq!(stats.processed_by_class[&FileClassification::Spreadsheet], 1);
        assert_eq!(stats.processed_by_class[&FileClassification::Word], 1);
        assert_eq!(stats.ledger_rows["unprocessed"], 1);
        assert_eq!(stats.ledger_rows["included"], 0);
    }
}
