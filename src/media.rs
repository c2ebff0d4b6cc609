//! Disallowed media: detection and the exclusion pass.
//!
//! Videos carry nothing extractable and are large, so `supp media` deletes
//! them from `Raw/` before processing, together with archives that hold
//! media and nothing else. Each deletion is one Excluded row.

use crate::archive::{self, WalkLimits};
use crate::classify;
use crate::config::{Config, MediaConfig};
use crate::ledger::{Ledger, LedgerEntry};
use crate::models::{ArticleContext, ArtifactPath, FileClassification};
use crate::pipeline;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// True when the last path component has one of the configured video extensions.
pub fn is_media(name: &str, cfg: &MediaConfig) -> bool {
    let Some(ext) = classify::extension_of(name) else {
        return false;
    };
    cfg.video_extensions
        .iter()
        .any(|v| v.eq_ignore_ascii_case(&ext))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaReport {
    pub files_removed: usize,
    pub archives_removed: usize,
}

/// Delete media files and media-only archives from every article of a set.
pub fn remove_media(config: &Config, set_dir: &Path, ledger: &Ledger) -> Result<MediaReport> {
    let limits = WalkLimits::from(&config.pipeline);
    let exclude = pipeline::build_globset(&config.pipeline.exclude_globs)?;
    let mut urls = pipeline::load_download_log(set_dir)?;
    let mut report = MediaReport::default();

    for article_dir in pipeline::discover_articles(set_dir)? {
        let mut article = ArticleContext::from_dir(&article_dir);
        article.urls = urls.remove(&article.article_id).unwrap_or_default();

        for (relative, path) in pipeline::scan_raw(&article.raw_dir, &exclude)? {
            let artifact = ArtifactPath::top_level(path, relative);
            let removed = if is_media(artifact.file_name(), &config.media) {
                report.files_removed += 1;
                true
            } else if is_media_only_archive(&artifact, &limits, &config.media) {
                report.archives_removed += 1;
                true
            } else {
                false
            };
            if !removed {
                continue;
            }
            std::fs::remove_file(&artifact.physical)
                .with_context(|| format!("Failed to remove {}", artifact.physical.display()))?;
            debug!(file = %artifact, "removed media");
            ledger.record(&LedgerEntry::Excluded {
                article_id: article.article_id.clone(),
                source_url: article.source_url(&artifact),
                member: None,
            })?;
        }
    }

    info!(
        set = %set_dir.display(),
        files = report.files_removed,
        archives = report.archives_removed,
        "media pass finished"
    );
    Ok(report)
}

fn is_media_only_archive(artifact: &ArtifactPath, limits: &WalkLimits, media: &MediaConfig) -> bool {
    if classify::classify(&artifact.physical).class != FileClassification::Archive {
        return false;
    }
    match archive::inventory(artifact, limits) {
        Ok(items) => {
            items.iter().any(|i| is_media(&i.member, media))
                && !items
                    .iter()
                    .any(|i| i.class.is_extractable() && !is_media(&i.member, media))
        }
        Err(e) => {
            // left for the dispatcher to record as unreadable
            warn!(file = %artifact, error = %e, "could not inventory archive");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerKind;
    use std::io::Write;
    use tempfile::TempDir;

    fn zip_with(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn media_detection_is_case_insensitive() {
        let cfg = MediaConfig::default();
        assert!(is_media("clip.MP4", &cfg));
        assert!(is_media("a.zip/movies/x.mov", &cfg));
        assert!(!is_media("table.csv", &cfg));
        assert!(!is_media("mp4", &cfg));
    }

    #[test]
    fn removes_videos_and_media_only_archives() {
        let tmp = TempDir::new().unwrap();
        let set = tmp.path().join("set1");
        let raw = set.join("PMC7_supplementary").join("Raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("movie.avi"), b"RIFF").unwrap();
        std::fs::write(raw.join("notes.txt"), b"keep me").unwrap();
        zip_with(&raw.join("videos.zip"), &[("a.mp4", b"x"), ("b.mov", b"y")]);
        zip_with(&raw.join("mixed.zip"), &[("a.mp4", b"x"), ("t.csv", b"a,b\n")]);
        std::fs::write(
            set.join("download_log.tsv"),
            "PMC7_supplementary\tPMC7\thttps://host/PMC7/movie.avi\n",
        )
        .unwrap();

        let ledger = Ledger::open(&set);
        let config = Config::minimal();
        let report = remove_media(&config, &set, &ledger).unwrap();
        assert_eq!(
            report,
            MediaReport {
                files_removed: 1,
                archives_removed: 1
            }
        );
        assert!(!raw.join("movie.avi").exists());
        assert!(!raw.join("videos.zip").exists());
        assert!(raw.join("mixed.zip").exists());
        assert!(raw.join("notes.txt").exists());

        let rows = ledger.read(LedgerKind::Excluded).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["PMC7", "https://host/PMC7/movie.avi"],
                vec!["PMC7", "videos.zip"],
            ]
        );

        // nothing left to remove
        let again = remove_media(&config, &set, &ledger).unwrap();
        assert_eq!(again, MediaReport::default());
        assert_eq!(ledger.read(LedgerKind::Excluded).unwrap().len(), 2);
    }
}
