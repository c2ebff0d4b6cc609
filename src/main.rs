//! # Supplementary Harness CLI (`supp`)
//!
//! ## Usage
//!
//! ```bash
//! supp --config ./config/supp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `supp process <set-dir>` | Extract every article's `Raw/` files into `Processed/` |
//! | `supp media <set-dir>` | Delete videos and media-only archives, recording exclusions |
//! | `supp classify <files...>` | Print the classification of each file |
//! | `supp walk <archive>` | List the leaves of an archive, nested archives expanded |
//! | `supp split <input> --output <dir>` | Add sentences to existing BioC files |
//! | `supp stats <set-dir>` | Summarize outputs and ledgers of a set |
//!
//! ## Examples
//!
//! ```bash
//! # Typical run over one download set
//! supp media ./sets/set1
//! supp process ./sets/set1 --sentence-split --progress human
//!
//! # Inspect a suspicious archive before processing
//! supp walk ./sets/set1/PMC123_supplementary/Raw/data.zip
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use supp_harness::archive::{self, WalkLimits};
use supp_harness::config::{self, Config};
use supp_harness::ledger::Ledger;
use supp_harness::models::ArtifactPath;
use supp_harness::progress::ProgressMode;
use supp_harness::segment::Segmenter;
use supp_harness::{bioc, classify, media, pipeline, stats};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Supplementary Harness: classify, unpack, extract and normalize article
/// supplements to BioC.
#[derive(Parser)]
#[command(
    name = "supp",
    about = "Supplementary Harness: normalize article supplements to BioC documents and tables",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/supp.toml`; built-in defaults are used when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/supp.toml")]
    config: PathBuf,

    /// Debug logging for this crate (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every article directory of a set.
    ///
    /// Walks each `<ARTICLE>_supplementary/Raw`, extracts supported files
    /// (archives recursively) and mirrors outputs into `Processed/`.
    /// Re-running over unchanged input rewrites identical files.
    Process {
        set_dir: PathBuf,

        /// Split passages into sentences.
        #[arg(long)]
        sentence_split: bool,

        /// Progress on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Remove disallowed media from a set.
    Media { set_dir: PathBuf },

    /// Classify files the way the dispatcher would.
    Classify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the leaves of an archive.
    Walk { archive: PathBuf },

    /// Segment existing BioC files into sentences.
    ///
    /// The input is never edited in place.
    Split {
        /// A `_bioc.json` file or a directory searched recursively.
        input: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Print set statistics.
    Stats { set_dir: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "supp_harness=debug,supp=debug"
    } else {
        "supp_harness=info,supp=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Process {
            set_dir,
            sentence_split,
            progress,
        } => {
            if sentence_split {
                cfg.pipeline.sentence_split = true;
            }
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let report = pipeline::process_set(&cfg, &set_dir, reporter.as_ref())?;
            println!(
                "Processed {} articles: {} files, {} succeeded, {} skipped, {} failed.",
                report.articles, report.files, report.succeeded, report.skipped, report.failed
            );
        }
        Commands::Media { set_dir } => {
            let ledger = Ledger::open(&set_dir);
            let report = media::remove_media(&cfg, &set_dir, &ledger)?;
            println!(
                "Removed {} media files and {} media-only archives.",
                report.files_removed, report.archives_removed
            );
        }
        Commands::Classify { files } => {
            for file in files {
                let classified = classify::classify_with_fallback(&file);
                println!(
                    "{}\t{}\t{}",
                    classified.class,
                    classified.sniffed_mime.as_deref().unwrap_or("-"),
                    file.display()
                );
            }
        }
        Commands::Walk { archive: path } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let artifact = ArtifactPath::top_level(path.clone(), name);
            let items = archive::inventory(&artifact, &WalkLimits::from(&cfg.pipeline))?;
            for item in &items {
                println!("{}\t{}", item.class, item.member);
            }
            println!("{} members", items.len());
        }
        Commands::Split { input, output } => {
            let segmenter = Segmenter::from_config(&cfg.segmenter);
            let n = bioc::split_tree(&input, &output, &segmenter)?;
            println!("Wrote {} collections to {}", n, output.display());
        }
        Commands::Stats { set_dir } => {
            stats::run_stats(&cfg, &set_dir)?;
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}
