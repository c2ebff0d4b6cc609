//! # Supplementary Harness
//!
//! Turns the heterogeneous supplementary files of biomedical articles into
//! uniform BioC JSON documents and table files.
//!
//! Each article directory holds a `Raw/` tree of downloaded supplements
//! (Word, spreadsheets, images, PDFs, slides, nested archives). The pipeline
//! classifies every file, unpacks archives recursively, extracts text or
//! tables through pluggable adapters, assembles canonical output under
//! `Processed/`, and records every non-success in an append-only ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │   Raw/     │──▶│ Dispatcher │──▶│ Assembler  │──▶│ Processed/ │
//! │ files+zips │   │ classify + │   │ passages + │   │ _bioc.json │
//! └─────┬──────┘   │  extract   │   │  tables    │   │_tables.json│
//!       │          └─────┬──────┘   └─────┬──────┘   └────────────┘
//!       ▼                │                ▼
//! ┌────────────┐         │          ┌────────────┐
//! │  Archive   │─────────┘          │ Segmenter  │
//! │  Walker    │                    └────────────┘
//! └────────────┘          every outcome ──▶ Ledger (*.tsv)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! supp media ./sets/set1        # drop videos and media-only archives
//! supp process ./sets/set1      # extract everything under */Raw
//! supp stats ./sets/set1        # what came out, what did not
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classify`] | Extension table and content sniffing |
//! | [`archive`] | Recursive archive walker |
//! | [`extract`] | Extractor traits and built-in adapters |
//! | [`ocr`] | OCR service chain for images |
//! | [`bioc`] | BioC model and offset validation |
//! | [`assemble`] | Passages, tables, output files |
//! | [`segment`] | Sentence segmentation |
//! | [`ledger`] | Outcome ledgers |
//! | [`pipeline`] | Dispatcher and set driver |
//! | [`media`] | Media exclusion pass |
//! | [`stats`] | Set statistics |
//! | [`progress`] | Progress reporting |

pub mod archive;
pub mod assemble;
pub mod bioc;
pub mod classify;
pub mod config;
pub mod extract;
pub mod ledger;
pub mod media;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod progress;
pub mod segment;
pub mod stats;
