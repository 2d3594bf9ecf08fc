// SPDX-License-Identifier: MPL-2.0
//! # wikirevert
//!
//! Streams Wikimedia history dumps for a fixed set of page titles and finds revert cycles
//! (vandalism followed by a restoration) by comparing revision content hashes.
//!
//! ## Overview
//!
//! The crate is a two-stage pipeline:
//!
//! 1. **Extraction** ([`extract`]): dump shards (`stub-meta-history` or `pages-meta-history`,
//!    plain or `.gz`/`.bz2`/`.zst`) are scanned with a pull parser. Pages whose title is not in
//!    the [`TitleSet`](inputs::TitleSet) are skipped without being materialized. Every revision
//!    of a wanted page becomes one flat [`RevisionRow`](rows::RevisionRow), written in batches
//!    to `revisions_<N>.parquet`. Revision text is never kept.
//! 2. **Detection** ([`detect`]): all rows are grouped by page title, each page's history is
//!    replayed in chronological order and every revision whose content hash equals an earlier,
//!    non-adjacent revision closes a *vandalism group*. The edits in between are tagged
//!    `vandalism`, the restoring edit `restoration`. Events are written to
//!    `vandalism_events.parquet`.
//!
//! ## Detection rules
//!
//! - A hash equal to the immediately preceding revision's is not a revert.
//! - If every hashed revision in between has the same hash as the restoring one, the span only
//!   changed metadata and is not a revert. Revisions without a hash never match and never break
//!   such a span.
//! - Restoration latency is the time from each vandalism edit to the restoring edit, in seconds.
//!   Negative values (clock skew in the source) are kept and counted.
//! - The detection method is `both` when the restoring edit's comment contains a revert keyword
//!   (`revert`, `rvv`, `rv/v`, `undid`, `rollback`, `vandal`), otherwise `sha1_revert`.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use wikirevert::config::{DetectConfig, ExtractConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extract = ExtractConfig::new(
//!         vec!["enwiki-20240601-stub-meta-history1.xml.gz".into()],
//!         "politician_titles.csv".into(),
//!         "output".into(),
//!     );
//!     let report = wikirevert::extract::run_extract(&extract, &AtomicBool::new(false))?;
//!     println!("{} revisions written", report.revisions_written());
//!
//!     let detect = DetectConfig::new("output".into(), "politician_parties.csv".into());
//!     let report = wikirevert::detect::run_detect(&detect, &AtomicBool::new(false))?;
//!     println!("{} vandalism groups", report.groups);
//!     Ok(())
//! }
//! ```
//!
//! ### Logging and Error Handling
//!
//! - Uses the `tracing` crate for progress, per-shard summaries and warnings.
//! - The parser recovers from malformed fields by storing a null and counting an anomaly.
//!   Enable the `strict` feature to stop a shard on the first malformed field instead.
//!
//! ```toml
//! [dependencies]
//! wikirevert = { version = "0.1.0", features = ["strict"] }
//! ```
//!
//! ## Limitations
//!
//! - **XML Format Compatibility**: Tested with Wikimedia dump XML format version 0.11.
//! - **Memory**: detection holds all extracted revision metadata in memory. Extraction itself
//!   runs in bounded memory per shard.
//!
//! ## Licensing
//!
//! This project is licensed under the Mozilla Public License 2.0.

pub mod algorithm;
pub mod columnar;
pub mod config;
pub mod detect;
pub mod dump_parser;
pub mod extract;
pub mod inputs;
pub mod rows;
#[cfg(test)]
mod test_support;
pub mod utils;
