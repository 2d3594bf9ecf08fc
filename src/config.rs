use std::path::PathBuf;

/// Revision rows buffered per shard before a Parquet batch is written
pub const EXTRACT_BATCH_SIZE: usize = 50_000;

/// Event rows buffered before a Parquet batch is written
pub const DETECT_BATCH_SIZE: usize = 100_000;

/// Pages with fewer revisions than this cannot contain a revert cycle
pub const MIN_REVISIONS: usize = 3;

/// Case-insensitive substrings in an edit comment that mark a manual revert
pub const REVERT_KEYWORDS: &[&str] = &["revert", "rvv", "rv/v", "undid", "rollback", "vandal"];

/// Category label for titles missing from the category table
pub const DEFAULT_LABEL: &str = "Other";

/// Column holding the page title in both input tables
pub const TITLE_COLUMN: &str = "wikipedia_title";

/// Column holding the category label in the category table
pub const LABEL_COLUMN: &str = "party_group";

/// Per-shard revision artifacts are named `<prefix><N>.parquet`
pub const REVISIONS_PREFIX: &str = "revisions_";

pub const EVENTS_FILE_NAME: &str = "vandalism_events.parquet";

pub const MATCHED_TITLES_FILE_NAME: &str = "matched_titles.txt";

/// Lists the revision artifacts written by the last extraction into a directory
pub const ARTIFACT_MANIFEST_FILE_NAME: &str = "extracted_artifacts.txt";

/// Pages between two progress log lines of a shard
pub const PROGRESS_INTERVAL: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Dump shards, plain `.xml` or `.gz`/`.bz2`/`.zst` compressed
    pub shards: Vec<PathBuf>,
    /// CSV with a `wikipedia_title` column
    pub titles: PathBuf,
    pub output_dir: PathBuf,
    pub batch_size: usize,
}

impl ExtractConfig {
    pub fn new(shards: Vec<PathBuf>, titles: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            shards,
            titles,
            output_dir,
            batch_size: EXTRACT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Directory holding the `revisions_<N>.parquet` artifacts of an extraction run
    pub input_dir: PathBuf,
    /// CSV with `wikipedia_title` and `party_group` columns
    pub categories: PathBuf,
    /// Events file, defaults to `vandalism_events.parquet` inside `input_dir`
    pub output: PathBuf,
    pub batch_size: usize,
}

impl DetectConfig {
    pub fn new(input_dir: PathBuf, categories: PathBuf) -> Self {
        let output = input_dir.join(EVENTS_FILE_NAME);
        Self {
            input_dir,
            categories,
            output,
            batch_size: DETECT_BATCH_SIZE,
        }
    }
}
