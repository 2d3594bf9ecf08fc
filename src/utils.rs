use std::{path::Path, sync::LazyLock};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::config::{REVERT_KEYWORDS, REVISIONS_PREFIX};

// Source: https://github.com/mediawiki-utilities/python-mwtypes/blob/523a93f98fe1372938fc15872b5abb1f267cc643/mwtypes/timestamp.py#L12
const TIMESTAMP_FORMAT_LONG: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_FORMAT_SHORT: &str = "%Y%m%d%H%M%S";

/// Parses a dump timestamp, either `2004-01-01T12:00:00Z` or `20040101120000`.
///
/// Any other ISO-8601 form with an explicit offset is accepted as well; everything else is `None`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT_LONG)
        .or_else(|_| NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT_SHORT))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
        .ok()
}

static REVERT_KEYWORD_MATCHER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    let aho_corasick = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build(REVERT_KEYWORDS)
        .expect("revert keywords are valid patterns");
    tracing::debug!(
        "built aho-corasick successfully, kind: {:?}",
        aho_corasick.kind()
    );
    aho_corasick
});

/// Whether an edit comment names a revert (`rvv`, `Undid revision …`, `Reverted edits by …`).
pub fn has_revert_keyword(comment: Option<&str>) -> bool {
    comment.is_some_and(|comment| REVERT_KEYWORD_MATCHER.is_match(comment))
}

const SHARD_EXTENSIONS: &[&str] = &["gz", "bz2", "zst", "xml"];

/// Shard identifier used in artifact names: the trailing digit run of the file name once the
/// `.xml` and compression extensions are removed, or that whole stem if it ends in no digits.
///
/// `enwiki-20240601-stub-meta-history27.xml.gz` gives `27`.
pub fn shard_number(path: &Path) -> String {
    let mut stem = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    while let Some((rest, extension)) = stem.rsplit_once('.') {
        if !SHARD_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()) {
            break;
        }
        stem.truncate(rest.len());
    }

    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_start {
        Some(i) => stem[i..].to_string(),
        None => stem,
    }
}

pub fn revisions_file_name(shard: &Path) -> String {
    format!("{REVISIONS_PREFIX}{}.parquet", shard_number(shard))
}
