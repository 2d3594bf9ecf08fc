//! Revert detection over the artifacts of an extraction run.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use compact_str::CompactString;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::{
    algorithm::{GroupIdAllocator, PageHistory, RevertGroup},
    columnar::{read_rows, BatchWriter, ColumnarError},
    config::{DetectConfig, ARTIFACT_MANIFEST_FILE_NAME, MIN_REVISIONS, REVISIONS_PREFIX},
    inputs::{CategoryMap, InputError},
    rows::{EventRow, EventType, RevisionRow},
};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    #[error(transparent)]
    Input(#[from] InputError),
}

/// The revision artifacts in `dir`, sorted by file name.
///
/// When `dir` holds the manifest of an extraction run, exactly the artifacts listed there are
/// used and any other `revisions_<N>.parquet` is ignored with a warning. Without a manifest
/// every `revisions_<N>.parquet` in `dir` is used.
pub fn find_revision_artifacts(dir: &Path) -> Result<Vec<PathBuf>, DetectError> {
    let missing = || InputError::MissingResource {
        what: "revision artifacts",
        path: dir.to_path_buf(),
        remediation: "run `extract` first",
    };
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DetectError::Io { path, source }
    };

    let entries = fs::read_dir(dir).map_err(|_| missing())?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_error(dir))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(REVISIONS_PREFIX) && name.ends_with(".parquet") {
            found.push(entry.path());
        }
    }

    let manifest = dir.join(ARTIFACT_MANIFEST_FILE_NAME);
    let mut artifacts = match fs::read_to_string(&manifest) {
        Ok(listed) => {
            let mut artifacts = Vec::new();
            for name in listed.lines().map(str::trim).filter(|name| !name.is_empty()) {
                let path = dir.join(name);
                if !path.is_file() {
                    return Err(InputError::MissingResource {
                        what: "listed revision artifact",
                        path,
                        remediation: "run `extract` again",
                    }
                    .into());
                }
                artifacts.push(path);
            }
            for path in found.iter().filter(|path| !artifacts.contains(*path)) {
                tracing::warn!(path = %path.display(), "ignoring artifact not written by the last extraction");
            }
            artifacts
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "no artifact manifest, using every revision artifact");
            found
        }
        Err(source) => return Err(io_error(&manifest)(source)),
    };

    if artifacts.is_empty() {
        return Err(missing().into());
    }
    artifacts.sort();
    Ok(artifacts)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupingStats {
    pub rows: usize,
    /// Titles whose rows were spread over more than one artifact. Their rows are still merged.
    pub multi_shard_titles: usize,
    /// Rows dropped because their page already had a row with the same revision id.
    pub duplicate_revisions_dropped: usize,
}

#[derive(Default)]
struct TitleRows {
    rows: Vec<RevisionRow>,
    revision_ids: FxHashSet<i64>,
    last_shard: Option<usize>,
    shards: usize,
}

/// Groups all rows of all artifacts by page title.
///
/// A page is expected to live in exactly one shard. Titles found in several are logged and
/// counted, and their rows are combined.
pub fn group_by_title(
    artifacts: &[PathBuf],
) -> Result<(BTreeMap<CompactString, Vec<RevisionRow>>, GroupingStats), DetectError> {
    let mut pages: BTreeMap<CompactString, TitleRows> = BTreeMap::new();
    let mut stats = GroupingStats::default();

    for (shard, path) in artifacts.iter().enumerate() {
        let rows: Vec<RevisionRow> = read_rows(path)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "loaded revision artifact");
        stats.rows += rows.len();

        for row in rows {
            let page = pages.entry(row.page_title.clone()).or_default();
            if page.last_shard != Some(shard) {
                page.last_shard = Some(shard);
                page.shards += 1;
            }
            if let Some(id) = row.revision_id {
                if !page.revision_ids.insert(id) {
                    stats.duplicate_revisions_dropped += 1;
                    tracing::debug!(title = row.page_title.as_str(), revision_id = id, "dropping duplicate revision");
                    continue;
                }
            }
            page.rows.push(row);
        }
    }

    for (title, page) in &pages {
        if page.shards > 1 {
            stats.multi_shard_titles += 1;
            tracing::warn!(title = title.as_str(), shards = page.shards, "page split across shards");
        }
    }
    if stats.duplicate_revisions_dropped > 0 {
        tracing::warn!(
            dropped = stats.duplicate_revisions_dropped,
            "dropped duplicate revision ids"
        );
    }

    let pages = pages
        .into_iter()
        .map(|(title, page)| (title, page.rows))
        .collect();
    Ok((pages, stats))
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DetectReport {
    pub pages_processed: usize,
    /// Pages with fewer than three revisions.
    pub pages_skipped: usize,
    pub pages_with_vandalism: usize,
    pub groups: usize,
    pub vandalism_rows: usize,
    pub restoration_rows: usize,
    pub negative_latency_rows: usize,
    pub multi_shard_titles: usize,
    pub duplicate_revisions_dropped: usize,
    /// Stopped early on request; events of the pages handled so far were written.
    pub interrupted: bool,
    /// `None` when no events were found.
    pub output: Option<PathBuf>,
}

impl DetectReport {
    fn count(&mut self, events: &[EventRow]) {
        for event in events {
            match event.event_type {
                EventType::Vandalism => self.vandalism_rows += 1,
                EventType::Restoration => self.restoration_rows += 1,
            }
            if event.restoration_time_seconds.is_some_and(|seconds| seconds < 0.0) {
                self.negative_latency_rows += 1;
            }
        }
    }
}

/// Classifies every page and streams the events into `writer`, in title order.
///
/// Pages are classified in parallel; group ids are reserved afterwards in title order, so the
/// output does not depend on the number of threads. Once `stop` is set no further page is
/// handled and the events found so far are flushed.
pub fn detect_pages(
    pages: BTreeMap<CompactString, Vec<RevisionRow>>,
    categories: &CategoryMap,
    allocator: &GroupIdAllocator,
    writer: &mut BatchWriter<EventRow>,
    batch_size: usize,
    stop: &AtomicBool,
    report: &mut DetectReport,
) -> Result<(), DetectError> {
    let pages: Vec<(CompactString, Vec<RevisionRow>)> = pages.into_iter().collect();
    let classified: Vec<Option<(CompactString, PageHistory, Vec<RevertGroup>)>> = pages
        .into_par_iter()
        .map(|(title, rows)| {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let history = PageHistory::new(rows);
            let groups = history.find_reverts();
            Some((title, history, groups))
        })
        .collect();

    let batch_size = batch_size.max(1);
    let mut batch: Vec<EventRow> = Vec::new();
    for page in classified {
        let Some((title, history, groups)) = page.filter(|_| !stop.load(Ordering::Relaxed)) else {
            report.interrupted = true;
            tracing::warn!(
                pages_processed = report.pages_processed,
                "interrupted, flushing partial results"
            );
            break;
        };

        report.pages_processed += 1;
        if history.len() < MIN_REVISIONS {
            report.pages_skipped += 1;
            continue;
        }
        if groups.is_empty() {
            continue;
        }

        let ids = allocator.reserve(groups.len());
        let events = history.events(&groups, ids, categories.label(&title));
        report.pages_with_vandalism += 1;
        report.groups += groups.len();
        report.count(&events);

        batch.extend(events);
        if batch.len() >= batch_size {
            writer.write_rows(&batch)?;
            batch.clear();
        }
    }
    writer.write_rows(&batch)?;

    Ok(())
}

/// Runs detection over the artifacts in `config.input_dir`.
///
/// Missing inputs are reported before anything is read.
pub fn run_detect(config: &DetectConfig, stop: &AtomicBool) -> Result<DetectReport, DetectError> {
    let categories = CategoryMap::load(&config.categories)?;
    run_detect_with_categories(config, &categories, stop)
}

/// [`run_detect`] with a category table loaded by the caller; `config.categories` is not read.
pub fn run_detect_with_categories(
    config: &DetectConfig,
    categories: &CategoryMap,
    stop: &AtomicBool,
) -> Result<DetectReport, DetectError> {
    let started = Instant::now();
    let artifacts = find_revision_artifacts(&config.input_dir)?;

    let (pages, grouping) = group_by_title(&artifacts)?;
    tracing::info!(
        artifacts = artifacts.len(),
        rows = grouping.rows,
        pages = pages.len(),
        "grouped revisions by page"
    );

    match fs::remove_file(&config.output) {
        Ok(()) => tracing::debug!(path = %config.output.display(), "removed previous events file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(DetectError::Io {
                path: config.output.clone(),
                source,
            })
        }
    }

    let mut report = DetectReport {
        multi_shard_titles: grouping.multi_shard_titles,
        duplicate_revisions_dropped: grouping.duplicate_revisions_dropped,
        ..DetectReport::default()
    };
    let allocator = GroupIdAllocator::new(0);
    let mut writer = BatchWriter::new(&config.output);
    detect_pages(
        pages,
        categories,
        &allocator,
        &mut writer,
        config.batch_size,
        stop,
        &mut report,
    )?;
    report.output = writer.finish()?;

    tracing::info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        pages_processed = report.pages_processed,
        pages_skipped = report.pages_skipped,
        pages_with_vandalism = report.pages_with_vandalism,
        groups = report.groups,
        vandalism_rows = report.vandalism_rows,
        restoration_rows = report.restoration_rows,
        negative_latency_rows = report.negative_latency_rows,
        interrupted = report.interrupted,
        output = ?report.output,
        "detection summary"
    );
    if report.negative_latency_rows > 0 {
        tracing::warn!(
            rows = report.negative_latency_rows,
            "restorations timestamped before the edits they revert"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;

    fn write_artifact(dir: &Path, name: &str, rows: &[RevisionRow]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = BatchWriter::new(&path);
        writer.write_rows(rows).unwrap();
        writer.finish().unwrap();
        path
    }

    fn write_categories(dir: &Path) -> PathBuf {
        let path = dir.join("parties.csv");
        fs::write(
            &path,
            "wikipedia_title,party_group\nJane Doe,Democrat\nJane Doe,Republican\n",
        )
        .unwrap();
        path
    }

    fn reverted_page(title: &str, first_id: i64) -> Vec<RevisionRow> {
        vec![
            revision_row(title, first_id, Some("A"), &timestamp_at(0), ""),
            revision_row(title, first_id + 1, Some("B"), &timestamp_at(60), ""),
            revision_row(title, first_id + 2, Some("A"), &timestamp_at(90), "rvv"),
        ]
    }

    #[test]
    fn missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_revision_artifacts(dir.path()).unwrap_err();
        assert!(err.to_string().contains("run `extract` first"));

        let err = find_revision_artifacts(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(
            err,
            DetectError::Input(InputError::MissingResource { .. })
        ));
    }

    #[test]
    fn missing_categories_fail_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));

        let config = DetectConfig::new(dir.path().to_path_buf(), dir.path().join("absent.csv"));
        let err = run_detect(&config, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(
            err,
            DetectError::Input(InputError::MissingResource { .. })
        ));
        assert!(!config.output.exists());
    }

    #[test]
    fn groups_split_pages_and_drops_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let jane = reverted_page("Jane Doe", 1);
        let first = write_artifact(dir.path(), "revisions_1.parquet", &jane[..2]);
        // revision 2 again, plus the rest of the page
        let second = write_artifact(dir.path(), "revisions_2.parquet", &jane[1..]);
        let third = write_artifact(dir.path(), "revisions_3.parquet", &reverted_page("John Roe", 10));

        let (pages, stats) = group_by_title(&[first, second, third]).unwrap();
        assert_eq!(stats.rows, 7);
        assert_eq!(stats.multi_shard_titles, 1);
        assert_eq!(stats.duplicate_revisions_dropped, 1);

        let titles: Vec<_> = pages.keys().map(|t| t.as_str()).collect();
        assert_eq!(titles, vec!["Jane Doe", "John Roe"]);
        assert_eq!(pages["Jane Doe"].len(), 3);
    }

    #[test]
    fn group_ids_follow_title_order() {
        let mut pages = BTreeMap::new();
        pages.insert(CompactString::from("Zed"), reverted_page("Zed", 100));
        pages.insert(CompactString::from("Alpha"), reverted_page("Alpha", 1));
        pages.insert(
            CompactString::from("Short"),
            reverted_page("Short", 50)[..2].to_vec(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        let mut writer = BatchWriter::new(&path);
        let mut report = DetectReport::default();
        detect_pages(
            pages,
            &CategoryMap::default(),
            &GroupIdAllocator::new(0),
            &mut writer,
            1,
            &AtomicBool::new(false),
            &mut report,
        )
        .unwrap();
        writer.finish().unwrap();

        assert!(!report.interrupted);
        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.pages_skipped, 1);
        assert_eq!(report.pages_with_vandalism, 2);
        assert_eq!(report.groups, 2);
        assert_eq!(report.vandalism_rows, 2);
        assert_eq!(report.restoration_rows, 2);

        let events: Vec<EventRow> = read_rows(&path).unwrap();
        let ids: Vec<_> = events
            .iter()
            .map(|e| (e.revision.page_title.as_str(), e.vandalism_group_id))
            .collect();
        assert_eq!(
            ids,
            vec![("Alpha", 0), ("Alpha", 0), ("Zed", 1), ("Zed", 1)]
        );
    }

    #[test]
    fn run_labels_events_and_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));
        write_artifact(dir.path(), "revisions_2.parquet", &reverted_page("John Roe", 10));
        let config = DetectConfig::new(dir.path().to_path_buf(), write_categories(dir.path()));

        let report = run_detect(&config, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.output.as_deref(), Some(config.output.as_path()));

        let events: Vec<EventRow> = read_rows(&config.output).unwrap();
        let labels: Vec<_> = events.iter().map(|e| e.party_group.as_str()).collect();
        assert_eq!(labels, vec!["Democrat", "Democrat", "Other", "Other"]);

        let again = run_detect(&config, &AtomicBool::new(false)).unwrap();
        assert_eq!(again, report);
        let events_again: Vec<EventRow> = read_rows(&config.output).unwrap();
        assert_eq!(events_again, events);
    }

    #[test]
    fn no_events_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let quiet = vec![
            revision_row("Jane Doe", 1, Some("A"), &timestamp_at(0), ""),
            revision_row("Jane Doe", 2, Some("B"), &timestamp_at(60), ""),
            revision_row("Jane Doe", 3, Some("C"), &timestamp_at(120), ""),
        ];
        write_artifact(dir.path(), "revisions_1.parquet", &quiet);
        let config = DetectConfig::new(dir.path().to_path_buf(), write_categories(dir.path()));

        let report = run_detect(&config, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.pages_processed, 1);
        assert_eq!(report.groups, 0);
        assert_eq!(report.output, None);
        assert!(!config.output.exists());
    }

    #[test]
    fn stop_flag_set_before_detection() {
        let mut pages = BTreeMap::new();
        pages.insert(CompactString::from("Alpha"), reverted_page("Alpha", 1));
        pages.insert(CompactString::from("Zed"), reverted_page("Zed", 100));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        let mut writer = BatchWriter::new(&path);
        let mut report = DetectReport::default();
        detect_pages(
            pages,
            &CategoryMap::default(),
            &GroupIdAllocator::new(0),
            &mut writer,
            10,
            &AtomicBool::new(true),
            &mut report,
        )
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.pages_processed, 0);
        assert_eq!(report.groups, 0);
        assert_eq!(writer.finish().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn interrupted_run_reports_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));
        let config = DetectConfig::new(dir.path().to_path_buf(), write_categories(dir.path()));

        let report = run_detect(&config, &AtomicBool::new(true)).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.pages_processed, 0);
        assert_eq!(report.output, None);
    }

    #[test]
    fn manifest_selects_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));
        // left over from an extraction over other shards
        write_artifact(dir.path(), "revisions_2.parquet", &reverted_page("Jane Doe", 1));
        write_artifact(dir.path(), "revisions_3.parquet", &reverted_page("John Roe", 10));
        fs::write(
            dir.path().join(ARTIFACT_MANIFEST_FILE_NAME),
            "revisions_3.parquet\nrevisions_1.parquet\n",
        )
        .unwrap();

        let artifacts = find_revision_artifacts(dir.path()).unwrap();
        assert_eq!(
            artifacts,
            vec![
                dir.path().join("revisions_1.parquet"),
                dir.path().join("revisions_3.parquet"),
            ]
        );

        let (_, stats) = group_by_title(&artifacts).unwrap();
        assert_eq!(stats.multi_shard_titles, 0);
        assert_eq!(stats.duplicate_revisions_dropped, 0);
    }

    #[test]
    fn manifest_entry_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));
        fs::write(
            dir.path().join(ARTIFACT_MANIFEST_FILE_NAME),
            "revisions_1.parquet\nrevisions_4.parquet\n",
        )
        .unwrap();

        let err = find_revision_artifacts(dir.path()).unwrap_err();
        assert!(err.to_string().contains("run `extract` again"));
    }

    #[test]
    fn empty_manifest_means_nothing_to_detect() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "revisions_1.parquet", &reverted_page("Jane Doe", 1));
        fs::write(dir.path().join(ARTIFACT_MANIFEST_FILE_NAME), "").unwrap();

        let err = find_revision_artifacts(dir.path()).unwrap_err();
        assert!(err.to_string().contains("run `extract` first"));
    }
}
