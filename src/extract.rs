//! Stream extraction: scan dump shards for the wanted titles and write their revisions as
//! Parquet, one artifact per shard.

use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use compact_str::CompactString;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::{
    columnar::{BatchWriter, ColumnarError},
    config::{
        ExtractConfig, ARTIFACT_MANIFEST_FILE_NAME, MATCHED_TITLES_FILE_NAME, PROGRESS_INTERVAL,
    },
    dump_parser::{DumpParser, ParsingError, ScannedPage},
    inputs::{InputError, TitleSet},
    rows::RevisionRow,
    utils::revisions_file_name,
};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed dump {}: {source}", path.display())]
    Parsing {
        path: PathBuf,
        #[source]
        source: ParsingError,
    },
    #[error("shards {} and {} would both write {name}", first.display(), second.display())]
    ShardNameCollision {
        first: PathBuf,
        second: PathBuf,
        name: String,
    },
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    #[error(transparent)]
    Input(#[from] InputError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
            .as_deref()
        {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            Some("zst") => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

/// Opens a shard for streaming, decompressing by file extension.
pub fn open_shard(path: &Path) -> Result<Box<dyn BufRead + Send>, ExtractError> {
    let io_error = |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let reader = BufReader::new(file);
    let reader: Box<dyn BufRead + Send> = match Compression::from_path(path) {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(BufReader::new(flate2::bufread::MultiGzDecoder::new(reader))),
        Compression::Bzip2 => Box::new(BufReader::new(bzip2::bufread::MultiBzDecoder::new(reader))),
        Compression::Zstd => Box::new(BufReader::new(
            zstd::stream::Decoder::with_buffer(reader).map_err(io_error)?,
        )),
    };
    Ok(reader)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Completed,
    /// Stopped early on request; everything read so far was written.
    Interrupted,
    /// Stopped by an XML or I/O error; everything read before it was written.
    Failed,
}

#[derive(Debug)]
pub struct ShardReport {
    pub shard: PathBuf,
    pub status: ShardStatus,
    pub error: Option<String>,
    pub pages_scanned: u64,
    pub pages_matched: u64,
    pub revisions_written: u64,
    /// Malformed or missing fields that were replaced by a default.
    pub anomalies: usize,
    /// `None` when the shard contained no wanted page.
    pub output: Option<PathBuf>,
    pub matched_titles: FxHashSet<CompactString>,
    pub elapsed: Duration,
}

impl ShardReport {
    fn new(shard: &Path) -> Self {
        Self {
            shard: shard.to_path_buf(),
            status: ShardStatus::Completed,
            error: None,
            pages_scanned: 0,
            pages_matched: 0,
            revisions_written: 0,
            anomalies: 0,
            output: None,
            matched_titles: FxHashSet::default(),
            elapsed: Duration::ZERO,
        }
    }
}

struct ShardJob<'a> {
    shard: &'a Path,
    titles: &'a TitleSet,
    output: PathBuf,
    batch_size: usize,
    stop: &'a AtomicBool,
}

impl ShardJob<'_> {
    fn scan<R: BufRead>(
        &self,
        reader: R,
        batch: &mut Vec<RevisionRow>,
        writer: &mut BatchWriter<RevisionRow>,
        report: &mut ShardReport,
    ) -> Result<(), ExtractError> {
        let parsing_error = |source| ExtractError::Parsing {
            path: self.shard.to_path_buf(),
            source,
        };

        let mut parser = DumpParser::new(reader).map_err(parsing_error)?;
        let site_info = parser.site_info();
        if !site_info.dbname.is_empty() {
            tracing::debug!(
                shard = %self.shard.display(),
                dbname = site_info.dbname.as_str(),
                namespaces = site_info.namespaces.len(),
                "read site info"
            );
        }

        let started = Instant::now();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                report.status = ShardStatus::Interrupted;
                tracing::warn!(shard = %self.shard.display(), "interrupted, flushing partial results");
                break;
            }

            let next = parser.next_page(|title| self.titles.contains(title));
            report.anomalies = parser.anomalies();
            let Some(scanned) = next.map_err(parsing_error)? else {
                break;
            };

            report.pages_scanned += 1;
            if let ScannedPage::Matched(mut page) = scanned {
                report.pages_matched += 1;
                report.matched_titles.insert(page.title.clone());

                for revision in std::mem::take(&mut page.revisions) {
                    batch.push(RevisionRow::flatten(&page, revision));
                    if batch.len() >= self.batch_size {
                        writer.write_rows(batch)?;
                        batch.clear();
                    }
                }
            }

            if report.pages_scanned % PROGRESS_INTERVAL == 0 {
                tracing::info!(
                    shard = %self.shard.display(),
                    elapsed_secs = started.elapsed().as_secs(),
                    pages_scanned = report.pages_scanned,
                    pages_matched = report.pages_matched,
                    revisions = writer.rows_written() + batch.len(),
                    "progress"
                );
            }
        }

        Ok(())
    }

    fn write(&self, report: &mut ShardReport) -> Result<(), ExtractError> {
        // a stale artifact from an earlier run would outlive a shard with no matches
        match fs::remove_file(&self.output) {
            Ok(()) => tracing::debug!(path = %self.output.display(), "removed previous artifact"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ExtractError::Io {
                    path: self.output.clone(),
                    source,
                })
            }
        }

        let reader = open_shard(self.shard)?;
        self.write_from(reader, report)
    }

    fn write_from<R: BufRead>(&self, reader: R, report: &mut ShardReport) -> Result<(), ExtractError> {
        let mut writer = BatchWriter::new(&self.output);
        let mut batch = Vec::with_capacity(self.batch_size.min(1 << 20));

        let scanned = self.scan(reader, &mut batch, &mut writer, report);

        // flush whatever was read, even when the scan stopped on an error
        let flushed = writer.write_rows(&batch);
        report.revisions_written = writer.rows_written() as u64;
        report.output = writer.finish()?;
        flushed?;
        scanned
    }
}

/// Extracts one shard into `<output_dir>/revisions_<N>.parquet`.
///
/// Never fails as a whole: errors end the shard early and are recorded in the report, after
/// the rows read so far have been written.
pub fn extract_shard(
    shard: &Path,
    titles: &TitleSet,
    output_dir: &Path,
    batch_size: usize,
    stop: &AtomicBool,
) -> ShardReport {
    let started = Instant::now();
    let job = ShardJob {
        shard,
        titles,
        output: output_dir.join(revisions_file_name(shard)),
        batch_size: batch_size.max(1),
        stop,
    };

    let mut report = ShardReport::new(shard);
    if let Err(err) = job.write(&mut report) {
        tracing::error!(shard = %shard.display(), error = %err, "shard stopped early");
        report.status = ShardStatus::Failed;
        report.error = Some(err.to_string());
    }
    report.elapsed = started.elapsed();

    tracing::info!(
        shard = %shard.display(),
        status = ?report.status,
        elapsed_secs = report.elapsed.as_secs_f64(),
        pages_scanned = report.pages_scanned,
        pages_matched = report.pages_matched,
        revisions_written = report.revisions_written,
        anomalies = report.anomalies,
        output = ?report.output,
        "shard done"
    );
    if report.output.is_none() {
        tracing::info!(shard = %shard.display(), "no matches found in this shard");
    }

    report
}

#[derive(Debug)]
pub struct ExtractReport {
    pub shards: Vec<ShardReport>,
    pub matched_titles: BTreeSet<CompactString>,
    pub matched_titles_path: PathBuf,
    /// Names the artifacts of this run, so detection ignores older ones in the same directory.
    pub manifest_path: PathBuf,
}

impl ExtractReport {
    pub fn interrupted(&self) -> bool {
        self.shards
            .iter()
            .any(|shard| shard.status == ShardStatus::Interrupted)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ShardReport> {
        self.shards
            .iter()
            .filter(|shard| shard.status == ShardStatus::Failed)
    }

    pub fn pages_scanned(&self) -> u64 {
        self.shards.iter().map(|shard| shard.pages_scanned).sum()
    }

    pub fn pages_matched(&self) -> u64 {
        self.shards.iter().map(|shard| shard.pages_matched).sum()
    }

    pub fn revisions_written(&self) -> u64 {
        self.shards.iter().map(|shard| shard.revisions_written).sum()
    }
}

fn check_shards(config: &ExtractConfig) -> Result<(), ExtractError> {
    let mut names: Vec<(String, &PathBuf)> = Vec::with_capacity(config.shards.len());
    for shard in &config.shards {
        if !shard.is_file() {
            return Err(InputError::MissingResource {
                what: "dump shard",
                path: shard.clone(),
                remediation: "check the shard paths",
            }
            .into());
        }

        let name = revisions_file_name(shard);
        if let Some((_, first)) = names.iter().find(|(other, _)| *other == name) {
            return Err(ExtractError::ShardNameCollision {
                first: first.to_path_buf(),
                second: shard.clone(),
                name,
            });
        }
        names.push((name, shard));
    }
    Ok(())
}

// one entry per line
fn write_lines<T: std::fmt::Display>(
    path: &Path,
    lines: impl IntoIterator<Item = T>,
) -> Result<(), ExtractError> {
    let io_error = |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    for line in lines {
        writeln!(out, "{line}").map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

/// Extracts all shards of `config` in parallel.
///
/// Missing inputs are reported before any shard is opened. Shard-level failures do not abort
/// the run; check [`ExtractReport::failed`].
pub fn run_extract(config: &ExtractConfig, stop: &AtomicBool) -> Result<ExtractReport, ExtractError> {
    let titles = TitleSet::load(&config.titles)?;
    check_shards(config)?;
    fs::create_dir_all(&config.output_dir).map_err(|source| ExtractError::Io {
        path: config.output_dir.clone(),
        source,
    })?;

    tracing::info!(
        shards = config.shards.len(),
        titles = titles.len(),
        output_dir = %config.output_dir.display(),
        "starting extraction"
    );

    let shards: Vec<ShardReport> = config
        .shards
        .par_iter()
        .map(|shard| extract_shard(shard, &titles, &config.output_dir, config.batch_size, stop))
        .collect();

    let matched_titles: BTreeSet<CompactString> = shards
        .iter()
        .flat_map(|shard| shard.matched_titles.iter().cloned())
        .collect();
    let matched_titles_path = config.output_dir.join(MATCHED_TITLES_FILE_NAME);
    write_lines(&matched_titles_path, &matched_titles)?;

    let artifacts: BTreeSet<String> = shards
        .iter()
        .filter_map(|shard| shard.output.as_deref()?.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    let manifest_path = config.output_dir.join(ARTIFACT_MANIFEST_FILE_NAME);
    write_lines(&manifest_path, &artifacts)?;

    let report = ExtractReport {
        shards,
        matched_titles,
        matched_titles_path,
        manifest_path,
    };
    tracing::info!(
        shards = report.shards.len(),
        failed = report.failed().count(),
        interrupted = report.interrupted(),
        pages_scanned = report.pages_scanned(),
        pages_matched = report.pages_matched(),
        revisions_written = report.revisions_written(),
        unique_titles = report.matched_titles.len(),
        "extraction summary"
    );

    Ok(report)
}
