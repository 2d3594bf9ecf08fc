//! Arrow schemas for the two artifacts and a Parquet writer that only creates its
//! file once there is something to write.

use std::{
    fs::File,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use arrow_array::{
    builder::{BooleanBuilder, Float64Builder, Int64Builder, StringBuilder},
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use compact_str::CompactString;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    errors::ParquetError,
    file::properties::WriterProperties,
};

use crate::rows::{DetectionMethod, EventRow, EventType, RevisionRow};

#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("column `{column}` in {} is missing or has an unexpected type", path.display())]
    Column { path: PathBuf, column: &'static str },
    #[error("unexpected value {value:?} in column `{column}` of {}", path.display())]
    Value {
        path: PathBuf,
        column: &'static str,
        value: String,
    },
}

fn revision_fields() -> Vec<Field> {
    vec![
        Field::new("page_id", DataType::Int64, false),
        Field::new("page_title", DataType::Utf8, false),
        Field::new("is_redirect", DataType::Boolean, false),
        Field::new("redirect_target", DataType::Utf8, true),
        Field::new("revision_id", DataType::Int64, true),
        Field::new("parent_id", DataType::Int64, true),
        Field::new("timestamp", DataType::Utf8, true),
        Field::new("contributor_username", DataType::Utf8, true),
        Field::new("contributor_id", DataType::Int64, true),
        Field::new("contributor_ip", DataType::Utf8, true),
        Field::new("comment", DataType::Utf8, true),
        Field::new("is_minor", DataType::Boolean, false),
        Field::new("text_bytes", DataType::Int64, true),
        Field::new("text_sha1", DataType::Utf8, true),
    ]
}

pub static REVISION_SCHEMA: LazyLock<SchemaRef> =
    LazyLock::new(|| Arc::new(Schema::new(revision_fields())));

pub static EVENT_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let mut fields = revision_fields();
    fields.extend([
        Field::new("event_type", DataType::Utf8, false),
        Field::new("vandalism_group_id", DataType::Int64, false),
        Field::new("restored_to_revision_id", DataType::Int64, true),
        Field::new("restoration_time_seconds", DataType::Float64, true),
        Field::new("detection_method", DataType::Utf8, false),
        Field::new("party_group", DataType::Utf8, false),
    ]);
    Arc::new(Schema::new(fields))
});

/// A row type that has a fixed Arrow schema.
pub trait Columnar: Sized {
    fn schema() -> SchemaRef;
    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError>;
    fn from_record_batch(batch: &RecordBatch, path: &Path) -> Result<Vec<Self>, ColumnarError>;
}

#[derive(Default)]
struct RevisionColumns {
    page_id: Int64Builder,
    page_title: StringBuilder,
    is_redirect: BooleanBuilder,
    redirect_target: StringBuilder,
    revision_id: Int64Builder,
    parent_id: Int64Builder,
    timestamp: StringBuilder,
    contributor_username: StringBuilder,
    contributor_id: Int64Builder,
    contributor_ip: StringBuilder,
    comment: StringBuilder,
    is_minor: BooleanBuilder,
    text_bytes: Int64Builder,
    text_sha1: StringBuilder,
}

impl RevisionColumns {
    fn append(&mut self, row: &RevisionRow) {
        self.page_id.append_value(row.page_id);
        self.page_title.append_value(&row.page_title);
        self.is_redirect.append_value(row.is_redirect);
        self.redirect_target.append_option(row.redirect_target.as_deref());
        self.revision_id.append_option(row.revision_id);
        self.parent_id.append_option(row.parent_id);
        self.timestamp.append_option(row.timestamp.as_deref());
        self.contributor_username
            .append_option(row.contributor_username.as_deref());
        self.contributor_id.append_option(row.contributor_id);
        self.contributor_ip.append_option(row.contributor_ip.as_deref());
        self.comment.append_option(row.comment.as_deref());
        self.is_minor.append_value(row.is_minor);
        self.text_bytes.append_option(row.text_bytes);
        self.text_sha1.append_option(row.text_sha1.as_deref());
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.page_id.finish()),
            Arc::new(self.page_title.finish()),
            Arc::new(self.is_redirect.finish()),
            Arc::new(self.redirect_target.finish()),
            Arc::new(self.revision_id.finish()),
            Arc::new(self.parent_id.finish()),
            Arc::new(self.timestamp.finish()),
            Arc::new(self.contributor_username.finish()),
            Arc::new(self.contributor_id.finish()),
            Arc::new(self.contributor_ip.finish()),
            Arc::new(self.comment.finish()),
            Arc::new(self.is_minor.finish()),
            Arc::new(self.text_bytes.finish()),
            Arc::new(self.text_sha1.finish()),
        ]
    }
}

fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &'static str,
    path: &Path,
) -> Result<&'a A, ColumnarError> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<A>())
        .ok_or_else(|| ColumnarError::Column {
            path: path.to_path_buf(),
            column: name,
        })
}

fn opt_i64(array: &Int64Array, i: usize) -> Option<i64> {
    array.is_valid(i).then(|| array.value(i))
}

fn opt_str(array: &StringArray, i: usize) -> Option<CompactString> {
    array.is_valid(i).then(|| CompactString::from(array.value(i)))
}

// columns of the revision part, shared by both artifacts
struct RevisionColumnRefs<'a> {
    page_id: &'a Int64Array,
    page_title: &'a StringArray,
    is_redirect: &'a BooleanArray,
    redirect_target: &'a StringArray,
    revision_id: &'a Int64Array,
    parent_id: &'a Int64Array,
    timestamp: &'a StringArray,
    contributor_username: &'a StringArray,
    contributor_id: &'a Int64Array,
    contributor_ip: &'a StringArray,
    comment: &'a StringArray,
    is_minor: &'a BooleanArray,
    text_bytes: &'a Int64Array,
    text_sha1: &'a StringArray,
}

impl<'a> RevisionColumnRefs<'a> {
    fn new(batch: &'a RecordBatch, path: &Path) -> Result<Self, ColumnarError> {
        Ok(Self {
            page_id: column(batch, "page_id", path)?,
            page_title: column(batch, "page_title", path)?,
            is_redirect: column(batch, "is_redirect", path)?,
            redirect_target: column(batch, "redirect_target", path)?,
            revision_id: column(batch, "revision_id", path)?,
            parent_id: column(batch, "parent_id", path)?,
            timestamp: column(batch, "timestamp", path)?,
            contributor_username: column(batch, "contributor_username", path)?,
            contributor_id: column(batch, "contributor_id", path)?,
            contributor_ip: column(batch, "contributor_ip", path)?,
            comment: column(batch, "comment", path)?,
            is_minor: column(batch, "is_minor", path)?,
            text_bytes: column(batch, "text_bytes", path)?,
            text_sha1: column(batch, "text_sha1", path)?,
        })
    }

    fn row(&self, i: usize) -> RevisionRow {
        RevisionRow {
            page_id: self.page_id.value(i),
            page_title: CompactString::from(self.page_title.value(i)),
            is_redirect: self.is_redirect.value(i),
            redirect_target: opt_str(self.redirect_target, i),
            revision_id: opt_i64(self.revision_id, i),
            parent_id: opt_i64(self.parent_id, i),
            timestamp: opt_str(self.timestamp, i),
            contributor_username: opt_str(self.contributor_username, i),
            contributor_id: opt_i64(self.contributor_id, i),
            contributor_ip: opt_str(self.contributor_ip, i),
            comment: opt_str(self.comment, i).map(String::from),
            is_minor: self.is_minor.value(i),
            text_bytes: opt_i64(self.text_bytes, i),
            text_sha1: opt_str(self.text_sha1, i),
        }
    }
}

impl Columnar for RevisionRow {
    fn schema() -> SchemaRef {
        REVISION_SCHEMA.clone()
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let mut columns = RevisionColumns::default();
        for row in rows {
            columns.append(row);
        }
        RecordBatch::try_new(Self::schema(), columns.finish())
    }

    fn from_record_batch(batch: &RecordBatch, path: &Path) -> Result<Vec<Self>, ColumnarError> {
        let columns = RevisionColumnRefs::new(batch, path)?;
        Ok((0..batch.num_rows()).map(|i| columns.row(i)).collect())
    }
}

impl Columnar for EventRow {
    fn schema() -> SchemaRef {
        EVENT_SCHEMA.clone()
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let mut columns = RevisionColumns::default();
        let mut event_type = StringBuilder::new();
        let mut vandalism_group_id = Int64Builder::new();
        let mut restored_to_revision_id = Int64Builder::new();
        let mut restoration_time_seconds = Float64Builder::new();
        let mut detection_method = StringBuilder::new();
        let mut party_group = StringBuilder::new();

        for row in rows {
            columns.append(&row.revision);
            event_type.append_value(row.event_type.as_str());
            vandalism_group_id.append_value(row.vandalism_group_id);
            restored_to_revision_id.append_option(row.restored_to_revision_id);
            restoration_time_seconds.append_option(row.restoration_time_seconds);
            detection_method.append_value(row.detection_method.as_str());
            party_group.append_value(&row.party_group);
        }

        let mut arrays = columns.finish();
        arrays.extend([
            Arc::new(event_type.finish()) as ArrayRef,
            Arc::new(vandalism_group_id.finish()),
            Arc::new(restored_to_revision_id.finish()),
            Arc::new(restoration_time_seconds.finish()),
            Arc::new(detection_method.finish()),
            Arc::new(party_group.finish()),
        ]);
        RecordBatch::try_new(Self::schema(), arrays)
    }

    fn from_record_batch(batch: &RecordBatch, path: &Path) -> Result<Vec<Self>, ColumnarError> {
        let columns = RevisionColumnRefs::new(batch, path)?;
        let event_type: &StringArray = column(batch, "event_type", path)?;
        let vandalism_group_id: &Int64Array = column(batch, "vandalism_group_id", path)?;
        let restored_to: &Int64Array = column(batch, "restored_to_revision_id", path)?;
        let restoration_time: &Float64Array = column(batch, "restoration_time_seconds", path)?;
        let detection_method: &StringArray = column(batch, "detection_method", path)?;
        let party_group: &StringArray = column(batch, "party_group", path)?;

        let bad_value = |column: &'static str, value: &str| ColumnarError::Value {
            path: path.to_path_buf(),
            column,
            value: value.to_string(),
        };

        (0..batch.num_rows())
            .map(|i| {
                Ok(EventRow {
                    revision: columns.row(i),
                    event_type: EventType::parse(event_type.value(i))
                        .ok_or_else(|| bad_value("event_type", event_type.value(i)))?,
                    vandalism_group_id: vandalism_group_id.value(i),
                    restored_to_revision_id: opt_i64(restored_to, i),
                    restoration_time_seconds: restoration_time
                        .is_valid(i)
                        .then(|| restoration_time.value(i)),
                    detection_method: DetectionMethod::parse(detection_method.value(i))
                        .ok_or_else(|| bad_value("detection_method", detection_method.value(i)))?,
                    party_group: CompactString::from(party_group.value(i)),
                })
            })
            .collect()
    }
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

/// Appends row batches to a Snappy-compressed Parquet file.
///
/// The file is created on the first non-empty batch, so a writer that never receives
/// rows leaves nothing behind.
pub struct BatchWriter<T: Columnar> {
    path: PathBuf,
    writer: Option<ArrowWriter<File>>,
    rows_written: usize,
    _rows: PhantomData<T>,
}

impl<T: Columnar> BatchWriter<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            rows_written: 0,
            _rows: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn write_rows(&mut self, rows: &[T]) -> Result<(), ColumnarError> {
        if rows.is_empty() {
            return Ok(());
        }

        let batch = T::to_record_batch(rows)?;

        if self.writer.is_none() {
            let file = File::create(&self.path).map_err(|source| ColumnarError::Io {
                path: self.path.clone(),
                source,
            })?;
            self.writer = Some(ArrowWriter::try_new(
                file,
                T::schema(),
                Some(writer_properties()),
            )?);
            tracing::debug!(path = %self.path.display(), "created parquet file");
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }

        self.rows_written += rows.len();
        Ok(())
    }

    /// Closes the file. Returns its path, or `None` if no rows were ever written.
    pub fn finish(self) -> Result<Option<PathBuf>, ColumnarError> {
        match self.writer {
            Some(writer) => {
                writer.close()?;
                Ok(Some(self.path))
            }
            None => Ok(None),
        }
    }
}

pub fn read_rows<T: Columnar>(path: &Path) -> Result<Vec<T>, ColumnarError> {
    let file = File::open(path).map_err(|source| ColumnarError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(T::from_record_batch(&batch?, path)?);
    }
    Ok(rows)
}
