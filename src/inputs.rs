//! Loading of the two input tables: the title set that drives extraction and the category
//! table that labels detected events.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use compact_str::CompactString;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::config::{DEFAULT_LABEL, LABEL_COLUMN, TITLE_COLUMN};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("{what} not found: {}; {remediation}", path.display())]
    MissingResource {
        what: &'static str,
        path: PathBuf,
        remediation: &'static str,
    },
    #[error("{} has no `{column}` column", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

fn open_table(
    path: &Path,
    what: &'static str,
    remediation: &'static str,
    columns: &[&'static str],
) -> Result<csv::Reader<File>, InputError> {
    let file = File::open(path).map_err(|_| InputError::MissingResource {
        what,
        path: path.to_path_buf(),
        remediation,
    })?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers().map_err(|source| InputError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(column) = columns
        .iter()
        .copied()
        .find(|column| !headers.iter().any(|header| header == *column))
    {
        return Err(InputError::MissingColumn {
            path: path.to_path_buf(),
            column,
        });
    }

    Ok(reader)
}

#[derive(Deserialize)]
struct TitleRecord {
    wikipedia_title: String,
}

#[derive(Deserialize)]
struct CategoryRecord {
    wikipedia_title: String,
    #[serde(default)]
    party_group: Option<String>,
}

/// Exact-match set of the page titles to extract.
#[derive(Debug, Clone, Default)]
pub struct TitleSet {
    titles: FxHashSet<CompactString>,
}

impl TitleSet {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let mut reader = open_table(
            path,
            "title list",
            "run the title-fetch step first",
            &[TITLE_COLUMN],
        )?;

        let mut titles = FxHashSet::default();
        for record in reader.deserialize::<TitleRecord>() {
            let record = record.map_err(|source| InputError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            if !record.wikipedia_title.is_empty() {
                titles.insert(CompactString::from(record.wikipedia_title));
            }
        }

        tracing::info!(path = %path.display(), titles = titles.len(), "loaded title set");
        Ok(Self { titles })
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(title)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl<S: Into<CompactString>> FromIterator<S> for TitleSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            titles: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered-preference reducer for a title listed more than once: a specific label replaces the
/// default one, and is never replaced by another specific label.
pub fn merge_label(current: &mut CompactString, incoming: &str) {
    let incoming_is_specific = !incoming.is_empty() && incoming != DEFAULT_LABEL;
    if current.as_str() == DEFAULT_LABEL && incoming_is_specific {
        *current = CompactString::from(incoming);
    }
}

/// Category label per page title.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap {
    labels: FxHashMap<CompactString, CompactString>,
}

impl CategoryMap {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let mut reader = open_table(
            path,
            "category table",
            "run the category-fetch step first",
            &[TITLE_COLUMN, LABEL_COLUMN],
        )?;

        let mut map = Self::default();
        for record in reader.deserialize::<CategoryRecord>() {
            let record = record.map_err(|source| InputError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            map.insert(&record.wikipedia_title, record.party_group.as_deref().unwrap_or(""));
        }

        tracing::info!(path = %path.display(), titles = map.labels.len(), "loaded category table");
        Ok(map)
    }

    pub fn insert(&mut self, title: &str, label: &str) {
        if title.is_empty() {
            return;
        }
        let current = self
            .labels
            .entry(CompactString::from(title))
            .or_insert_with(|| CompactString::const_new(DEFAULT_LABEL));
        merge_label(current, label);
    }

    /// Label for `title`, `"Other"` when the table has none.
    pub fn label(&self, title: &str) -> &str {
        self.labels
            .get(title)
            .map_or(DEFAULT_LABEL, CompactString::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
