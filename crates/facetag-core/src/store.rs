//! Encoding store — the enrolled (label, embedding) records and their
//! on-disk form.
//!
//! The file holds two parallel sequences, `names` and `encodings`, read and
//! written wholesale. In memory they are zipped into one sequence of
//! [`EnrollmentRecord`]s so the two can never drift apart.

use crate::types::{Embedding, EnrollmentRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read store {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to write store {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("embedding has {actual} dimensions, store holds {expected}-dimensional embeddings")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Ordered collection of enrollment records, scanned linearly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingStore {
    records: Vec<EnrollmentRecord>,
}

impl EncodingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing records, validating each in order.
    pub fn from_records(
        records: impl IntoIterator<Item = EnrollmentRecord>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for record in records {
            store.enroll(record.label, record.embedding)?;
        }
        Ok(store)
    }

    /// Append one record. Duplicate labels are allowed: several records per
    /// person give that person several reference embeddings.
    ///
    /// Rejects a blank label, an empty or non-finite embedding, or an
    /// embedding whose dimensionality differs from the records already stored.
    pub fn enroll(&mut self, label: impl Into<String>, embedding: Embedding) -> Result<(), StoreError> {
        let label = label.into();
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::InvalidRecord("label is empty".into()));
        }
        if embedding.is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "embedding for '{label}' has no values"
            )));
        }
        if let Some(i) = embedding.values.iter().position(|v| !v.is_finite()) {
            return Err(StoreError::InvalidRecord(format!(
                "embedding for '{label}' has non-finite value at index {i}"
            )));
        }
        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
        }

        self.records.push(EnrollmentRecord::new(label, embedding));
        Ok(())
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[EnrollmentRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EnrollmentRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dimensionality shared by all records, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }

    /// Distinct labels, sorted.
    pub fn labels(&self) -> Vec<&str> {
        self.count_by_label_ref().into_keys().collect()
    }

    /// Number of records per label, sorted by label.
    pub fn count_by_label(&self) -> BTreeMap<String, usize> {
        self.count_by_label_ref()
            .into_iter()
            .map(|(label, n)| (label.to_string(), n))
            .collect()
    }

    fn count_by_label_ref(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.label.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a EncodingStore {
    type Item = &'a EnrollmentRecord;
    type IntoIter = std::slice::Iter<'a, EnrollmentRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// On-disk layout: two parallel sequences. Missing keys read as empty.
#[derive(Debug, Deserialize)]
struct PersistedStore {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    encodings: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct PersistedStoreRef<'a> {
    version: u32,
    names: Vec<&'a str>,
    encodings: Vec<&'a [f64]>,
}

fn default_version() -> u32 {
    STORE_FORMAT_VERSION
}

/// Location of a persisted [`EncodingStore`].
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole store.
    ///
    /// A missing file is the normal first-run state and yields an empty store.
    pub fn load(&self) -> Result<EncodingStore, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no store file yet; starting empty");
                return Ok(EncodingStore::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let store = self.decode(&bytes)?;
        tracing::info!(
            path = %self.path.display(),
            records = store.len(),
            labels = store.count_by_label_ref().len(),
            "loaded encoding store"
        );
        Ok(store)
    }

    /// Like [`load`](Self::load), but a corrupt or unreadable file is logged
    /// and replaced by an empty store.
    pub fn load_or_empty(&self) -> EncodingStore {
        match self.load() {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(error = %err, "could not load encoding store; continuing with an empty one");
                EncodingStore::new()
            }
        }
    }

    /// Write the whole store.
    ///
    /// Data goes to a sibling temp file first and is renamed over the target
    /// only after it has been synced, so a reader sees either the old file or
    /// the new one. On failure the previous file is left in place.
    pub fn save(&self, store: &EncodingStore) -> Result<(), StoreError> {
        let persisted = PersistedStoreRef {
            version: STORE_FORMAT_VERSION,
            names: store.iter().map(|r| r.label.as_str()).collect(),
            encodings: store.iter().map(|r| r.embedding.values.as_slice()).collect(),
        };
        let bytes = serde_json::to_vec(&persisted).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let temp_path = self.temp_path();
        if let Err(source) = self.write_atomically(&temp_path, &bytes) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }

        tracing::info!(path = %self.path.display(), records = store.len(), "saved encoding store");
        Ok(())
    }

    fn write_atomically(&self, temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(temp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(temp_path, &self.path)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", std::process::id()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<EncodingStore, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        };

        let persisted: PersistedStore =
            serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

        if persisted.version > STORE_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (newest known is {STORE_FORMAT_VERSION})",
                persisted.version
            )));
        }
        if persisted.names.len() != persisted.encodings.len() {
            return Err(corrupt(format!(
                "{} names but {} encodings",
                persisted.names.len(),
                persisted.encodings.len()
            )));
        }

        let records = persisted
            .names
            .into_iter()
            .zip(persisted.encodings)
            .map(|(name, values)| EnrollmentRecord::new(name, Embedding::new(values)));

        EncodingStore::from_records(records).map_err(|e| corrupt(e.to_string()))
    }
}
