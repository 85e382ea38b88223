//! Shared encoding store for concurrent recognition.
//!
//! Readers take an immutable [`Arc`] snapshot and match against it without
//! holding any lock. Writers are serialised: each mutation clones the current
//! snapshot, applies the change, persists it, and only then publishes the new
//! snapshot. A failed save therefore leaves both the file and the published
//! snapshot as they were.

use crate::matcher::{self, Identification};
use crate::store::{EncodingStore, StoreError, StoreFile};
use crate::types::{Embedding, EnrollmentRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub struct SharedStore {
    file: StoreFile,
    current: RwLock<Arc<EncodingStore>>,
    writer: Mutex<()>,
}

impl SharedStore {
    /// Open the store at `file`, falling back to an empty store when the
    /// file is corrupt or unreadable.
    pub fn open(file: StoreFile) -> Self {
        let store = file.load_or_empty();
        Self::with_store(file, store)
    }

    /// Wrap an already-loaded store.
    pub fn with_store(file: StoreFile, store: EncodingStore) -> Self {
        Self {
            file,
            current: RwLock::new(Arc::new(store)),
            writer: Mutex::new(()),
        }
    }

    pub fn file(&self) -> &StoreFile {
        &self.file
    }

    /// Current published store. Cheap; never blocks on a save in progress.
    pub fn snapshot(&self) -> Arc<EncodingStore> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn count_by_label(&self) -> BTreeMap<String, usize> {
        self.snapshot().count_by_label()
    }

    /// Identify `probe` against the current snapshot.
    pub fn identify(&self, probe: &Embedding, threshold: f64) -> Identification {
        matcher::identify(probe, &self.snapshot(), threshold)
    }

    /// Append one record and persist.
    pub fn enroll(&self, label: impl Into<String>, embedding: Embedding) -> Result<(), StoreError> {
        let label = label.into();
        self.mutate(|store| store.enroll(label, embedding))
    }

    /// Append several records and persist once. Either all are enrolled or
    /// none are.
    pub fn enroll_many(
        &self,
        records: impl IntoIterator<Item = EnrollmentRecord>,
    ) -> Result<usize, StoreError> {
        self.mutate(|store| {
            let mut added = 0;
            for record in records {
                store.enroll(record.label, record.embedding)?;
                added += 1;
            }
            Ok(added)
        })
    }

    /// Append every record that validates and persist once. Rejected
    /// records are skipped; the result holds one entry per input, in order.
    pub fn enroll_each(
        &self,
        records: impl IntoIterator<Item = EnrollmentRecord>,
    ) -> Result<Vec<Result<(), StoreError>>, StoreError> {
        let results = self.mutate(|store| {
            Ok(records
                .into_iter()
                .map(|record| store.enroll(record.label, record.embedding))
                .collect::<Vec<_>>())
        })?;
        let rejected = results.iter().filter(|r| r.is_err()).count();
        if rejected > 0 {
            tracing::warn!(rejected, "skipped invalid enrollment records");
        }
        Ok(results)
    }

    /// Remove every record and persist.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|store| {
            store.clear();
            Ok(())
        })?;
        tracing::info!(path = %self.file.path().display(), "encoding store cleared");
        Ok(())
    }

    /// Re-read the backing file and publish it. On error the current
    /// snapshot is kept.
    pub fn reload(&self) -> Result<(), StoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let store = self.file.load()?;
        self.publish(store);
        Ok(())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut EncodingStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = EncodingStore::clone(&self.snapshot());
        let out = f(&mut next)?;
        self.file.save(&next)?;
        self.publish(next);
        Ok(out)
    }

    fn publish(&self, store: EncodingStore) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(store);
    }
}
