//! Reading embeddings produced by an external encoder.
//!
//! An embedding file is JSON: either one vector (`[0.1, -0.2, ...]`) or the
//! encoder's list of per-face vectors (`[[...], [...]]`). `[]` means the
//! encoder found no face.

use anyhow::{Context, Result};
use facetag_core::{Embedding, EnrollmentRecord, SharedStore};
use std::path::{Path, PathBuf};

const EMBEDDING_EXTENSION: &str = "json";

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Single(Vec<f64>),
    PerFace(Vec<Vec<f64>>),
}

/// Read one embedding from `path`. `Ok(None)` when the file holds no face.
pub fn read_embedding(path: &Path) -> Result<Option<Embedding>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: EmbeddingFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a JSON embedding", path.display()))?;

    Ok(match parsed {
        EmbeddingFile::Single(values) if values.is_empty() => None,
        EmbeddingFile::Single(values) => Some(Embedding::new(values)),
        EmbeddingFile::PerFace(mut faces) => {
            if faces.len() > 1 {
                tracing::warn!(
                    path = %path.display(),
                    faces = faces.len(),
                    "multiple faces in embedding file; using the first"
                );
            }
            if faces.is_empty() {
                None
            } else {
                Some(Embedding::new(faces.swap_remove(0)))
            }
        }
    })
}

/// Records gathered from a directory tree, each with the file it came from,
/// plus the files that were skipped.
#[derive(Debug, Default)]
pub struct ImportBatch {
    pub records: Vec<(PathBuf, EnrollmentRecord)>,
    pub skipped: Vec<(PathBuf, String)>,
}

/// Collect `root/<person>/*.json` and enroll every usable file with a single
/// save. Unreadable files and records the store rejects end up in `skipped`.
pub fn import_directory(store: &SharedStore, root: &Path) -> Result<ImportBatch> {
    let ImportBatch { records, mut skipped } = collect_directory(root)?;
    let (paths, records): (Vec<_>, Vec<_>) = records.into_iter().unzip();

    let results = store
        .enroll_each(records.iter().cloned())
        .context("importing embeddings")?;

    let mut added = Vec::new();
    for ((path, record), result) in paths.into_iter().zip(records).zip(results) {
        match result {
            Ok(()) => added.push((path, record)),
            Err(err) => skipped.push((path, err.to_string())),
        }
    }
    skipped.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(ImportBatch {
        records: added,
        skipped,
    })
}

/// Collect embeddings from `root/<person>/*.json`. Each subdirectory name is
/// the label for the files inside it. Directories and files are visited in
/// name order.
pub fn collect_directory(root: &Path) -> Result<ImportBatch> {
    let mut batch = ImportBatch::default();

    for person_dir in sorted_entries(root)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(label) = person_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let label = label.to_string();
        tracing::info!(label = %label, "processing person directory");

        for file in sorted_entries(&person_dir)? {
            if !file.is_file() || !has_embedding_extension(&file) {
                continue;
            }
            match read_embedding(&file) {
                Ok(Some(embedding)) => {
                    let record = EnrollmentRecord::new(label.clone(), embedding);
                    batch.records.push((file, record));
                }
                Ok(None) => batch.skipped.push((file, "no face embedding".to_string())),
                Err(err) => batch.skipped.push((file, format!("{err:#}"))),
            }
        }
    }

    Ok(batch)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("listing {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}

fn has_embedding_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(EMBEDDING_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_read_single_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ann.json");
        write(&path, "[0.1, -0.2, 0.3]");
        let e = read_embedding(&path).unwrap().unwrap();
        assert_eq!(e.values, vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_read_per_face_list_uses_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.json");
        write(&path, "[[1.0, 2.0], [3.0, 4.0]]");
        let e = read_embedding(&path).unwrap().unwrap();
        assert_eq!(e.values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_read_empty_means_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.json");
        write(&path, "[]");
        assert!(read_embedding(&path).unwrap().is_none());
    }

    #[test]
    fn test_read_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        write(&path, "{\"not\": \"an embedding\"}");
        assert!(read_embedding(&path).is_err());
        assert!(read_embedding(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_collect_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("bob/1.json"), "[0.9, 0.9]");
        write(&root.join("ann/b.JSON"), "[0.2, 0.2]");
        write(&root.join("ann/a.json"), "[0.1, 0.1]");
        write(&root.join("ann/notes.txt"), "ignored");
        write(&root.join("ann/empty.json"), "[]");
        write(&root.join("ann/broken.json"), "nope");
        write(&root.join("stray.json"), "[5.0, 5.0]");

        let batch = collect_directory(root).unwrap();
        let got: Vec<(&str, Vec<f64>)> = batch
            .records
            .iter()
            .map(|(_, r)| (r.label.as_str(), r.embedding.values.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("ann", vec![0.1, 0.1]),
                ("ann", vec![0.2, 0.2]),
                ("bob", vec![0.9, 0.9]),
            ]
        );
        assert_eq!(batch.skipped.len(), 2);
    }

    #[test]
    fn test_import_skips_rejected_records_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("faces");
        write(&root.join("ann/1.json"), "[0.1, 0.2]");
        write(&root.join("ann/2.json"), "[0.1, 0.3]");
        write(&root.join("bob/1.json"), "[0.5, 0.5, 0.5]");
        write(&root.join("cat/1.json"), "[]");
        write(&root.join("dan/1.json"), "[0.9, 0.8]");

        let store = SharedStore::open(facetag_core::StoreFile::new(dir.path().join("db.json")));
        let batch = import_directory(&store, &root).unwrap();

        assert_eq!(batch.records.len(), 3);
        let skipped: Vec<PathBuf> = batch.skipped.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(skipped, vec![root.join("bob/1.json"), root.join("cat/1.json")]);
        assert!(batch.skipped[0].1.contains("dimensions"));

        assert_eq!(store.len(), 3);
        let on_disk = store.file().load().unwrap();
        assert_eq!(on_disk.count_by_label().get("ann"), Some(&2));
        assert_eq!(on_disk.count_by_label().get("dan"), Some(&1));
        assert_eq!(on_disk.count_by_label().get("bob"), None);
    }

    #[test]
    fn test_import_checks_existing_store_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("faces");
        write(&root.join("ann/1.json"), "[0.1, 0.2, 0.3]");
        write(&root.join("bob/1.json"), "[0.4, 0.5]");

        let store = SharedStore::open(facetag_core::StoreFile::new(dir.path().join("db.json")));
        store.enroll("Eve", Embedding::new(vec![1.0, 1.0])).unwrap();

        let batch = import_directory(&store, &root).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].1.label, "bob");
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_collect_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_directory(&dir.path().join("absent")).is_err());
    }
}
