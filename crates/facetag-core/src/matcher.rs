//! Nearest-neighbour identification of a probe embedding against enrolled records.

use crate::store::EncodingStore;
use crate::types::{Embedding, EnrollmentRecord};

/// Maximum Euclidean distance accepted as a match. Typical calibration of
/// the upstream 128-d encoder.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Label reported for probes that match no enrolled record.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Result of identifying a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    /// Matched label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// `1 - distance` for a match, `0.0` otherwise. Not clamped: a ranking
    /// signal, not a probability.
    pub confidence: f64,
    /// Distance to the nearest comparable record, even when rejected.
    /// `None` when nothing could be compared.
    pub distance: Option<f64>,
    /// Index of the matched record (only set on a match).
    pub index: Option<usize>,
}

impl Identification {
    pub fn unknown(distance: Option<f64>) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            distance,
            index: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn identify(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        threshold: f64,
    ) -> Identification;
}

/// Euclidean arg-min matcher.
///
/// When several records are equally close the earliest one in insertion
/// order is returned. Callers must not rely on that: ties are unspecified.
/// Records whose dimensionality differs from the probe are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn identify(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        threshold: f64,
    ) -> Identification {
        let mut best: Option<(usize, f64)> = None;

        for (i, record) in gallery.iter().enumerate() {
            let Some(distance) = probe.euclidean_distance(&record.embedding) else {
                continue;
            };
            // NaN never compares less, so it can never become the best.
            let closer = match best {
                None => !distance.is_nan(),
                Some((_, d)) => distance < d,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance < threshold => Identification {
                label: gallery[idx].label.clone(),
                confidence: 1.0 - distance,
                distance: Some(distance),
                index: Some(idx),
            },
            Some((_, distance)) => Identification::unknown(Some(distance)),
            None => Identification::unknown(None),
        }
    }
}

/// Identify `probe` against every record in `store`.
pub fn identify(probe: &Embedding, store: &EncodingStore, threshold: f64) -> Identification {
    EuclideanMatcher.identify(probe, store.records(), threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn gallery() -> EncodingStore {
        let mut store = EncodingStore::new();
        store.enroll("Ann", emb(&[0.1, 0.2, 0.3])).unwrap();
        store.enroll("Ann", emb(&[0.15, 0.25, 0.3])).unwrap();
        store.enroll("Bob", emb(&[0.9, -0.4, 0.0])).unwrap();
        store
    }

    #[test]
    fn test_exact_probe_matches_with_full_confidence() {
        let store = gallery();
        let result = identify(&emb(&[0.1, 0.2, 0.3]), &store, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label, "Ann");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.distance, Some(0.0));
        assert_eq!(result.index, Some(0));
        assert!(result.is_match());
    }

    #[test]
    fn test_every_stored_embedding_identifies_itself() {
        let store = gallery();
        for (i, record) in store.iter().enumerate() {
            let result = identify(&record.embedding, &store, DEFAULT_MATCH_THRESHOLD);
            assert_eq!(result.label, record.label);
            assert_eq!(result.index, Some(i));
            assert_eq!(result.confidence, 1.0);
        }
    }

    #[test]
    fn test_empty_store_is_unknown() {
        let store = EncodingStore::new();
        let result = identify(&emb(&[0.1, 0.2, 0.3]), &store, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.distance, None);
        assert!(!result.is_match());
    }

    #[test]
    fn test_probe_beyond_threshold_is_unknown() {
        // Every stored vector sits exactly 0.65 from the probe.
        let mut store = EncodingStore::new();
        store.enroll("Ann", emb(&[0.65, 0.0, 0.0])).unwrap();
        store.enroll("Ann", emb(&[0.0, 0.65, 0.0])).unwrap();
        store.enroll("Bob", emb(&[0.0, 0.0, 0.65])).unwrap();

        let result = identify(&emb(&[0.0, 0.0, 0.0]), &store, 0.6);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert_eq!(result.confidence, 0.0);
        let d = result.distance.unwrap();
        assert!((d - 0.65).abs() < 1e-12, "nearest distance {d}");
    }

    #[test]
    fn test_distance_equal_to_threshold_is_rejected() {
        let mut store = EncodingStore::new();
        store.enroll("Ann", emb(&[0.5, 0.0])).unwrap();
        let result = identify(&emb(&[0.0, 0.0]), &store, 0.5);
        assert!(!result.is_match());
        assert_eq!(result.distance, Some(0.5));
    }

    #[test]
    fn test_nearest_record_wins() {
        let store = gallery();
        let result = identify(&emb(&[0.85, -0.35, 0.0]), &store, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label, "Bob");
        assert_eq!(result.index, Some(2));
        let d = result.distance.unwrap();
        assert_eq!(result.confidence, 1.0 - d);
    }

    #[test]
    fn test_confidence_is_not_clamped() {
        let mut store = EncodingStore::new();
        store.enroll("Far", emb(&[0.0, 0.0])).unwrap();
        let probe = emb(&[1.2, 0.0]);
        let result = identify(&probe, &store, 1.5);
        let d = probe.euclidean_distance(&store.records()[0].embedding).unwrap();
        assert_eq!(result.label, "Far");
        assert_eq!(result.confidence, 1.0 - d);
        assert!(result.confidence < 0.0);
    }

    #[test]
    fn test_tie_returns_first_in_insertion_order() {
        let mut store = EncodingStore::new();
        store.enroll("Left", emb(&[-0.1, 0.0])).unwrap();
        store.enroll("Right", emb(&[0.1, 0.0])).unwrap();
        let result = identify(&emb(&[0.0, 0.0]), &store, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label, "Left");
    }

    #[test]
    fn test_nan_probe_is_unknown() {
        let store = gallery();
        let result = identify(&emb(&[f64::NAN, 0.2, 0.3]), &store, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert_eq!(result.distance, None);
    }

    #[test]
    fn test_mismatched_dimensionality_is_skipped() {
        let records = vec![
            EnrollmentRecord::new("Short", emb(&[0.0, 0.0])),
            EnrollmentRecord::new("Full", emb(&[0.0, 0.0, 0.1])),
        ];
        let result = EuclideanMatcher.identify(&emb(&[0.0, 0.0, 0.0]), &records, 0.6);
        assert_eq!(result.label, "Full");
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let store = gallery();
        let probe = emb(&[0.1, 0.2, 0.5]);
        // Nearest is 0.2 away.
        assert!(identify(&probe, &store, 0.6).is_match());
        assert!(!identify(&probe, &store, 0.1).is_match());
    }
}
