//! facetag-core — Face identification against a persistent encoding store.
//!
//! Face detection and embedding extraction are external; this crate stores
//! labelled embeddings, matches probes by Euclidean nearest neighbour, and
//! runs the detect → encode → match pipeline on a worker thread.

pub mod engine;
pub mod matcher;
pub mod pipeline;
pub mod shared;
pub mod store;
pub mod types;

pub use engine::{spawn_engine, EngineError, EngineHandle, EnrollOutcome};
pub use matcher::{
    identify, EuclideanMatcher, Identification, Matcher, DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL,
};
pub use pipeline::{
    Annotation, FaceDetector, FaceEncoder, FaceRecognition, Frame, Outcome, PipelineError,
    Recognizer, RecognizerConfig,
};
pub use shared::SharedStore;
pub use store::{EncodingStore, StoreError, StoreFile};
pub use types::{Detection, Embedding, EnrollmentRecord, Region};
