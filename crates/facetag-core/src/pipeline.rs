//! Per-frame recognition: detector → crop → encoder → matcher.
//!
//! Detection and encoding are delegated to collaborators behind the
//! [`FaceDetector`] and [`FaceEncoder`] traits; this module owns the policy
//! that glues them to the encoding store.

use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL};
use crate::store::EncodingStore;
use crate::types::{Detection, Embedding, Region};
use thiserror::Error;

/// Minimum detector confidence for a box to be considered a face.
pub const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.5;

/// Error type returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("face detector failed: {0}")]
    Detection(#[source] BoxError),
    #[error("face encoder failed: {0}")]
    Encoding(#[source] BoxError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face detected but no embedding could be extracted")]
    NoEncoding,
}

/// An interleaved 8-bit image (`channels` bytes per pixel, row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, PipelineError> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(PipelineError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Copy out the part of the frame covered by `region`, clamped to the
    /// frame bounds. `None` when nothing of the region lies inside.
    pub fn crop(&self, region: &Region) -> Option<Frame> {
        let r = region.clamp_to(self.width, self.height);
        if r.is_empty() {
            return None;
        }

        let (x1, y1) = (r.x1 as usize, r.y1 as usize);
        let (w, h) = (r.width() as usize, r.height() as usize);
        let bpp = self.channels as usize;
        let stride = self.width as usize * bpp;

        let mut data = Vec::with_capacity(w * h * bpp);
        for y in y1..y1 + h {
            let start = y * stride + x1 * bpp;
            data.extend_from_slice(self.data.get(start..start + w * bpp)?);
        }

        Some(Frame {
            data,
            width: w as u32,
            height: h as u32,
            channels: self.channels,
        })
    }
}

/// Proposes face regions in a frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, BoxError>;
}

/// Turns a cropped face into an embedding.
///
/// `Ok(None)` means the crop held no embeddable face; that is a normal
/// outcome, not an error.
pub trait FaceEncoder {
    fn encode(&mut self, face: &Frame) -> Result<Option<Embedding>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerConfig {
    /// Maximum Euclidean distance accepted as a match.
    pub match_threshold: f64,
    /// Detections below this confidence are ignored.
    pub detection_confidence: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
        }
    }
}

/// How a detected face was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Identified {
        label: String,
        confidence: f64,
        distance: f64,
    },
    /// Compared against the store, but nothing was close enough.
    NoMatch { nearest_distance: Option<f64> },
    /// The encoder found nothing to embed, so no comparison was made.
    NoEncoding,
}

/// RGB colour used to outline recognised faces.
pub const KNOWN_COLOR: [u8; 3] = [0, 255, 0];
/// RGB colour used to outline unknown faces.
pub const UNKNOWN_COLOR: [u8; 3] = [255, 0, 0];

/// What a renderer needs to draw one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub region: Region,
    pub caption: String,
    pub color: [u8; 3],
}

/// One detected face and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecognition {
    pub region: Region,
    pub detection_confidence: f32,
    pub outcome: Outcome,
}

impl FaceRecognition {
    pub fn label(&self) -> &str {
        match &self.outcome {
            Outcome::Identified { label, .. } => label,
            _ => UNKNOWN_LABEL,
        }
    }

    /// Match confidence for an identified face, `0.0` for a rejected match.
    /// A face the encoder could not embed was never matched, so it reports
    /// the detector's confidence instead.
    pub fn confidence(&self) -> f64 {
        match &self.outcome {
            Outcome::Identified { confidence, .. } => *confidence,
            Outcome::NoMatch { .. } => 0.0,
            Outcome::NoEncoding => f64::from(self.detection_confidence),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.outcome, Outcome::Identified { .. })
    }

    /// `"Ann (0.87)"`, or `"unknown (0.93)"` with the detector's score when
    /// no embedding could be taken.
    pub fn caption(&self) -> String {
        format!("{} ({:.2})", self.label(), self.confidence())
    }

    pub fn annotation(&self) -> Annotation {
        Annotation {
            region: self.region,
            caption: self.caption(),
            color: if self.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR },
        }
    }
}

/// Runs detection, encoding and matching for whole frames.
pub struct Recognizer<D, E> {
    detector: D,
    encoder: E,
    config: RecognizerConfig,
}

impl<D: FaceDetector, E: FaceEncoder> Recognizer<D, E> {
    pub fn new(detector: D, encoder: E, config: RecognizerConfig) -> Self {
        Self {
            detector,
            encoder,
            config,
        }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// Classify every sufficiently confident face in `frame` against `store`.
    pub fn recognize(
        &mut self,
        frame: &Frame,
        store: &EncodingStore,
    ) -> Result<Vec<FaceRecognition>, PipelineError> {
        let detections = self.faces(frame)?;
        let mut results = Vec::with_capacity(detections.len());

        for det in detections {
            let region = det.region.clamp_to(frame.width, frame.height);
            let Some(crop) = frame.crop(&region) else {
                continue;
            };

            let outcome = match self.encoder.encode(&crop).map_err(PipelineError::Encoding)? {
                None => Outcome::NoEncoding,
                Some(probe) => {
                    let id = EuclideanMatcher.identify(
                        &probe,
                        store.records(),
                        self.config.match_threshold,
                    );
                    match (id.is_match(), id.distance) {
                        (true, Some(distance)) => Outcome::Identified {
                            label: id.label,
                            confidence: id.confidence,
                            distance,
                        },
                        (_, nearest_distance) => Outcome::NoMatch { nearest_distance },
                    }
                }
            };

            results.push(FaceRecognition {
                region,
                detection_confidence: det.confidence,
                outcome,
            });
        }

        tracing::debug!(
            faces = results.len(),
            known = results.iter().filter(|r| r.is_known()).count(),
            "frame recognised"
        );
        Ok(results)
    }

    /// Embed the most confident face in `frame`, for enrolment.
    pub fn encode_best(&mut self, frame: &Frame) -> Result<(Detection, Embedding), PipelineError> {
        let detections = self.faces(frame)?;
        if detections.len() > 1 {
            tracing::warn!(faces = detections.len(), "multiple faces detected; using the most confident");
        }

        for det in detections {
            let region = det.region.clamp_to(frame.width, frame.height);
            let Some(crop) = frame.crop(&region) else {
                continue;
            };
            return match self.encoder.encode(&crop).map_err(PipelineError::Encoding)? {
                Some(embedding) => Ok((Detection { region, ..det }, embedding)),
                None => Err(PipelineError::NoEncoding),
            };
        }

        Err(PipelineError::NoFaceDetected)
    }

    /// Detections at or above the confidence threshold, most confident first.
    fn faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, PipelineError> {
        let mut detections: Vec<Detection> = self
            .detector
            .detect(frame)
            .map_err(PipelineError::Detection)?
            .into_iter()
            .filter(|d| d.confidence >= self.config.detection_confidence)
            .collect();
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(detections)
    }
}
