use crate::pipeline::{
    FaceDetector, FaceEncoder, FaceRecognition, Frame, PipelineError, Recognizer, RecognizerConfig,
};
use crate::shared::SharedStore;
use crate::store::StoreError;
use crate::types::Detection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment request.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub label: String,
    /// The face that was enrolled.
    pub detection: Detection,
    /// Records held for this label after enrollment.
    pub records_for_label: usize,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Recognize {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<FaceRecognition>, EngineError>>,
    },
    Enroll {
        frame: Frame,
        label: String,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    store: Arc<SharedStore>,
}

impl EngineHandle {
    /// Detect, encode and identify every face in `frame`.
    pub async fn recognize(&self, frame: Frame) -> Result<Vec<FaceRecognition>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll the most confident face in `frame` under `label` and persist.
    pub async fn enroll(
        &self,
        frame: Frame,
        label: impl Into<String>,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frame,
                label: label.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Store the engine reads from and enrolls into.
    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the detector and encoder, so inference requests are
/// handled one at a time. Recognition matches against a store snapshot
/// taken per request; enrollment goes through the store's single writer.
/// The thread exits once every handle has been dropped.
pub fn spawn_engine<D, E>(
    detector: D,
    encoder: E,
    store: Arc<SharedStore>,
    config: RecognizerConfig,
) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
    E: FaceEncoder + Send + 'static,
{
    tracing::info!(
        records = store.len(),
        match_threshold = config.match_threshold,
        detection_confidence = config.detection_confidence,
        "starting recognition engine"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE_DEPTH);
    let engine_store = Arc::clone(&store);
    let mut recognizer = Recognizer::new(detector, encoder, config);

    std::thread::Builder::new()
        .name("facetag-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { frame, reply } => {
                        let snapshot = engine_store.snapshot();
                        let result = recognizer
                            .recognize(&frame, &snapshot)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { frame, label, reply } => {
                        let result = run_enroll(&mut recognizer, &engine_store, &frame, label);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, store })
}

fn run_enroll<D: FaceDetector, E: FaceEncoder>(
    recognizer: &mut Recognizer<D, E>,
    store: &SharedStore,
    frame: &Frame,
    label: String,
) -> Result<EnrollOutcome, EngineError> {
    let (detection, embedding) = recognizer.encode_best(frame)?;
    let label = label.trim().to_string();
    store.enroll(label.clone(), embedding)?;

    let records_for_label = store.count_by_label().get(&label).copied().unwrap_or(0);
    tracing::info!(
        label = %label,
        confidence = detection.confidence,
        records_for_label,
        "enrolled face"
    );

    Ok(EnrollOutcome {
        label,
        detection,
        records_for_label,
    })
}
