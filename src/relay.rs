use crate::{
    detector::{DetectionRequest, Detector, DetectorError},
    envelope::{Envelope, ImageFormat},
    storage::{FrameArtifacts, FrameStore},
};
use std::{io, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Semaphore, time::timeout};
use tracing::instrument;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to store frame: {0}")]
    Storage(io::Error),
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Detector timed out after {0:?}")]
    Timeout(Duration),
    #[error("Detector result missing at {0}")]
    MissingResult(PathBuf),
    #[error("Failed to read detector result: {0}")]
    ResultRead(io::Error),
    #[error("Worker pool closed")]
    WorkersClosed,
}

/// One frame on its way to the detector.
#[derive(Debug)]
pub struct FrameJob {
    pub session_id: Uuid,
    pub seq: u64,
    pub frame: Envelope,
}

/// Turns a frame into an annotated frame through the detector.
///
/// Concurrency across all sessions is bounded by `max_concurrent` permits;
/// per-session exclusivity is the session's job.
pub struct RelayService {
    detector: Arc<dyn Detector>,
    store: FrameStore,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl RelayService {
    pub fn new(
        detector: Arc<dyn Detector>,
        store: FrameStore,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            detector,
            store,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Runs one round trip. Transient files are removed whatever the outcome.
    #[instrument(skip(self, job), fields(session_id = %job.session_id, seq = job.seq))]
    pub async fn process(&self, job: FrameJob) -> Result<Envelope, RelayError> {
        let artifacts = self
            .store
            .artifacts(&job.session_id, job.seq, job.frame.format());
        let result = self.run(&artifacts, job.frame).await;
        self.store.cleanup(&artifacts).await;
        result
    }

    async fn run(&self, artifacts: &FrameArtifacts, frame: Envelope) -> Result<Envelope, RelayError> {
        self.store
            .write_source(artifacts, frame.data())
            .await
            .map_err(RelayError::Storage)?;
        let fallback_format = frame.format();
        drop(frame);

        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RelayError::WorkersClosed)?;

        let request = DetectionRequest {
            source: &artifacts.source,
            output: &artifacts.output,
        };
        timeout(self.timeout, self.detector.detect(request))
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))??;

        let data = match self.store.read_output(artifacts).await {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => return Err(RelayError::MissingResult(artifacts.output.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RelayError::MissingResult(artifacts.output.clone()))
            }
            Err(e) => return Err(RelayError::ResultRead(e)),
        };

        let format = ImageFormat::sniff(&data)
            .or_else(|| ImageFormat::from_path(&artifacts.output))
            .unwrap_or(fallback_format);

        Ok(Envelope::new(format, data))
    }
}
