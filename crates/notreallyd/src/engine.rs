use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use notreally_core::landmarks::face_mesh::FaceMeshFactory;
use notreally_core::{Analysis, Extractors, LandmarkSourceFactory, Pipeline, PipelineError};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] notreally_models::ModelError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Analyze {
        path: PathBuf,
        reply: oneshot::Sender<Result<Analysis, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run the full pipeline on a stored media file.
    pub async fn analyze(&self, path: PathBuf) -> Result<Analysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                path,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the classifier and spawn the engine.
///
/// Fails fast if the classifier artifact is missing or corrupt.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let classifier =
        notreally_models::load_classifier(&config.model_path, config.model_sha256.as_deref())?;
    tracing::info!(path = %config.model_path.display(), "classifier loaded");

    let landmarks = landmark_source(config);
    if landmarks.is_none() {
        tracing::warn!("no landmark detector; video features will be absent");
    }

    let extractors = Extractors::standard(&config.tools(), config.analyzer_params(), landmarks);
    spawn_pipeline(Pipeline::new(extractors, classifier))
}

/// Face detector + mesh pair, when both model files are installed.
fn landmark_source(config: &Config) -> Option<Arc<dyn LandmarkSourceFactory>> {
    match FaceMeshFactory::locate(&config.face_detector_model, &config.face_mesh_model) {
        Ok(factory) => Some(Arc::new(factory)),
        Err(e) => {
            tracing::warn!(error = %e, "landmark models unavailable");
            None
        }
    }
}

/// Run `pipeline` on a dedicated OS thread, one job at a time.
pub fn spawn_pipeline(pipeline: Pipeline) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("notreally-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { path, reply } => {
                        tracing::debug!(path = %path.display(), "analyzing");
                        let result = pipeline.analyze(&path).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
