//! HTTP API.
//!
//! - POST /api/analyze          - upload a video and run the analysis
//! - GET  /api/results/:job_id  - fetch a job and its results
//! - GET  /api/health           - liveness probe

use std::path::{Path, PathBuf};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use notreally_core::job::new_job_id;
use notreally_core::{AnalysisJob, JobResults, JobStatus, JobStore};

use crate::engine::EngineHandle;
use crate::error::ApiError;
use crate::store::SqliteJobStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: SqliteJobStore,
    pub upload_dir: PathBuf,
}

/// Build the router with all endpoints.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/results/:job_id", get(results))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct UploadResponse {
    job_id: String,
    status: JobStatus,
    message: &'static str,
}

#[derive(Serialize)]
struct JobResponse {
    job_id: String,
    status: JobStatus,
    results: Option<JobResults>,
    created_at: String,
    filename: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "NotReal.ly API is running",
    })
}

/// Store the upload, run the pipeline, record the outcome.
///
/// The response is sent after the job has finished; a pipeline failure is
/// recorded on the job and still answers 200. Analysis and the final store
/// write run in their own task, so a client that goes away mid-request does
/// not leave the job stuck in `processing`.
async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            return Err(ApiError::BadRequest("No file provided".into()));
        };
        let data = field.bytes().await?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    let basename = safe_basename(&filename)
        .ok_or_else(|| ApiError::BadRequest("No file selected".into()))?;

    let job_id = new_job_id();
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let filepath = state.upload_dir.join(format!("{job_id}_{basename}"));
    tokio::fs::write(&filepath, &data).await?;
    tracing::info!(job_id = %job_id, filename = %filename, bytes = data.len(), "upload stored");

    let job = AnalysisJob::new(&job_id, &filename, &filepath);
    state.store.create(&job).await?;

    let engine = state.engine.clone();
    let store = state.store.clone();
    let task = tokio::spawn(async move {
        let outcome = engine.analyze(filepath).await.map(|a| a.verdict);
        if let Err(e) = &outcome {
            tracing::warn!(job_id = %job.id, error = %e, "analysis failed");
        }
        let job = job.resolve(outcome)?;
        store.finish(&job).await?;
        tracing::info!(job_id = %job.id, status = %job.status, "job finished");
        Ok::<_, ApiError>(())
    });
    task.await.map_err(|e| ApiError::Internal(format!("analysis task: {e}")))??;

    Ok(Json(UploadResponse {
        job_id,
        status: JobStatus::Processing,
        message: "Video uploaded successfully",
    }))
}

async fn results(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .store
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))?;

    Ok(Json(JobResponse {
        job_id: job.id,
        status: job.status,
        results: job.results,
        created_at: job.created_at.to_rfc3339(),
        filename: job.filename,
    }))
}

/// Final path component of a client-supplied filename, restricted to a
/// conservative character set. `None` when nothing usable remains.
fn safe_basename(filename: &str) -> Option<String> {
    let last = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() || Path::new(&cleaned).file_name().is_none() {
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use notreally_core::{
        ClassificationResult, Classifier, ClassifierError, Extractors, FeatureVector, Pipeline,
    };

    use crate::engine::spawn_pipeline;

    const BOUNDARY: &str = "notreally-test-boundary";

    struct Fixed(f64);

    impl Classifier for Fixed {
        fn predict(&self, _v: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
            Ok(ClassificationResult {
                prob_real: self.0,
                prob_fake: 1.0 - self.0,
            })
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn predict(&self, _v: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
            Err(ClassifierError::Inference("model unavailable".into()))
        }
    }

    struct Slow(Duration);

    impl Classifier for Slow {
        fn predict(&self, _v: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
            std::thread::sleep(self.0);
            Ok(ClassificationResult {
                prob_real: 0.9,
                prob_fake: 0.1,
            })
        }
    }

    async fn app_with(classifier: Arc<dyn Classifier>, limit: usize) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let engine = spawn_pipeline(Pipeline::new(Extractors::none(), classifier)).unwrap();
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let state = AppState {
            engine,
            store,
            upload_dir: dir.path().join("uploads"),
        };
        (dir, router(state, limit))
    }

    async fn app(classifier: Arc<dyn Classifier>) -> (TempDir, Router) {
        app_with(classifier, 1024 * 1024).await
    }

    fn multipart(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
        let disposition = match filename {
            Some(f) => format!("form-data; name=\"{field}\"; filename=\"{f}\""),
            None => format!("form-data; name=\"{field}\""),
        };
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: video/mp4\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = app(Arc::new(Fixed(0.5))).await;
        let resp = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json(resp).await,
            serde_json::json!({"status": "healthy", "message": "NotReal.ly API is running"})
        );
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let (_dir, app) = app(Arc::new(Fixed(0.5))).await;
        let resp = app
            .oneshot(multipart("video", Some("clip.mp4"), b"data"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "No file provided");
    }

    #[tokio::test]
    async fn test_file_field_without_filename() {
        let (_dir, app) = app(Arc::new(Fixed(0.5))).await;
        let resp = app.oneshot(multipart("file", None, b"data")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "No file provided");
    }

    #[tokio::test]
    async fn test_empty_filename() {
        let (_dir, app) = app(Arc::new(Fixed(0.5))).await;
        let resp = app.oneshot(multipart("file", Some(""), b"data")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "No file selected");
    }

    #[tokio::test]
    async fn test_upload_then_fetch_results() {
        let (dir, app) = app(Arc::new(Fixed(0.9))).await;

        let resp = app
            .clone()
            .oneshot(multipart("file", Some("interview.mp4"), b"not really a video"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let upload = json(resp).await;
        assert_eq!(upload["status"], "processing");
        assert_eq!(upload["message"], "Video uploaded successfully");
        let job_id = upload["job_id"].as_str().unwrap().to_string();

        let stored = dir.path().join("uploads").join(format!("{job_id}_interview.mp4"));
        assert_eq!(std::fs::read(stored).unwrap(), b"not really a video");

        let resp = app
            .oneshot(get(&format!("/api/results/{job_id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let job = json(resp).await;
        assert_eq!(job["job_id"], job_id.as_str());
        assert_eq!(job["status"], "completed");
        assert_eq!(job["filename"], "interview.mp4");
        assert!(job["created_at"].is_string());
        assert!((job["results"]["authenticity_score"].as_f64().unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(job["results"]["summary"], "This appears to be a real video.");
    }

    #[tokio::test]
    async fn test_pipeline_failure_recorded_on_job() {
        let (_dir, app) = app(Arc::new(Broken)).await;

        let resp = app
            .clone()
            .oneshot(multipart("file", Some("clip.mp4"), b"bytes"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let job_id = json(resp).await["job_id"].as_str().unwrap().to_string();

        let job = json(
            app.oneshot(get(&format!("/api/results/{job_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(job["status"], "failed");
        assert!(job["results"]["error"]
            .as_str()
            .unwrap()
            .contains("model unavailable"));
    }

    #[tokio::test]
    async fn test_job_finishes_after_client_disconnects() {
        let (dir, app) = app(Arc::new(Slow(Duration::from_millis(1000)))).await;

        // The client gives up while the classifier is still running.
        let upload = app.clone().oneshot(multipart("file", Some("clip.mp4"), b"bytes"));
        assert!(tokio::time::timeout(Duration::from_millis(250), upload)
            .await
            .is_err());

        let entry = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let name = entry.file_name().into_string().unwrap();
        let job_id = name.strip_suffix("_clip.mp4").unwrap().to_string();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let status = loop {
            let job = json(
                app.clone()
                    .oneshot(get(&format!("/api/results/{job_id}")))
                    .await
                    .unwrap(),
            )
            .await;
            if job["status"] != "processing" || tokio::time::Instant::now() > deadline {
                break job["status"].clone();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_dir, app) = app(Arc::new(Fixed(0.5))).await;
        let resp = app.oneshot(get("/api/results/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(resp).await, serde_json::json!({"error": "Job not found"}));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let (_dir, app) = app_with(Arc::new(Fixed(0.5)), 64).await;
        let resp = app
            .oneshot(multipart("file", Some("clip.mp4"), &[0u8; 4096]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_safe_basename() {
        assert_eq!(safe_basename("clip.mp4").as_deref(), Some("clip.mp4"));
        assert_eq!(safe_basename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_basename("C:\\videos\\my clip.mov").as_deref(), Some("my_clip.mov"));
        assert_eq!(safe_basename(""), None);
        assert_eq!(safe_basename("dir/"), None);
        assert_eq!(safe_basename(".."), None);
    }
}
