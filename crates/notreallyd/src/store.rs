use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use thiserror::Error;
use tokio_rusqlite::Connection;

use notreally_core::{AnalysisJob, JobResults, JobStatus, JobStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("invalid results payload: {0}")]
    Results(#[from] serde_json::Error),
    #[error("invalid job record: {0}")]
    InvalidRecord(String),
    #[error("job {0} is not awaiting results")]
    NotProcessing(String),
    #[error("job {0} cannot be finished without a final status")]
    NotTerminal(String),
}

/// Raw `jobs` row, decoded outside the connection thread.
type JobRow = (String, String, String, String, String, Option<String>);

/// SQLite-backed job storage, one row per analysis job.
///
/// All statements run on the connection's own thread, which serializes
/// writes for every job id.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS jobs (
                     id TEXT PRIMARY KEY,
                     filename TEXT NOT NULL,
                     filepath TEXT NOT NULL,
                     status TEXT NOT NULL,
                     created_at TEXT NOT NULL,
                     results_json TEXT
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Number of jobs in each status.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let status = status.as_str();
        let count = self
            .conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = ?1",
                    [status],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn decode_row(row: JobRow) -> Result<AnalysisJob, StoreError> {
    let (id, filename, filepath, status, created_at, results_json) = row;
    let status: JobStatus = status
        .parse()
        .map_err(|e: notreally_core::JobError| StoreError::InvalidRecord(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::InvalidRecord(format!("created_at {created_at:?}: {e}")))?
        .with_timezone(&Utc);
    let results = results_json
        .map(|json| serde_json::from_str::<JobResults>(&json))
        .transpose()?;

    Ok(AnalysisJob {
        id,
        filename,
        filepath: PathBuf::from(filepath),
        status,
        created_at,
        results,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    type Error = StoreError;

    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        let results_json = job.results.as_ref().map(serde_json::to_string).transpose()?;
        let id = job.id.clone();
        let filename = job.filename.clone();
        let filepath = job.filepath.to_string_lossy().into_owned();
        let status = job.status.as_str();
        let created_at = job.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, filename, filepath, status, created_at, results_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![id, filename, filepath, status, created_at, results_json],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn finish(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        if !job.status.is_terminal() {
            return Err(StoreError::NotTerminal(job.id.clone()));
        }
        let results_json = job.results.as_ref().map(serde_json::to_string).transpose()?;
        let id = job.id.clone();
        let status = job.status.as_str();

        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE jobs SET status = ?1, results_json = ?2
                     WHERE id = ?3 AND status = 'processing'",
                    rusqlite::params![status, results_json, id],
                )?;
                Ok(n)
            })
            .await?;

        if updated == 0 {
            return Err(StoreError::NotProcessing(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError> {
        let id = id.to_string();
        let row: Option<JobRow> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, filename, filepath, status, created_at, results_json
                         FROM jobs WHERE id = ?1",
                        [&id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, Option<String>>(5)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(decode_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notreally_core::{ClassificationResult, LegacyFeatures, Verdict};

    fn verdict() -> Verdict {
        Verdict::new(
            ClassificationResult {
                prob_real: 0.3,
                prob_fake: 0.7,
            },
            LegacyFeatures {
                blink_rate: 6.0,
                facial_jitter: 0.25,
                audio_mfcc_variance: 0.1,
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("job-1", "clip.mp4", "uploads/job-1_clip.mp4");
        store.create(&job).await.unwrap();

        let stored = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(stored.id, "job-1");
        assert_eq!(stored.filename, "clip.mp4");
        assert_eq!(stored.filepath, PathBuf::from("uploads/job-1_clip.mp4"));
        assert_eq!(stored.status, JobStatus::Processing);
        assert!(stored.results.is_none());
        assert_eq!(stored.created_at, job.created_at);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_completed() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("job-2", "clip.mp4", "p");
        store.create(&job).await.unwrap();

        let done = job.complete(verdict()).unwrap();
        store.finish(&done).await.unwrap();

        let stored = store.get("job-2").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        match stored.results {
            Some(JobResults::Verdict(v)) => {
                assert_eq!(v.summary, verdict().summary);
                assert!((v.authenticity_score - 30.0).abs() < 1e-9);
            }
            other => panic!("expected verdict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finish_failed_stores_error_payload() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("job-3", "clip.mp4", "p");
        store.create(&job).await.unwrap();
        store.finish(&job.fail("classification failed").unwrap()).await.unwrap();

        let stored = store.get("job-3").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(
            serde_json::to_value(stored.results).unwrap(),
            serde_json::json!({"error": "classification failed"})
        );
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("job-4", "clip.mp4", "p");
        store.create(&job).await.unwrap();
        store.finish(&job.clone().complete(verdict()).unwrap()).await.unwrap();

        let err = store.finish(&job.fail("late writer").unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotProcessing(_)));
        assert_eq!(
            store.get("job-4").await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_finish_requires_final_status() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("job-5", "clip.mp4", "p");
        store.create(&job).await.unwrap();

        let err = store.finish(&job).await.unwrap_err();
        assert!(matches!(err, StoreError::NotTerminal(_)));

        store.finish(&job.fail("decoder crashed").unwrap()).await.unwrap();
        assert_eq!(
            store.get("job-5").await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_finish_unknown_job() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        let job = AnalysisJob::new("ghost", "clip.mp4", "p").fail("x").unwrap();
        assert!(store.finish(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = SqliteJobStore::open(Path::new(":memory:")).await.unwrap();
        for id in ["a", "b", "c"] {
            store.create(&AnalysisJob::new(id, "clip.mp4", "p")).await.unwrap();
        }
        let a = store.get("a").await.unwrap().unwrap();
        store.finish(&a.complete(verdict()).unwrap()).await.unwrap();

        assert_eq!(store.count_by_status(JobStatus::Processing).await.unwrap(), 2);
        assert_eq!(store.count_by_status(JobStatus::Completed).await.unwrap(), 1);
        assert_eq!(store.count_by_status(JobStatus::Failed).await.unwrap(), 0);
    }
}
