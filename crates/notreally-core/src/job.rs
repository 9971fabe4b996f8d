//! Analysis job lifecycle and the persistence port it is stored through.
//!
//! A job is created `processing` and moves exactly once to `completed` or
//! `failed`. Both terminal states are final.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verdict::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::UnknownStatus(other.to_string())),
        }
    }
}

/// Stored result of a finished job: a score, or the error that ended it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResults {
    Verdict(Verdict),
    Error { error: String },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job {id} already {status}")]
    AlreadyFinished { id: String, status: JobStatus },
    #[error("unknown job status: {0:?}")]
    UnknownStatus(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} cannot be finished as {status}")]
    NotTerminal { id: String, status: JobStatus },
}

/// A fresh random job id.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub filename: String,
    pub filepath: PathBuf,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub results: Option<JobResults>,
}

impl AnalysisJob {
    /// A new job in `processing`.
    pub fn new(id: impl Into<String>, filename: impl Into<String>, filepath: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            filepath: filepath.into(),
            status: JobStatus::Processing,
            created_at: Utc::now(),
            results: None,
        }
    }

    pub fn complete(self, verdict: Verdict) -> Result<Self, JobError> {
        self.finish(JobStatus::Completed, JobResults::Verdict(verdict))
    }

    pub fn fail(self, error: impl Into<String>) -> Result<Self, JobError> {
        self.finish(JobStatus::Failed, JobResults::Error { error: error.into() })
    }

    /// Apply a pipeline outcome.
    pub fn resolve<E: fmt::Display>(self, outcome: Result<Verdict, E>) -> Result<Self, JobError> {
        match outcome {
            Ok(verdict) => self.complete(verdict),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn finish(mut self, status: JobStatus, results: JobResults) -> Result<Self, JobError> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.results = Some(results);
        Ok(self)
    }
}

/// Persistence port for jobs.
///
/// `finish` must only apply to a job that is still `processing`, so
/// concurrent writers cannot overwrite a terminal state.
#[async_trait]
pub trait JobStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn create(&self, job: &AnalysisJob) -> Result<(), Self::Error>;
    async fn finish(&self, job: &AnalysisJob) -> Result<(), Self::Error>;
    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, Self::Error>;
}

/// Process-local job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, AnalysisJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    type Error = JobError;

    async fn create(&self, job: &AnalysisJob) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn finish(&self, job: &AnalysisJob) -> Result<(), JobError> {
        if !job.status.is_terminal() {
            return Err(JobError::NotTerminal {
                id: job.id.clone(),
                status: job.status,
            });
        }
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| JobError::NotFound(job.id.clone()))?;
        if stored.status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                id: job.id.clone(),
                status: stored.status,
            });
        }
        stored.status = job.status;
        stored.results = job.results.clone();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, JobError> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get(id).cloned())
    }
}
