//! # Storage Module - Observation Persistence
//!
//! Append-only persistence for accepted and disregarded observations behind
//! the [`ObservationSink`] trait. Two implementations are provided:
//!
//! - [`JsonlSink`] - local JSON-lines files, one row per observation
//! - [`HttpSink`] - PUT each record to a remote upload endpoint
//!
//! ## Layout of the file store
//!
//! ```text
//! data/
//! ├── observations.jsonl               ← accepted records
//! └── disregarded_observations.jsonl   ← disregarded records with reasons
//! ```
//!
//! Every row carries a fresh UUID, the capture `timestamp`, the `created_at`
//! time the row was written and the observation itself under `data`.
//! Disregarded rows add a friendly reason and the detailed structural issues
//! (JSON encoded).
//!
//! ## Concurrency
//!
//! Deliveries run in independent tasks, so appends take an exclusive `fs2`
//! lock on the target file for the duration of the write. Locking is blocking
//! I/O and runs on the blocking pool.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::delivery::transport::{Transport, UploadRequest};
use crate::logutil::body_preview;
use crate::observation::{FieldIssue, Observation, ValidatedObservation};

pub const ACCEPTED_FILE: &str = "observations.jsonl";
pub const DISREGARDED_FILE: &str = "disregarded_observations.jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("upload rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::Upload(_) | StoreError::Task(_) => true,
            StoreError::Serialize(_) | StoreError::Rejected { .. } => false,
        }
    }
}

/// Append-only observation persistence.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Credentials the sink needs but does not have.
    fn missing_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    async fn insert_accepted(&self, observation: &Observation) -> Result<(), StoreError>;

    async fn insert_disregarded(&self, record: &ValidatedObservation) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub data: Observation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisregardedRow {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub data: Observation,
    pub disregard_reason_friendly: String,
    /// JSON array of structural issues, `[]` when the range rules fired.
    pub disregard_reason_detailed: String,
}

impl DisregardedRow {
    pub fn issues(&self) -> Vec<FieldIssue> {
        serde_json::from_str(&self.disregard_reason_detailed).unwrap_or_default()
    }
}

/// JSON-lines files under a data directory.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    data_dir: PathBuf,
}

impl JsonlSink {
    pub async fn new(data_dir: &str) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", data_dir, e))?;
        Ok(Self {
            data_dir: PathBuf::from(data_dir),
        })
    }

    pub fn accepted_path(&self) -> PathBuf {
        self.data_dir.join(ACCEPTED_FILE)
    }

    pub fn disregarded_path(&self) -> PathBuf {
        self.data_dir.join(DISREGARDED_FILE)
    }

    pub async fn read_accepted(&self) -> Result<Vec<ObservationRow>> {
        read_rows(&self.accepted_path()).await
    }

    pub async fn read_disregarded(&self) -> Result<Vec<DisregardedRow>> {
        read_rows(&self.disregarded_path()).await
    }

    async fn append_row<T: Serialize>(&self, path: PathBuf, row: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        tokio::task::spawn_blocking(move || append_locked(&path, line.as_bytes()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(())
    }
}

/// Append under an exclusive lock; the lock is released when the file closes.
fn append_locked(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let result = file.write_all(bytes).and_then(|_| file.sync_data());
    let _ = file.unlock();
    result
}

async fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(anyhow!("Failed to read {}: {}", path.display(), e)),
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| anyhow!("Corrupt row in {}: {}", path.display(), e)))
        .collect()
}

#[async_trait]
impl ObservationSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn insert_accepted(&self, observation: &Observation) -> Result<(), StoreError> {
        let row = ObservationRow {
            id: Uuid::new_v4(),
            timestamp: observation.timestamp,
            created_at: Utc::now(),
            data: observation.clone(),
        };
        self.append_row(self.accepted_path(), &row).await?;
        debug!("Stored observation {}", row.id);
        Ok(())
    }

    async fn insert_disregarded(&self, record: &ValidatedObservation) -> Result<(), StoreError> {
        let row = DisregardedRow {
            id: Uuid::new_v4(),
            timestamp: record.observation.timestamp,
            created_at: Utc::now(),
            data: record.observation.clone(),
            disregard_reason_friendly: record.reason_text().to_string(),
            disregard_reason_detailed: serde_json::to_string(&record.structural_errors)?,
        };
        self.append_row(self.disregarded_path(), &row).await?;
        debug!("Stored disregarded observation {} ({})", row.id, row.disregard_reason_friendly);
        Ok(())
    }
}

/// Body sent to the upload endpoint: the observation plus the disregard verdict.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadPayload<'a> {
    #[serde(flatten)]
    observation: &'a Observation,
    /// Omitted for accepted records; the endpoint rejects an explicit null.
    #[serde(skip_serializing_if = "Option::is_none")]
    disregard_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "<[FieldIssue]>::is_empty")]
    structural_errors: &'a [FieldIssue],
}

/// PUTs each record to `<upload_url>/<secret>`.
pub struct HttpSink {
    upload_url: String,
    secret: Option<String>,
    transport: Arc<dyn Transport>,
}

impl HttpSink {
    pub fn new(upload_url: &str, secret: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            upload_url: upload_url.trim_end_matches('/').to_string(),
            secret,
            transport,
        }
    }

    pub fn request_for(&self, payload: serde_json::Value) -> UploadRequest {
        let secret = self.secret.as_deref().unwrap_or_default();
        UploadRequest::put_json(
            format!("{}/{}", self.upload_url, urlencoding::encode(secret)),
            payload,
        )
    }

    async fn put(&self, payload: UploadPayload<'_>) -> Result<(), StoreError> {
        let request = self.request_for(serde_json::to_value(&payload)?);
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| StoreError::Upload(e.to_string()))?;
        match response.status {
            200..=299 => Ok(()),
            400 | 401 => Err(StoreError::Rejected {
                status: response.status,
                message: body_preview(&response.body),
            }),
            status => Err(StoreError::Upload(format!(
                "HTTP {}: {}",
                status,
                body_preview(&response.body)
            ))),
        }
    }
}

#[async_trait]
impl ObservationSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        if self.secret.is_none() {
            vec!["upload_secret"]
        } else {
            Vec::new()
        }
    }

    async fn insert_accepted(&self, observation: &Observation) -> Result<(), StoreError> {
        self.put(UploadPayload {
            observation,
            disregard_reason: None,
            structural_errors: &[],
        })
        .await
    }

    async fn insert_disregarded(&self, record: &ValidatedObservation) -> Result<(), StoreError> {
        self.put(UploadPayload {
            observation: &record.observation,
            disregard_reason: record.disregard_reason.map(|r| r.as_str()),
            structural_errors: &record.structural_errors,
        })
        .await
    }
}
