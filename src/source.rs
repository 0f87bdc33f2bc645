//! File inbox that feeds product records into the job queue.
//!
//! Each `*.json` file holds one record or an array of records. A file that
//! parses is enqueued as one job and moved to `processed/`; anything else is
//! moved to `failed/`.

use crate::jobs::{JobError, JobQueue};
use crate::models::{ProductRecord, RecordBatch};
use crate::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_POLL_SECS: u64 = 10;
const PROCESSED_DIR: &str = "processed";
const FAILED_DIR: &str = "failed";

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("inbox io: {0}")]
    Io(String),
    #[error(transparent)]
    Queue(#[from] JobError),
}

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub dir: PathBuf,
    pub poll_interval: Duration,
}

impl InboxConfig {
    /// `None` when `PRODUCT_INBOX_DIR` is unset.
    pub fn from_env() -> Option<Self> {
        let dir = std::env::var("PRODUCT_INBOX_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())?;
        let secs = std::env::var("PRODUCT_INBOX_POLL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_POLL_SECS);
        Some(Self {
            dir: PathBuf::from(dir),
            poll_interval: Duration::from_secs(secs),
        })
    }
}

fn parse_records(bytes: &[u8]) -> Result<Vec<ProductRecord>, String> {
    let records = serde_json::from_slice::<RecordBatch>(bytes)
        .map_err(|err| err.to_string())?
        .into_records();
    if records.is_empty() {
        return Err("file contains no records".into());
    }
    for record in &records {
        Pipeline::validate(record).map_err(|err| err.detail().to_string())?;
    }
    Ok(records)
}

pub fn spawn(config: InboxConfig, queue: JobQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            target = "relister.inbox",
            dir = %config.dir.display(),
            poll_secs = config.poll_interval.as_secs(),
            "inbox_watching"
        );
        let mut ticker = tokio::time::interval(config.poll_interval);
        loop {
            ticker.tick().await;
            match scan_once(&config.dir, &queue).await {
                Ok(_) => {}
                Err(InboxError::Queue(err)) => {
                    warn!(target = "relister.inbox", error = %err, "inbox_stopping");
                    break;
                }
                Err(err) => warn!(target = "relister.inbox", error = %err, "inbox_scan_failed"),
            }
        }
    })
}

/// One pass over the inbox, oldest name first. Returns the ids of the jobs it enqueued.
pub async fn scan_once(dir: &Path, queue: &JobQueue) -> Result<Vec<Uuid>, InboxError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| InboxError::Io(format!("{}: {err}", dir.display())))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| InboxError::Io(err.to_string()))?
    {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut jobs = Vec::new();
    for path in files {
        let parsed = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_records(&bytes),
            Err(err) => Err(err.to_string()),
        };
        match parsed {
            Ok(records) => {
                let count = records.len();
                let origin = format!("inbox:{}", file_name(&path));
                let id = queue.enqueue(records, origin).await?;
                info!(
                    target = "relister.inbox",
                    file = %file_name(&path),
                    records = count,
                    job_id = %id,
                    "inbox_file_enqueued"
                );
                move_into(dir, PROCESSED_DIR, &path).await?;
                jobs.push(id);
            }
            Err(error) => {
                warn!(
                    target = "relister.inbox",
                    file = %file_name(&path),
                    error = %error,
                    "inbox_file_rejected"
                );
                move_into(dir, FAILED_DIR, &path).await?;
            }
        }
    }
    Ok(jobs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn move_into(dir: &Path, sub: &str, path: &Path) -> Result<(), InboxError> {
    let target_dir = dir.join(sub);
    tokio::fs::create_dir_all(&target_dir)
        .await
        .map_err(|err| InboxError::Io(err.to_string()))?;
    tokio::fs::rename(path, target_dir.join(file_name(path)))
        .await
        .map_err(|err| InboxError::Io(err.to_string()))
}
