use crate::{
    models::{ListingReport, ProductRecord},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_RETAINED_JOBS: usize = 256;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job worker is not running")]
    WorkerStopped,
}

/// Bounded queue in front of a single pipeline worker.
///
/// Producers (HTTP handlers, the inbox poller) wait when the queue is full.
/// Only the most recent completed jobs stay queryable.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<StatusBook>>,
}

struct StatusBook {
    states: HashMap<Uuid, JobState>,
    completed: VecDeque<Uuid>,
    retained: usize,
}

impl StatusBook {
    fn new(retained: usize) -> Self {
        Self {
            states: HashMap::new(),
            completed: VecDeque::new(),
            retained: retained.max(1),
        }
    }

    fn complete(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
        self.completed.push_back(id);
        while self.completed.len() > self.retained {
            if let Some(oldest) = self.completed.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

struct Job {
    id: Uuid,
    records: Vec<ProductRecord>,
    origin: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        records: usize,
    },
    Running {
        records: usize,
    },
    Completed {
        succeeded: usize,
        failed: usize,
        results: Vec<ListingReport>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::with_limits(
            pipeline,
            usize_from_env("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            usize_from_env("JOB_RETENTION", DEFAULT_RETAINED_JOBS),
        )
    }

    pub fn with_capacity(pipeline: Pipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        Self::with_limits(pipeline, capacity, DEFAULT_RETAINED_JOBS)
    }

    pub fn with_limits(
        pipeline: Pipeline,
        capacity: usize,
        retained: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(StatusBook::new(retained)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.states.insert(
                        job.id,
                        JobState::Running {
                            records: job.records.len(),
                        },
                    );
                }
                info!(
                    target = "relister.pipeline",
                    job_id = %job.id,
                    origin = %job.origin,
                    records = job.records.len(),
                    "job_started"
                );

                let results = pipeline.run_batch(&job.records).await;
                let succeeded = results.iter().filter(|r| r.result.is_success()).count();
                let failed = results.len() - succeeded;
                info!(
                    target = "relister.pipeline",
                    job_id = %job.id,
                    succeeded,
                    failed,
                    "job_completed"
                );
                statuses_bg.lock().await.complete(
                    job.id,
                    JobState::Completed {
                        succeeded,
                        failed,
                        results,
                    },
                );
            }
        });

        (Self { tx, statuses }, handle)
    }

    /// Waits for queue space, then returns the new job id.
    pub async fn enqueue(
        &self,
        records: Vec<ProductRecord>,
        origin: impl Into<String>,
    ) -> Result<Uuid, JobError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.states.insert(
                id,
                JobState::Queued {
                    records: records.len(),
                },
            );
        }
        let job = Job {
            id,
            records,
            origin: origin.into(),
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(JobError::WorkerStopped);
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn usize_from_env(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureStage;
    use crate::models::ListingResult;
    use crate::test_support::{StaticTokens, pipeline_harness, sample_record, wait_for_completion};

    fn unpriced(id: &str) -> ProductRecord {
        let mut record = sample_record();
        record.id = id.into();
        record.price = String::new();
        record
    }

    #[tokio::test]
    async fn job_reports_every_record_in_order() {
        let h = pipeline_harness("http://127.0.0.1:9", Vec::new(), StaticTokens::valid("t")).await;
        let (queue, _worker) = JobQueue::with_capacity(h.pipeline.clone(), 2);

        let id = queue
            .enqueue(vec![unpriced("A"), unpriced("B")], "test")
            .await
            .unwrap();
        let info = wait_for_completion(&queue, id).await;
        let JobState::Completed {
            succeeded,
            failed,
            results,
        } = info.state
        else {
            unreachable!()
        };
        assert_eq!((succeeded, failed), (0, 2));
        assert_eq!(results[0].sku, "A");
        assert_eq!(results[1].sku, "B");
        assert!(matches!(
            results[0].result,
            ListingResult::Failed {
                stage: FailureStage::Pricing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oldest_completed_jobs_are_forgotten() {
        let h = pipeline_harness("http://127.0.0.1:9", Vec::new(), StaticTokens::valid("t")).await;
        let (queue, _worker) = JobQueue::with_limits(h.pipeline.clone(), 4, 2);

        let mut ids = Vec::new();
        for sku in ["A", "B", "C"] {
            let id = queue.enqueue(vec![unpriced(sku)], "test").await.unwrap();
            wait_for_completion(&queue, id).await;
            ids.push(id);
        }
        assert!(queue.get(ids[0]).await.is_none());
        assert!(queue.get(ids[1]).await.is_some());
        assert!(queue.get(ids[2]).await.is_some());
        assert_eq!(queue.statuses.lock().await.states.len(), 2);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let h = pipeline_harness("http://127.0.0.1:9", Vec::new(), StaticTokens::valid("t")).await;
        let (queue, _worker) = JobQueue::with_capacity(h.pipeline.clone(), 1);
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn stopped_worker_rejects_jobs() {
        let h = pipeline_harness("http://127.0.0.1:9", Vec::new(), StaticTokens::valid("t")).await;
        let (queue, worker) = JobQueue::with_capacity(h.pipeline.clone(), 1);
        worker.abort();
        let _ = worker.await;
        let err = queue.enqueue(vec![unpriced("A")], "test").await.unwrap_err();
        assert!(matches!(err, JobError::WorkerStopped));
    }

    #[test]
    fn job_info_flattens_state() {
        let info = JobInfo {
            id: "abc".into(),
            state: JobState::Queued { records: 3 },
        };
        let value = serde_json::to_value(info).unwrap();
        assert_eq!(value["state"], "queued");
        assert_eq!(value["records"], 3);
        assert_eq!(value["id"], "abc");
    }
}
