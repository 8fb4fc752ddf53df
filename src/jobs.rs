use crate::{
    media::{DOWNLOAD_MAX_RETRIES, DOWNLOAD_RETRY_DELAY, MediaService},
    tasks::{TaskOutcome, TaskRunner},
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("task queue is closed")]
pub struct QueueClosed;

/// Unit of work for the in-process worker. `attempt` is 0 for the first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Publish { job_id: Uuid, attempt: u32 },
    Upload { job_id: Uuid, attempt: u32 },
    DownloadAsset { asset_id: Uuid, attempt: u32 },
}

impl Task {
    pub fn publish(job_id: Uuid) -> Self {
        Task::Publish { job_id, attempt: 0 }
    }

    pub fn upload(job_id: Uuid) -> Self {
        Task::Upload { job_id, attempt: 0 }
    }

    pub fn download(asset_id: Uuid) -> Self {
        Task::DownloadAsset {
            asset_id,
            attempt: 0,
        }
    }

    fn next_attempt(self) -> Self {
        match self {
            Task::Publish { job_id, attempt } => Task::Publish {
                job_id,
                attempt: attempt + 1,
            },
            Task::Upload { job_id, attempt } => Task::Upload {
                job_id,
                attempt: attempt + 1,
            },
            Task::DownloadAsset { asset_id, attempt } => Task::DownloadAsset {
                asset_id,
                attempt: attempt + 1,
            },
        }
    }
}

#[derive(Clone)]
pub struct Workers {
    pub runner: TaskRunner,
    pub media: MediaService,
}

impl Workers {
    /// Runs one task. Returns the follow-up to send after the delay, if any.
    async fn execute(&self, task: Task) -> Option<(Duration, Task)> {
        let outcome = match task {
            Task::Publish { job_id, attempt } => self.runner.publish(job_id, attempt).await,
            Task::Upload { job_id, attempt } => self.runner.upload(job_id, attempt).await,
            Task::DownloadAsset { asset_id, attempt } => {
                return match self.media.download_asset(asset_id).await {
                    Ok(_) => None,
                    Err(err) if err.is_retryable() && attempt < DOWNLOAD_MAX_RETRIES => {
                        Some((DOWNLOAD_RETRY_DELAY, task.next_attempt()))
                    }
                    Err(err) => {
                        error!(
                            target = "salon_gbp.queue",
                            asset_id = %asset_id,
                            attempt,
                            error = %err,
                            "download_abandoned"
                        );
                        None
                    }
                };
            }
        };
        match outcome {
            Ok(TaskOutcome::RetryScheduled { countdown }) => Some((countdown, task.next_attempt())),
            Ok(_) => None,
            Err(err) => {
                error!(
                    target = "salon_gbp.queue",
                    task = ?task,
                    error = %err,
                    "task_errored"
                );
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
}

impl TaskQueue {
    /// Starts the worker loop. At most `concurrency` tasks execute at once;
    /// delayed retries sleep outside the permit and are then re-sent.
    pub fn spawn(workers: Workers, capacity: usize, concurrency: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Task>(capacity.max(1));
        let retry_tx = tx.downgrade();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let workers = workers.clone();
                let retry_tx = retry_tx.clone();
                tokio::spawn(async move {
                    let follow_up = workers.execute(task).await;
                    drop(permit);
                    let Some((delay, next)) = follow_up else {
                        return;
                    };
                    info!(
                        target = "salon_gbp.queue",
                        task = ?next,
                        delay_secs = delay.as_secs(),
                        "task_requeue_scheduled"
                    );
                    tokio::time::sleep(delay).await;
                    let sent = match retry_tx.upgrade() {
                        Some(tx) => tx.send(next).await.is_ok(),
                        None => false,
                    };
                    if !sent {
                        warn!(
                            target = "salon_gbp.queue",
                            task = ?next,
                            "task_requeue_dropped"
                        );
                    }
                });
            }
        });

        (Self { tx }, handle)
    }

    pub async fn enqueue(&self, task: Task) -> Result<(), QueueClosed> {
        self.tx.send(task).await.map_err(|_| QueueClosed)
    }
}
