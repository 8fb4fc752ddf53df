//! Publish/upload task: claim the job with a status CAS, call the GBP API,
//! then settle it as posted/uploaded, failed, or re-queued for a delayed
//! retry on HTTP 429.
//!
//! The claim is the only concurrency guard. A worker that loses the claim
//! returns [`TaskOutcome::NotClaimed`] without touching anything.

use crate::{
    alerts::AlertSink,
    gbp::{GbpApi, GbpError, LocalPostBody, MediaBody},
    metrics,
    models::{
        AssetStatus, Connection, ConnectionStatus, JobKind, JobStatus, Location, Severity,
    },
    store::{Store, StoreError},
    tokens::TokenManager,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const RATE_LIMIT_MESSAGE: &str = "GBP API rate limited (429) - max retries exceeded";
pub const ASSET_UNAVAILABLE_MESSAGE: &str = "Media asset not available";
const OAUTH_EXPIRED_MESSAGE: &str = "GBP token expired or revoked. Reconnect Google account.";
const MAX_COUNTDOWN_SECS: u64 = 600;
const BASE_COUNTDOWN_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{entity} {id} disappeared after claim")]
    Missing { entity: &'static str, id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Another worker holds or already finished the job.
    NotClaimed,
    Completed,
    Failed,
    /// Job is back in `queued`; run it again after `countdown`.
    RetryScheduled { countdown: Duration },
    /// The job left the in-progress state while we were waiting on the API.
    Superseded,
}

/// `min(600, 30 * 2^attempt)` seconds, `attempt` being the 0-based attempt
/// that just hit the rate limit.
pub fn retry_countdown(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(
        BASE_COUNTDOWN_SECS
            .saturating_mul(factor)
            .min(MAX_COUNTDOWN_SECS),
    )
}

enum Failure {
    Status(u16),
    Other(String),
}

impl From<GbpError> for Failure {
    fn from(err: GbpError) -> Self {
        match err.status() {
            Some(status) => Failure::Status(status),
            None => Failure::Other(err.to_string()),
        }
    }
}

struct Claimed {
    kind: JobKind,
    id: Uuid,
    tenant_id: Uuid,
}

impl Claimed {
    fn alert_type(&self) -> &'static str {
        match self.kind {
            JobKind::Publish => "gbp_post_failed",
            JobKind::Upload => "gbp_media_failed",
        }
    }

    fn entity_type(&self) -> &'static str {
        match self.kind {
            JobKind::Publish => "gbp_post",
            JobKind::Upload => "gbp_media_upload",
        }
    }

    fn failure_label(&self) -> &'static str {
        match self.kind {
            JobKind::Publish => "GBP post failed",
            JobKind::Upload => "GBP media upload failed",
        }
    }
}

struct Target {
    location: Location,
    connection: Connection,
}

#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn Store>,
    gbp: Arc<dyn GbpApi>,
    tokens: TokenManager,
    alerts: AlertSink,
    max_retries: u32,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn Store>,
        gbp: Arc<dyn GbpApi>,
        tokens: TokenManager,
        alerts: AlertSink,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            gbp,
            tokens,
            alerts,
            max_retries,
        }
    }

    pub async fn publish(&self, job_id: Uuid, attempt: u32) -> Result<TaskOutcome, TaskError> {
        let result = self.run_publish(job_id, attempt).await;
        if let Err(err) = &result {
            self.errored(JobKind::Publish, job_id, err).await;
        }
        result
    }

    pub async fn upload(&self, job_id: Uuid, attempt: u32) -> Result<TaskOutcome, TaskError> {
        let result = self.run_upload(job_id, attempt).await;
        if let Err(err) = &result {
            self.errored(JobKind::Upload, job_id, err).await;
        }
        result
    }

    /// A store failure mid-task can leave the job in its in-progress state,
    /// where no worker will pick it up again.
    async fn errored(&self, kind: JobKind, job_id: Uuid, err: &TaskError) {
        let (label, entity_type, tenant_id) = match kind {
            JobKind::Publish => (
                "GBP post",
                "gbp_post",
                self.store
                    .get_publish_job(job_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|job| job.tenant_id),
            ),
            JobKind::Upload => (
                "GBP media upload",
                "gbp_media_upload",
                self.store
                    .get_upload_job(job_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|job| job.tenant_id),
            ),
        };
        self.alerts
            .raise(
                tenant_id,
                Severity::Warning,
                "task_errored",
                format!("{label} {job_id} stopped before settling: {err}"),
                Some((entity_type, job_id)),
            )
            .await;
    }

    async fn run_publish(&self, job_id: Uuid, attempt: u32) -> Result<TaskOutcome, TaskError> {
        if !self.claim(JobKind::Publish, job_id).await? {
            return Ok(TaskOutcome::NotClaimed);
        }
        let job = self
            .store
            .get_publish_job(job_id)
            .await?
            .ok_or(TaskError::Missing {
                entity: "publish job",
                id: job_id,
            })?;
        let claimed = Claimed {
            kind: JobKind::Publish,
            id: job.id,
            tenant_id: job.tenant_id,
        };
        let target = match self.target(job.location_id).await {
            Ok(target) => target,
            Err(failure) => return self.settle(&claimed, None, attempt, failure).await,
        };

        let image_url = match job.image_asset_id {
            Some(asset_id) => self
                .store
                .get_asset(asset_id)
                .await?
                .filter(|asset| asset.status == AssetStatus::Available)
                .map(|asset| asset.public_url),
            None => None,
        };
        let body = LocalPostBody::from_job(&job, image_url);

        let result = match self.tokens.access_token(&target.connection).await {
            Ok(token) => self
                .gbp
                .create_local_post(
                    &token,
                    &target.location.account_id,
                    &target.location.location_id,
                    &body,
                )
                .await
                .map_err(Failure::from),
            Err(err) => Err(Failure::Other(err.to_string())),
        };

        match result {
            Ok(post_name) => {
                self.store
                    .complete_publish_job(job.id, &post_name, Utc::now())
                    .await?;
                info!(
                    target = "salon_gbp.task",
                    job_id = %job.id,
                    post = %post_name,
                    "publish_completed"
                );
                metrics::task_outcome("publish", "completed");
                Ok(TaskOutcome::Completed)
            }
            Err(failure) => {
                self.settle(&claimed, Some(&target.connection), attempt, failure)
                    .await
            }
        }
    }

    async fn run_upload(&self, job_id: Uuid, attempt: u32) -> Result<TaskOutcome, TaskError> {
        if !self.claim(JobKind::Upload, job_id).await? {
            return Ok(TaskOutcome::NotClaimed);
        }
        let job = self
            .store
            .get_upload_job(job_id)
            .await?
            .ok_or(TaskError::Missing {
                entity: "upload job",
                id: job_id,
            })?;
        let claimed = Claimed {
            kind: JobKind::Upload,
            id: job.id,
            tenant_id: job.tenant_id,
        };
        let target = match self.target(job.location_id).await {
            Ok(target) => target,
            Err(failure) => return self.settle(&claimed, None, attempt, failure).await,
        };

        let asset = self
            .store
            .get_asset(job.asset_id)
            .await?
            .filter(|asset| asset.status == AssetStatus::Available);
        let Some(asset) = asset else {
            self.store
                .fail_job(JobKind::Upload, job.id, ASSET_UNAVAILABLE_MESSAGE)
                .await?;
            warn!(
                target = "salon_gbp.task",
                job_id = %job.id,
                asset_id = %job.asset_id,
                "upload_asset_unavailable"
            );
            metrics::task_outcome("upload", "failed");
            return Ok(TaskOutcome::Failed);
        };
        let body = MediaBody::new(job.media_kind, &asset.public_url, &job.category);

        let result = match self.tokens.access_token(&target.connection).await {
            Ok(token) => self
                .gbp
                .upload_media(
                    &token,
                    &target.location.account_id,
                    &target.location.location_id,
                    &body,
                )
                .await
                .map_err(Failure::from),
            Err(err) => Err(Failure::Other(err.to_string())),
        };

        match result {
            Ok(media_name) => {
                self.store
                    .complete_upload_job(job.id, &media_name, Utc::now())
                    .await?;
                info!(
                    target = "salon_gbp.task",
                    job_id = %job.id,
                    media = %media_name,
                    "upload_completed"
                );
                metrics::task_outcome("upload", "completed");
                Ok(TaskOutcome::Completed)
            }
            Err(failure) => {
                self.settle(&claimed, Some(&target.connection), attempt, failure)
                    .await
            }
        }
    }

    async fn claim(&self, kind: JobKind, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .store
            .transition_job(kind, id, &JobStatus::CLAIMABLE, kind.in_progress())
            .await?;
        if changed == 0 {
            info!(
                target = "salon_gbp.task",
                job_id = %id,
                kind = ?kind,
                "task_not_claimed"
            );
        }
        Ok(changed == 1)
    }

    async fn target(&self, location_id: Uuid) -> Result<Target, Failure> {
        let location = self
            .store
            .get_location(location_id)
            .await
            .map_err(|err| Failure::Other(err.to_string()))?
            .ok_or_else(|| Failure::Other(format!("location {location_id} not found")))?;
        let connection = self
            .store
            .get_connection(location.connection_id)
            .await
            .map_err(|err| Failure::Other(err.to_string()))?
            .ok_or_else(|| {
                Failure::Other(format!("connection {} not found", location.connection_id))
            })?;
        Ok(Target {
            location,
            connection,
        })
    }

    async fn settle(
        &self,
        claimed: &Claimed,
        connection: Option<&Connection>,
        attempt: u32,
        failure: Failure,
    ) -> Result<TaskOutcome, TaskError> {
        let kind_label = match claimed.kind {
            JobKind::Publish => "publish",
            JobKind::Upload => "upload",
        };
        match failure {
            Failure::Status(429) if attempt < self.max_retries => {
                let countdown = retry_countdown(attempt);
                let reverted = self
                    .store
                    .transition_job(
                        claimed.kind,
                        claimed.id,
                        &[claimed.kind.in_progress()],
                        JobStatus::Queued,
                    )
                    .await?;
                if reverted == 0 {
                    warn!(
                        target = "salon_gbp.task",
                        job_id = %claimed.id,
                        "rate_limit_revert_lost"
                    );
                    return Ok(TaskOutcome::Superseded);
                }
                self.store.clear_job_error(claimed.kind, claimed.id).await?;
                warn!(
                    target = "salon_gbp.task",
                    job_id = %claimed.id,
                    attempt,
                    countdown_secs = countdown.as_secs(),
                    "rate_limited_retry_scheduled"
                );
                metrics::retry_scheduled(kind_label, countdown.as_secs());
                Ok(TaskOutcome::RetryScheduled { countdown })
            }
            Failure::Status(429) => {
                self.store
                    .fail_job(claimed.kind, claimed.id, RATE_LIMIT_MESSAGE)
                    .await?;
                error!(
                    target = "salon_gbp.task",
                    job_id = %claimed.id,
                    attempt,
                    "rate_limit_retries_exhausted"
                );
                metrics::task_outcome(kind_label, "failed");
                Ok(TaskOutcome::Failed)
            }
            Failure::Status(status) => {
                if status == 401
                    && let Some(connection) = connection
                {
                    self.store
                        .set_connection_status(connection.id, ConnectionStatus::Expired)
                        .await?;
                    self.alerts
                        .raise(
                            Some(claimed.tenant_id),
                            Severity::Critical,
                            "oauth_expired",
                            OAUTH_EXPIRED_MESSAGE,
                            Some(("gbp_connection", connection.id)),
                        )
                        .await;
                }
                let message = GbpError::Status { status }.to_string();
                self.store
                    .fail_job(claimed.kind, claimed.id, &message)
                    .await?;
                error!(
                    target = "salon_gbp.task",
                    job_id = %claimed.id,
                    status,
                    "gbp_api_rejected"
                );
                metrics::task_outcome(kind_label, "failed");
                Ok(TaskOutcome::Failed)
            }
            Failure::Other(message) => {
                self.store
                    .fail_job(claimed.kind, claimed.id, &message)
                    .await?;
                error!(
                    target = "salon_gbp.task",
                    job_id = %claimed.id,
                    error = %message,
                    "task_failed"
                );
                self.alerts
                    .raise(
                        Some(claimed.tenant_id),
                        Severity::Warning,
                        claimed.alert_type(),
                        format!("{}: {message}", claimed.failure_label()),
                        Some((claimed.entity_type(), claimed.id)),
                    )
                    .await;
                metrics::task_outcome(kind_label, "failed");
                Ok(TaskOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gbp::testing::FakeGbp,
        models::MediaKind,
        store::{AssetDownload, MemoryStore},
        testutil,
        tokens::testing::{FakeRefresher, PlainCipher},
    };
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        store: Arc<MemoryStore>,
        gbp: Arc<FakeGbp>,
        runner: TaskRunner,
        tenant_id: Uuid,
        location: Location,
        connection: Connection,
    }

    async fn fixture(results: Vec<Result<String, GbpError>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant = testutil::tenant();
        store.insert_tenant(&tenant).await.unwrap();
        let connection = store
            .upsert_connection(&testutil::connection(ChronoDuration::hours(1)))
            .await
            .unwrap();
        let mut location = testutil::location(tenant.id, true);
        location.connection_id = connection.id;
        let location = store.upsert_location(&location).await.unwrap();
        let gbp = Arc::new(FakeGbp::answering(results));
        let tokens = TokenManager::new(
            store.clone(),
            Arc::new(PlainCipher),
            Arc::new(FakeRefresher::granting("fresh", ChronoDuration::hours(1))),
        );
        let runner = TaskRunner::new(
            store.clone(),
            gbp.clone(),
            tokens,
            AlertSink::new(store.clone()),
            5,
        );
        Fixture {
            store,
            gbp,
            runner,
            tenant_id: tenant.id,
            location,
            connection,
        }
    }

    async fn queued_post(fx: &Fixture) -> Uuid {
        let job = testutil::publish_job(fx.tenant_id, fx.location.id, Uuid::new_v4(), JobStatus::Queued);
        fx.store.insert_publish_jobs(&[job.clone()]).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn store_failure_after_claim_raises_warning() {
        let fx = fixture(vec![Ok("posts/1".into())]).await;
        let job_id = queued_post(&fx).await;
        fx.store.break_lookup(&job_id.to_string()).await;

        let err = fx.runner.publish(job_id, 0).await.unwrap_err();

        assert!(matches!(err, TaskError::Store(_)));
        let alerts = fx.store.list_alerts(None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "task_errored");
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].entity_id, Some(job_id));
        assert_eq!(alerts[0].entity_type.as_deref(), Some("gbp_post"));
    }

    #[test]
    fn countdown_doubles_and_caps() {
        assert_eq!(retry_countdown(0), Duration::from_secs(30));
        assert_eq!(retry_countdown(1), Duration::from_secs(60));
        assert_eq!(retry_countdown(4), Duration::from_secs(480));
        assert_eq!(retry_countdown(5), Duration::from_secs(600));
        assert_eq!(retry_countdown(70), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn successful_publish_records_post_name() {
        let fx = fixture(vec![Ok("accounts/1001/locations/9/localPosts/77".into())]).await;
        let job_id = queued_post(&fx).await;

        let outcome = fx.runner.publish(job_id, 0).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed);
        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Posted);
        assert_eq!(
            job.external_post_id.as_deref(),
            Some("accounts/1001/locations/9/localPosts/77")
        );
        assert!(job.posted_at.is_some());
        assert_eq!(*fx.gbp.tokens.lock().unwrap(), vec!["access".to_string()]);
        let posts = fx.gbp.posts.lock().unwrap();
        assert_eq!(posts[0].0, fx.location.account_id);
        assert_eq!(posts[0].1, fx.location.location_id);
    }

    #[tokio::test]
    async fn available_asset_is_attached_as_media() {
        let fx = fixture(vec![]).await;
        let asset = testutil::asset(fx.tenant_id, AssetStatus::Available);
        fx.store.insert_asset(&asset).await.unwrap();
        let mut job = testutil::publish_job(fx.tenant_id, fx.location.id, Uuid::new_v4(), JobStatus::Queued);
        job.image_asset_id = Some(asset.id);
        fx.store.insert_publish_jobs(&[job.clone()]).await.unwrap();

        fx.runner.publish(job.id, 0).await.unwrap();

        let posts = fx.gbp.posts.lock().unwrap();
        assert_eq!(posts[0].2.media[0].source_url, asset.public_url);
    }

    #[tokio::test]
    async fn claimed_or_finished_jobs_are_left_alone() {
        let fx = fixture(vec![]).await;
        let job = testutil::publish_job(fx.tenant_id, fx.location.id, Uuid::new_v4(), JobStatus::Posting);
        fx.store.insert_publish_jobs(&[job.clone()]).await.unwrap();

        assert_eq!(fx.runner.publish(job.id, 0).await.unwrap(), TaskOutcome::NotClaimed);
        assert_eq!(fx.gbp.post_count(), 0);
        let stored = fx.store.get_publish_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Posting);
    }

    #[tokio::test]
    async fn rate_limit_requeues_until_budget_is_spent() {
        let fx = fixture(vec![
            Err(GbpError::Status { status: 429 }),
            Err(GbpError::Status { status: 429 }),
        ])
        .await;
        let job_id = queued_post(&fx).await;

        let first = fx.runner.publish(job_id, 0).await.unwrap();
        assert_eq!(
            first,
            TaskOutcome::RetryScheduled {
                countdown: Duration::from_secs(30)
            }
        );
        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error_message, None);

        let last = fx.runner.publish(job_id, 5).await.unwrap();
        assert_eq!(last, TaskOutcome::Failed);
        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(RATE_LIMIT_MESSAGE));
    }

    #[tokio::test]
    async fn unauthorized_expires_connection_and_alerts() {
        let fx = fixture(vec![Err(GbpError::Status { status: 401 })]).await;
        let job_id = queued_post(&fx).await;

        assert_eq!(fx.runner.publish(job_id, 0).await.unwrap(), TaskOutcome::Failed);

        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("GBP API error: 401"));
        let connection = fx.store.get_connection(fx.connection.id).await.unwrap().unwrap();
        assert_eq!(connection.status, ConnectionStatus::Expired);
        let alerts = fx.store.list_alerts(Some(fx.tenant_id)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "oauth_expired");
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn other_statuses_fail_without_retry_or_alert() {
        let fx = fixture(vec![Err(GbpError::Status { status: 503 })]).await;
        let job_id = queued_post(&fx).await;

        assert_eq!(fx.runner.publish(job_id, 0).await.unwrap(), TaskOutcome::Failed);
        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some("GBP API error: 503"));
        assert!(fx.store.list_alerts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_errors_fail_with_warning_alert() {
        let fx = fixture(vec![Err(GbpError::Request("connection reset".into()))]).await;
        let job_id = queued_post(&fx).await;

        assert_eq!(fx.runner.publish(job_id, 0).await.unwrap(), TaskOutcome::Failed);
        let job = fx.store.get_publish_job(job_id).await.unwrap().unwrap();
        assert_eq!(
            job.error_message.as_deref(),
            Some("GBP request failed: connection reset")
        );
        let alerts = fx.store.list_alerts(Some(fx.tenant_id)).await.unwrap();
        assert_eq!(alerts[0].alert_type, "gbp_post_failed");
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].entity_id, Some(job_id));
    }

    #[tokio::test]
    async fn upload_requires_available_asset() {
        let fx = fixture(vec![]).await;
        let asset = testutil::asset(fx.tenant_id, AssetStatus::Pending);
        fx.store.insert_asset(&asset).await.unwrap();
        let job = testutil::upload_job(fx.tenant_id, fx.location.id, Uuid::new_v4(), asset.id, JobStatus::Queued);
        fx.store.insert_upload_jobs(&[job.clone()]).await.unwrap();

        assert_eq!(fx.runner.upload(job.id, 0).await.unwrap(), TaskOutcome::Failed);
        let stored = fx.store.get_upload_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(ASSET_UNAVAILABLE_MESSAGE));
        assert!(fx.gbp.media.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_sends_public_url_and_category() {
        let fx = fixture(vec![Ok("accounts/1001/locations/9/media/m1".into())]).await;
        let asset = testutil::asset(fx.tenant_id, AssetStatus::Pending);
        fx.store.insert_asset(&asset).await.unwrap();
        fx.store
            .mark_asset_available(
                asset.id,
                &AssetDownload {
                    local_path: asset.local_path.clone(),
                    public_url: "http://localhost:8000/media/x.jpg".into(),
                    content_type: Some("image/jpeg".into()),
                    size_bytes: 10,
                    checksum: "abc".into(),
                },
            )
            .await
            .unwrap();
        let job = testutil::upload_job(fx.tenant_id, fx.location.id, Uuid::new_v4(), asset.id, JobStatus::Pending);
        fx.store.insert_upload_jobs(&[job.clone()]).await.unwrap();

        assert_eq!(fx.runner.upload(job.id, 0).await.unwrap(), TaskOutcome::Completed);

        let stored = fx.store.get_upload_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Uploaded);
        assert_eq!(
            stored.external_media_name.as_deref(),
            Some("accounts/1001/locations/9/media/m1")
        );
        let media = fx.gbp.media.lock().unwrap();
        assert_eq!(media[0].2.source_url, "http://localhost:8000/media/x.jpg");
        assert_eq!(media[0].2.media_format, MediaKind::Photo);
        assert_eq!(media[0].2.location_association.category, "ADDITIONAL");
    }

    #[tokio::test]
    async fn missing_location_fails_the_claimed_job() {
        let fx = fixture(vec![]).await;
        let job = testutil::publish_job(fx.tenant_id, Uuid::new_v4(), Uuid::new_v4(), JobStatus::Queued);
        fx.store.insert_publish_jobs(&[job.clone()]).await.unwrap();

        assert_eq!(fx.runner.publish(job.id, 0).await.unwrap(), TaskOutcome::Failed);
        let stored = fx.store.get_publish_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error_message.unwrap().contains("not found"));
    }
}
