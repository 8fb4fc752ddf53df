//! Human approval gate. Every transition here is precondition-checked and
//! then applied with the store's status CAS, so two operators approving the
//! same job cannot both enqueue it.

use crate::{
    models::{JobKind, JobStatus, PostKind, PublishJob, UploadJob},
    store::{Store, StoreError},
    text::{MAX_EVENT_TITLE_LEN, MAX_SUMMARY_LEN},
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

const CTA_TYPES: [&str; 6] = ["BOOK", "ORDER", "SHOP", "LEARN_MORE", "SIGN_UP", "CALL"];

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// OFFER posts need a title, a start and an end date, ordered, with the title
/// within the event title limit.
pub fn validate_offer(job: &PublishJob) -> Result<(), ApprovalError> {
    if job.kind != PostKind::Offer {
        return Ok(());
    }
    let title = job
        .event_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApprovalError::Validation("OFFER requires event_title".into()))?;
    if title.chars().count() > MAX_EVENT_TITLE_LEN {
        return Err(ApprovalError::Validation(format!(
            "event_title must be at most {MAX_EVENT_TITLE_LEN} characters"
        )));
    }
    let (Some(start), Some(end)) = (job.event_start_date, job.event_end_date) else {
        return Err(ApprovalError::Validation(
            "OFFER requires event_start_date and event_end_date".into(),
        ));
    };
    check_date_order(start, end)
}

fn check_date_order(start: NaiveDate, end: NaiveDate) -> Result<(), ApprovalError> {
    if start > end {
        return Err(ApprovalError::Validation(
            "event_start_date must not be after event_end_date".into(),
        ));
    }
    Ok(())
}

/// Editable fields of a publish job. Absent fields keep their value.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PostEdit {
    pub summary_final: Option<String>,
    pub image_asset_id: Option<Uuid>,
    pub cta_type: Option<String>,
    pub cta_url: Option<String>,
    pub offer_redeem_url: Option<String>,
    pub event_title: Option<String>,
    pub event_start_date: Option<NaiveDate>,
    pub event_end_date: Option<NaiveDate>,
}

impl PostEdit {
    fn apply(self, job: &mut PublishJob) -> Result<(), ApprovalError> {
        if let Some(summary) = self.summary_final {
            let summary = summary.trim().to_string();
            if summary.is_empty() {
                return Err(ApprovalError::Validation("summary_final is empty".into()));
            }
            if summary.chars().count() > MAX_SUMMARY_LEN {
                return Err(ApprovalError::Validation(format!(
                    "summary_final must be at most {MAX_SUMMARY_LEN} characters"
                )));
            }
            job.summary_final = summary;
        }
        if let Some(cta_type) = self.cta_type {
            let cta_type = cta_type.trim().to_ascii_uppercase();
            if !CTA_TYPES.contains(&cta_type.as_str()) {
                return Err(ApprovalError::Validation(format!(
                    "unsupported cta_type {cta_type}"
                )));
            }
            job.cta_type = Some(cta_type);
        }
        if let Some(title) = self.event_title {
            if title.chars().count() > MAX_EVENT_TITLE_LEN {
                return Err(ApprovalError::Validation(format!(
                    "event_title must be at most {MAX_EVENT_TITLE_LEN} characters"
                )));
            }
            job.event_title = Some(title);
        }
        if self.image_asset_id.is_some() {
            job.image_asset_id = self.image_asset_id;
        }
        if self.cta_url.is_some() {
            job.cta_url = self.cta_url;
        }
        if self.offer_redeem_url.is_some() {
            job.offer_redeem_url = self.offer_redeem_url;
        }
        if self.event_start_date.is_some() {
            job.event_start_date = self.event_start_date;
        }
        if self.event_end_date.is_some() {
            job.event_end_date = self.event_end_date;
        }
        if let (Some(start), Some(end)) = (job.event_start_date, job.event_end_date) {
            check_date_order(start, end)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ApprovalGate {
    store: Arc<dyn Store>,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn publish_job(&self, tenant_id: Uuid, id: Uuid) -> Result<PublishJob, ApprovalError> {
        self.store
            .get_publish_job(id)
            .await?
            .filter(|job| job.tenant_id == tenant_id)
            .ok_or(ApprovalError::NotFound {
                entity: "publish job",
                id,
            })
    }

    async fn upload_job(&self, tenant_id: Uuid, id: Uuid) -> Result<UploadJob, ApprovalError> {
        self.store
            .get_upload_job(id)
            .await?
            .filter(|job| job.tenant_id == tenant_id)
            .ok_or(ApprovalError::NotFound {
                entity: "upload job",
                id,
            })
    }

    async fn enqueue(&self, kind: JobKind, id: Uuid, from: JobStatus) -> Result<(), ApprovalError> {
        let changed = self
            .store
            .transition_job(kind, id, &[from], JobStatus::Queued)
            .await?;
        if changed == 0 {
            return Err(ApprovalError::Conflict("job status changed concurrently"));
        }
        self.store.clear_job_error(kind, id).await?;
        info!(
            target = "salon_gbp.api",
            job_id = %id,
            kind = ?kind,
            from = from.as_str(),
            "job_queued"
        );
        Ok(())
    }

    async fn skip(&self, kind: JobKind, id: Uuid, current: JobStatus) -> Result<(), ApprovalError> {
        if current == kind.succeeded() {
            return Err(ApprovalError::Conflict(match kind {
                JobKind::Publish => "job already posted",
                JobKind::Upload => "job already uploaded",
            }));
        }
        let from = [
            JobStatus::Pending,
            JobStatus::Queued,
            kind.in_progress(),
            JobStatus::Failed,
            JobStatus::Skipped,
        ];
        let changed = self
            .store
            .transition_job(kind, id, &from, JobStatus::Skipped)
            .await?;
        if changed == 0 {
            return Err(ApprovalError::Conflict("job status changed concurrently"));
        }
        info!(target = "salon_gbp.api", job_id = %id, kind = ?kind, "job_skipped");
        Ok(())
    }

    pub async fn approve_post(&self, tenant_id: Uuid, id: Uuid) -> Result<PublishJob, ApprovalError> {
        let job = self.publish_job(tenant_id, id).await?;
        if job.status != JobStatus::Pending {
            return Err(ApprovalError::Conflict("job is not pending"));
        }
        validate_offer(&job)?;
        self.enqueue(JobKind::Publish, id, JobStatus::Pending).await?;
        self.publish_job(tenant_id, id).await
    }

    pub async fn retry_post(&self, tenant_id: Uuid, id: Uuid) -> Result<PublishJob, ApprovalError> {
        let job = self.publish_job(tenant_id, id).await?;
        if job.status != JobStatus::Failed {
            return Err(ApprovalError::Conflict("job is not failed"));
        }
        validate_offer(&job)?;
        self.enqueue(JobKind::Publish, id, JobStatus::Failed).await?;
        self.publish_job(tenant_id, id).await
    }

    pub async fn skip_post(&self, tenant_id: Uuid, id: Uuid) -> Result<PublishJob, ApprovalError> {
        let job = self.publish_job(tenant_id, id).await?;
        self.skip(JobKind::Publish, id, job.status).await?;
        self.publish_job(tenant_id, id).await
    }

    pub async fn edit_post(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        edit: PostEdit,
    ) -> Result<PublishJob, ApprovalError> {
        let mut job = self.publish_job(tenant_id, id).await?;
        match job.status {
            JobStatus::Posted => return Err(ApprovalError::Conflict("job already posted")),
            JobStatus::Posting => return Err(ApprovalError::Conflict("job is being posted")),
            _ => {}
        }
        if let Some(asset_id) = edit.image_asset_id {
            let owned = self
                .store
                .get_asset(asset_id)
                .await?
                .is_some_and(|asset| asset.tenant_id == tenant_id);
            if !owned {
                return Err(ApprovalError::NotFound {
                    entity: "media asset",
                    id: asset_id,
                });
            }
        }
        edit.apply(&mut job)?;
        job.edited_at = Some(Utc::now());
        self.store.save_publish_edits(&job).await?;
        info!(target = "salon_gbp.api", job_id = %id, "publish_job_edited");
        Ok(job)
    }

    pub async fn approve_upload(&self, tenant_id: Uuid, id: Uuid) -> Result<UploadJob, ApprovalError> {
        let job = self.upload_job(tenant_id, id).await?;
        if job.status != JobStatus::Pending {
            return Err(ApprovalError::Conflict("job is not pending"));
        }
        self.enqueue(JobKind::Upload, id, JobStatus::Pending).await?;
        self.upload_job(tenant_id, id).await
    }

    pub async fn retry_upload(&self, tenant_id: Uuid, id: Uuid) -> Result<UploadJob, ApprovalError> {
        let job = self.upload_job(tenant_id, id).await?;
        if job.status != JobStatus::Failed {
            return Err(ApprovalError::Conflict("job is not failed"));
        }
        self.enqueue(JobKind::Upload, id, JobStatus::Failed).await?;
        self.upload_job(tenant_id, id).await
    }

    pub async fn skip_upload(&self, tenant_id: Uuid, id: Uuid) -> Result<UploadJob, ApprovalError> {
        let job = self.upload_job(tenant_id, id).await?;
        self.skip(JobKind::Upload, id, job.status).await?;
        self.upload_job(tenant_id, id).await
    }
}
