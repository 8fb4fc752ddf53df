//! Turns one ingested content item into one pending job per active location.

use crate::{
    models::{ContentItem, JobStatus, Location, MediaKind, PostKind, PublishJob, UploadJob},
    store::{Store, StoreError},
};
use chrono::{NaiveDate, Utc};
use tracing::debug;
use uuid::Uuid;

/// Location-independent part of a publish job.
#[derive(Debug, Clone)]
pub struct PublishDraft {
    pub kind: PostKind,
    pub summary: String,
    pub image_asset_id: Option<Uuid>,
    pub cta_type: Option<String>,
    pub cta_url: Option<String>,
    pub offer_redeem_url: Option<String>,
    pub event_title: Option<String>,
    pub event_start_date: Option<NaiveDate>,
    pub event_end_date: Option<NaiveDate>,
}

impl PublishDraft {
    pub fn standard(summary: String, cta_url: Option<String>, image_asset_id: Option<Uuid>) -> Self {
        Self {
            kind: PostKind::Standard,
            summary,
            image_asset_id,
            cta_type: cta_url.as_ref().map(|_| "LEARN_MORE".to_string()),
            cta_url,
            offer_redeem_url: None,
            event_title: None,
            event_start_date: None,
            event_end_date: None,
        }
    }

    fn job_for(&self, content: &ContentItem, location: &Location) -> PublishJob {
        PublishJob {
            id: Uuid::new_v4(),
            tenant_id: content.tenant_id,
            content_id: content.id,
            location_id: location.id,
            kind: self.kind,
            summary_generated: self.summary.clone(),
            summary_final: self.summary.clone(),
            image_asset_id: self.image_asset_id,
            cta_type: self.cta_type.clone(),
            cta_url: self.cta_url.clone(),
            offer_redeem_url: self.offer_redeem_url.clone(),
            event_title: self.event_title.clone(),
            event_start_date: self.event_start_date,
            event_end_date: self.event_end_date,
            external_post_id: None,
            status: JobStatus::Pending,
            error_message: None,
            posted_at: None,
            edited_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadDraft {
    pub asset_id: Uuid,
    pub media_kind: MediaKind,
    pub category: String,
    pub source_image_url: String,
}

impl UploadDraft {
    fn job_for(&self, content: &ContentItem, location: &Location) -> UploadJob {
        UploadJob {
            id: Uuid::new_v4(),
            tenant_id: content.tenant_id,
            content_id: content.id,
            location_id: location.id,
            asset_id: self.asset_id,
            media_kind: self.media_kind,
            category: self.category.clone(),
            source_image_url: self.source_image_url.clone(),
            external_media_name: None,
            status: JobStatus::Pending,
            error_message: None,
            uploaded_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Creates a pending publish job for every location that has none yet for
/// this content and kind. Returns only the jobs created by this call.
pub async fn fan_out_publish(
    store: &dyn Store,
    content: &ContentItem,
    locations: &[Location],
    draft: &PublishDraft,
) -> Result<Vec<PublishJob>, StoreError> {
    let mut candidates = Vec::with_capacity(locations.len());
    for location in locations {
        if store
            .publish_job_exists(content.tenant_id, location.id, content.id, draft.kind)
            .await?
        {
            continue;
        }
        candidates.push(draft.job_for(content, location));
    }
    let inserted = store.insert_publish_jobs(&candidates).await?;
    candidates.retain(|job| inserted.contains(&job.id));
    debug!(
        target = "salon_gbp.ingest",
        content_id = %content.id,
        created = candidates.len(),
        locations = locations.len(),
        "publish_fan_out"
    );
    Ok(candidates)
}

pub async fn fan_out_upload(
    store: &dyn Store,
    content: &ContentItem,
    locations: &[Location],
    draft: &UploadDraft,
) -> Result<Vec<UploadJob>, StoreError> {
    let mut candidates = Vec::with_capacity(locations.len());
    for location in locations {
        if store
            .upload_job_exists(content.tenant_id, location.id, content.id, draft.asset_id)
            .await?
        {
            continue;
        }
        candidates.push(draft.job_for(content, location));
    }
    let inserted = store.insert_upload_jobs(&candidates).await?;
    candidates.retain(|job| inserted.contains(&job.id));
    debug!(
        target = "salon_gbp.ingest",
        content_id = %content.id,
        created = candidates.len(),
        locations = locations.len(),
        "upload_fan_out"
    );
    Ok(candidates)
}
