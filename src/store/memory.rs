use crate::{
    models::{
        Alert, AlertStatus, AssetStatus, Connection, ConnectionStatus, ContentItem, JobKind, JobLog,
        JobStatus, Location, MediaAsset, PostKind, PublishJob, RunStatus, SocialAccount,
        SourceType, Tenant, UploadJob, bounded_error,
    },
    store::{AssetDownload, Store, StoreError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Mutex-guarded maps with the same uniqueness and CAS rules as Postgres.
/// Backs demo mode and unit tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    content: HashMap<Uuid, ContentItem>,
    connections: HashMap<Uuid, Connection>,
    locations: HashMap<Uuid, Location>,
    social: HashMap<Uuid, SocialAccount>,
    publish: HashMap<Uuid, PublishJob>,
    upload: HashMap<Uuid, UploadJob>,
    seeds: HashSet<(Uuid, SourceType)>,
    assets: HashMap<Uuid, MediaAsset>,
    alerts: Vec<Alert>,
    job_logs: HashMap<Uuid, JobLog>,
    #[cfg(test)]
    broken_lookups: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_logs(&self) -> Vec<JobLog> {
        let guard = self.inner.lock().await;
        let mut logs: Vec<JobLog> = guard.job_logs.values().cloned().collect();
        logs.sort_by_key(|log| log.started_at);
        logs
    }

    /// Makes lookups keyed by `key` fail: `content_exists` by source id,
    /// job reads by job id.
    #[cfg(test)]
    pub async fn break_lookup(&self, key: &str) {
        self.inner.lock().await.broken_lookups.insert(key.to_string());
    }
}

fn not_found(entity: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { entity, id }
}

fn sorted_by_created<T: Clone>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut out: Vec<T> = items.collect();
    out.sort_by_key(|item| key(item));
    out
}

impl Inner {
    #[cfg(test)]
    fn check_lookup(&self, column: &'static str, key: &str) -> Result<(), StoreError> {
        if self.broken_lookups.contains(key) {
            return Err(StoreError::Corrupt {
                column,
                value: key.to_string(),
            });
        }
        Ok(())
    }

    fn set_job_status(&mut self, kind: JobKind, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        match kind {
            JobKind::Publish => {
                let job = self.publish.get_mut(&id).ok_or(not_found("publish job", id))?;
                job.status = status;
            }
            JobKind::Upload => {
                let job = self.upload.get_mut(&id).ok_or(not_found("upload job", id))?;
                job.status = status;
            }
        }
        Ok(())
    }

    fn job_status(&self, kind: JobKind, id: Uuid) -> Option<JobStatus> {
        match kind {
            JobKind::Publish => self.publish.get(&id).map(|job| job.status),
            JobKind::Upload => self.upload.get(&id).map(|job| job.status),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .tenants
            .insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.inner.lock().await.tenants.get(&id).cloned())
    }

    async fn active_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let guard = self.inner.lock().await;
        let mut tenants: Vec<Tenant> = guard
            .tenants
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect();
        tenants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tenants)
    }

    async fn content_exists(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, StoreError> {
        let guard = self.inner.lock().await;
        #[cfg(test)]
        guard.check_lookup("source_id", source_id)?;
        Ok(guard.content.values().any(|c| {
            c.tenant_id == tenant_id && c.source_type == source_type && c.source_id == source_id
        }))
    }

    async fn insert_content(&self, item: &ContentItem) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock().await;
        let taken = guard.content.values().any(|c| {
            c.tenant_id == item.tenant_id
                && c.source_type == item.source_type
                && c.source_id == item.source_id
        });
        if taken {
            return Ok(false);
        }
        guard.content.insert(item.id, item.clone());
        Ok(true)
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.inner.lock().await.content.get(&id).cloned())
    }

    async fn get_connection(&self, id: Uuid) -> Result<Option<Connection>, StoreError> {
        Ok(self.inner.lock().await.connections.get(&id).cloned())
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<Connection, StoreError> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard
            .connections
            .values_mut()
            .find(|c| c.email == connection.email)
        {
            existing.access_token_enc = connection.access_token_enc.clone();
            existing.refresh_token_enc = connection.refresh_token_enc.clone();
            existing.token_expires_at = connection.token_expires_at;
            existing.status = connection.status;
            return Ok(existing.clone());
        }
        guard.connections.insert(connection.id, connection.clone());
        Ok(connection.clone())
    }

    async fn update_connection_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let conn = guard
            .connections
            .get_mut(&id)
            .ok_or(not_found("connection", id))?;
        conn.access_token_enc = access_token_enc.to_string();
        conn.token_expires_at = expires_at;
        conn.status = ConnectionStatus::Active;
        Ok(())
    }

    async fn set_connection_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let conn = guard
            .connections
            .get_mut(&id)
            .ok_or(not_found("connection", id))?;
        conn.status = status;
        Ok(())
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, StoreError> {
        Ok(self.inner.lock().await.locations.get(&id).cloned())
    }

    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError> {
        let guard = self.inner.lock().await;
        let mut out: Vec<Location> = guard
            .locations
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.location_id.cmp(&b.location_id));
        Ok(out)
    }

    async fn active_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError> {
        Ok(self
            .list_locations(tenant_id)
            .await?
            .into_iter()
            .filter(|l| l.is_active)
            .collect())
    }

    async fn upsert_location(&self, location: &Location) -> Result<Location, StoreError> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.locations.values_mut().find(|l| {
            l.tenant_id == location.tenant_id && l.location_id == location.location_id
        }) {
            existing.account_id = location.account_id.clone();
            existing.connection_id = location.connection_id;
            existing.display_name = location.display_name.clone();
            return Ok(existing.clone());
        }
        guard.locations.insert(location.id, location.clone());
        Ok(location.clone())
    }

    async fn activate_location(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
    ) -> Result<Location, StoreError> {
        let mut guard = self.inner.lock().await;
        match guard.locations.get(&location_id) {
            Some(location) if location.tenant_id == tenant_id => {}
            _ => return Err(not_found("location", location_id)),
        }
        for location in guard.locations.values_mut() {
            if location.tenant_id == tenant_id {
                location.is_active = location.id == location_id;
            }
        }
        guard
            .locations
            .get(&location_id)
            .cloned()
            .ok_or(not_found("location", location_id))
    }

    async fn upsert_social_account(
        &self,
        account: &SocialAccount,
    ) -> Result<SocialAccount, StoreError> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.social.values_mut().find(|a| {
            a.tenant_id == account.tenant_id && a.external_user_id == account.external_user_id
        }) {
            existing.username = account.username.clone();
            existing.access_token_enc = account.access_token_enc.clone();
            existing.token_expires_at = account.token_expires_at;
            existing.is_active = account.is_active;
            return Ok(existing.clone());
        }
        guard.social.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn active_social_accounts(&self) -> Result<Vec<SocialAccount>, StoreError> {
        let guard = self.inner.lock().await;
        let mut out: Vec<SocialAccount> = guard
            .social
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(out)
    }

    async fn update_social_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let account = guard
            .social
            .get_mut(&id)
            .ok_or(not_found("social account", id))?;
        account.access_token_enc = access_token_enc.to_string();
        account.token_expires_at = expires_at;
        Ok(())
    }

    async fn publish_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        kind: PostKind,
    ) -> Result<bool, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.publish.values().any(|j| {
            j.tenant_id == tenant_id
                && j.location_id == location_id
                && j.content_id == content_id
                && j.kind == kind
        }))
    }

    async fn upload_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        asset_id: Uuid,
    ) -> Result<bool, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.upload.values().any(|j| {
            j.tenant_id == tenant_id
                && j.location_id == location_id
                && j.content_id == content_id
                && j.asset_id == asset_id
        }))
    }

    async fn insert_publish_jobs(&self, jobs: &[PublishJob]) -> Result<Vec<Uuid>, StoreError> {
        let mut guard = self.inner.lock().await;
        let mut inserted = Vec::new();
        for job in jobs {
            let taken = guard.publish.values().any(|j| {
                j.tenant_id == job.tenant_id
                    && j.location_id == job.location_id
                    && j.content_id == job.content_id
                    && j.kind == job.kind
            });
            if !taken {
                guard.publish.insert(job.id, job.clone());
                inserted.push(job.id);
            }
        }
        Ok(inserted)
    }

    async fn insert_upload_jobs(&self, jobs: &[UploadJob]) -> Result<Vec<Uuid>, StoreError> {
        let mut guard = self.inner.lock().await;
        let mut inserted = Vec::new();
        for job in jobs {
            let taken = guard.upload.values().any(|j| {
                j.tenant_id == job.tenant_id
                    && j.location_id == job.location_id
                    && j.content_id == job.content_id
                    && j.asset_id == job.asset_id
            });
            if !taken {
                guard.upload.insert(job.id, job.clone());
                inserted.push(job.id);
            }
        }
        Ok(inserted)
    }

    async fn get_publish_job(&self, id: Uuid) -> Result<Option<PublishJob>, StoreError> {
        let guard = self.inner.lock().await;
        #[cfg(test)]
        guard.check_lookup("id", &id.to_string())?;
        Ok(guard.publish.get(&id).cloned())
    }

    async fn get_upload_job(&self, id: Uuid) -> Result<Option<UploadJob>, StoreError> {
        let guard = self.inner.lock().await;
        #[cfg(test)]
        guard.check_lookup("id", &id.to_string())?;
        Ok(guard.upload.get(&id).cloned())
    }

    async fn list_publish_jobs(&self, tenant_id: Uuid) -> Result<Vec<PublishJob>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(sorted_by_created(
            guard
                .publish
                .values()
                .filter(|j| j.tenant_id == tenant_id)
                .cloned(),
            |j| j.created_at,
        ))
    }

    async fn list_upload_jobs(&self, tenant_id: Uuid) -> Result<Vec<UploadJob>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(sorted_by_created(
            guard
                .upload
                .values()
                .filter(|j| j.tenant_id == tenant_id)
                .cloned(),
            |j| j.created_at,
        ))
    }

    async fn save_publish_edits(&self, job: &PublishJob) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let stored = guard
            .publish
            .get_mut(&job.id)
            .ok_or(not_found("publish job", job.id))?;
        stored.summary_final = job.summary_final.clone();
        stored.image_asset_id = job.image_asset_id;
        stored.cta_type = job.cta_type.clone();
        stored.cta_url = job.cta_url.clone();
        stored.offer_redeem_url = job.offer_redeem_url.clone();
        stored.event_title = job.event_title.clone();
        stored.event_start_date = job.event_start_date;
        stored.event_end_date = job.event_end_date;
        stored.edited_at = job.edited_at;
        Ok(())
    }

    async fn transition_job(
        &self,
        kind: JobKind,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.lock().await;
        match guard.job_status(kind, id) {
            Some(current) if from.contains(&current) => {
                guard.set_job_status(kind, id, to)?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn clear_job_error(&self, kind: JobKind, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        match kind {
            JobKind::Publish => {
                if let Some(job) = guard.publish.get_mut(&id) {
                    job.error_message = None;
                }
            }
            JobKind::Upload => {
                if let Some(job) = guard.upload.get_mut(&id) {
                    job.error_message = None;
                }
            }
        }
        Ok(())
    }

    async fn complete_publish_job(
        &self,
        id: Uuid,
        external_post_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let job = guard
            .publish
            .get_mut(&id)
            .ok_or(not_found("publish job", id))?;
        job.external_post_id = Some(external_post_id.to_string());
        job.status = JobStatus::Posted;
        job.posted_at = Some(posted_at);
        job.error_message = None;
        Ok(())
    }

    async fn complete_upload_job(
        &self,
        id: Uuid,
        external_media_name: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let job = guard
            .upload
            .get_mut(&id)
            .ok_or(not_found("upload job", id))?;
        job.external_media_name = Some(external_media_name.to_string());
        job.status = JobStatus::Uploaded;
        job.uploaded_at = Some(uploaded_at);
        job.error_message = None;
        Ok(())
    }

    async fn fail_job(&self, kind: JobKind, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let message = Some(bounded_error(message));
        match kind {
            JobKind::Publish => {
                let job = guard
                    .publish
                    .get_mut(&id)
                    .ok_or(not_found("publish job", id))?;
                job.status = JobStatus::Failed;
                job.error_message = message;
            }
            JobKind::Upload => {
                let job = guard
                    .upload
                    .get_mut(&id)
                    .ok_or(not_found("upload job", id))?;
                job.status = JobStatus::Failed;
                job.error_message = message;
            }
        }
        Ok(())
    }

    async fn is_seeded(&self, tenant_id: Uuid, source_type: SourceType) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .seeds
            .contains(&(tenant_id, source_type)))
    }

    async fn mark_seeded(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .seeds
            .insert((tenant_id, source_type)))
    }

    async fn insert_asset(&self, asset: &MediaAsset) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .assets
            .insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>, StoreError> {
        Ok(self.inner.lock().await.assets.get(&id).cloned())
    }

    async fn mark_asset_available(
        &self,
        id: Uuid,
        download: &AssetDownload,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let asset = guard.assets.get_mut(&id).ok_or(not_found("asset", id))?;
        asset.local_path = download.local_path.clone();
        asset.public_url = download.public_url.clone();
        asset.content_type = download.content_type.clone();
        asset.size_bytes = Some(download.size_bytes);
        asset.checksum = Some(download.checksum.clone());
        asset.status = AssetStatus::Available;
        asset.error_message = None;
        Ok(())
    }

    async fn mark_asset_failed(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let asset = guard.assets.get_mut(&id).ok_or(not_found("asset", id))?;
        asset.status = AssetStatus::Failed;
        asset.error_message = Some(bounded_error(message));
        Ok(())
    }

    async fn expired_assets(&self, cutoff: DateTime<Utc>) -> Result<Vec<MediaAsset>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(sorted_by_created(
            guard
                .assets
                .values()
                .filter(|a| a.status == AssetStatus::Available && a.created_at < cutoff)
                .cloned(),
            |a| a.created_at,
        ))
    }

    async fn mark_asset_deleted(&self, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let asset = guard.assets.get_mut(&id).ok_or(not_found("asset", id))?;
        asset.status = AssetStatus::Deleted;
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.inner.lock().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn list_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .alerts
            .iter()
            .rev()
            .filter(|a| tenant_id.is_none() || a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn acknowledge_alert(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock().await;
        let alert = guard.alerts.iter_mut().find(|a| {
            a.id == id && a.tenant_id == Some(tenant_id) && a.status == AlertStatus::Open
        });
        Ok(match alert {
            Some(alert) => {
                alert.status = AlertStatus::Acked;
                true
            }
            None => false,
        })
    }

    async fn start_job_log(&self, log: &JobLog) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .job_logs
            .insert(log.id, log.clone());
        Ok(())
    }

    async fn finish_job_log(
        &self,
        id: Uuid,
        status: RunStatus,
        items_found: i32,
        items_processed: i32,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let log = guard.job_logs.get_mut(&id).ok_or(not_found("job log", id))?;
        log.status = status;
        log.items_found = items_found;
        log.items_processed = items_processed;
        log.error_message = error_message.map(bounded_error);
        log.completed_at = Some(Utc::now());
        Ok(())
    }
}
