//! Data access. Every invariant the pipeline relies on (dedup keys, job
//! uniqueness, single active location, claim CAS) is enforced here so both
//! backends behave the same.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{
    Alert, Connection, ConnectionStatus, ContentItem, JobKind, JobLog, JobStatus, Location,
    MediaAsset, PostKind, PublishJob, RunStatus, SocialAccount, SourceType, Tenant, UploadJob,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("unexpected value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

/// Result of a finished media download, written back onto the asset row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDownload {
    pub local_path: String,
    pub public_url: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;
    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn active_tenants(&self) -> Result<Vec<Tenant>, StoreError>;

    async fn content_exists(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, StoreError>;
    /// `false` when the (tenant, source type, source id) key is already taken.
    async fn insert_content(&self, item: &ContentItem) -> Result<bool, StoreError>;
    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError>;

    async fn get_connection(&self, id: Uuid) -> Result<Option<Connection>, StoreError>;
    /// Keyed by email; an existing row keeps its id and gets the new tokens.
    async fn upsert_connection(&self, connection: &Connection) -> Result<Connection, StoreError>;
    async fn update_connection_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn set_connection_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
    ) -> Result<(), StoreError>;

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, StoreError>;
    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError>;
    async fn active_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError>;
    /// Keyed by (tenant, external location id); an existing row keeps its id
    /// and active flag.
    async fn upsert_location(&self, location: &Location) -> Result<Location, StoreError>;
    /// Deactivates every other location of the tenant in the same transaction.
    async fn activate_location(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
    ) -> Result<Location, StoreError>;

    /// Keyed by (tenant, external user id); an existing row keeps its id and
    /// `sync_hashtags` flag.
    async fn upsert_social_account(
        &self,
        account: &SocialAccount,
    ) -> Result<SocialAccount, StoreError>;
    async fn active_social_accounts(&self) -> Result<Vec<SocialAccount>, StoreError>;
    async fn update_social_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn publish_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        kind: PostKind,
    ) -> Result<bool, StoreError>;
    async fn upload_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        asset_id: Uuid,
    ) -> Result<bool, StoreError>;
    /// Inserts in one transaction; rows whose uniqueness key is taken are
    /// skipped. Returns the ids actually inserted.
    async fn insert_publish_jobs(&self, jobs: &[PublishJob]) -> Result<Vec<Uuid>, StoreError>;
    async fn insert_upload_jobs(&self, jobs: &[UploadJob]) -> Result<Vec<Uuid>, StoreError>;
    async fn get_publish_job(&self, id: Uuid) -> Result<Option<PublishJob>, StoreError>;
    async fn get_upload_job(&self, id: Uuid) -> Result<Option<UploadJob>, StoreError>;
    async fn list_publish_jobs(&self, tenant_id: Uuid) -> Result<Vec<PublishJob>, StoreError>;
    async fn list_upload_jobs(&self, tenant_id: Uuid) -> Result<Vec<UploadJob>, StoreError>;
    /// Persists the human-editable fields and `edited_at`.
    async fn save_publish_edits(&self, job: &PublishJob) -> Result<(), StoreError>;

    /// Compare-and-swap on job status: moves the row to `to` only while its
    /// status is one of `from`. Returns the number of rows changed (0 or 1).
    async fn transition_job(
        &self,
        kind: JobKind,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<u64, StoreError>;
    async fn clear_job_error(&self, kind: JobKind, id: Uuid) -> Result<(), StoreError>;
    async fn complete_publish_job(
        &self,
        id: Uuid,
        external_post_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn complete_upload_job(
        &self,
        id: Uuid,
        external_media_name: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn fail_job(&self, kind: JobKind, id: Uuid, message: &str) -> Result<(), StoreError>;

    async fn is_seeded(&self, tenant_id: Uuid, source_type: SourceType) -> Result<bool, StoreError>;
    /// Idempotent; `true` only for the call that created the marker.
    async fn mark_seeded(&self, tenant_id: Uuid, source_type: SourceType)
    -> Result<bool, StoreError>;

    async fn insert_asset(&self, asset: &MediaAsset) -> Result<(), StoreError>;
    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>, StoreError>;
    async fn mark_asset_available(
        &self,
        id: Uuid,
        download: &AssetDownload,
    ) -> Result<(), StoreError>;
    async fn mark_asset_failed(&self, id: Uuid, message: &str) -> Result<(), StoreError>;
    /// Available assets created before `cutoff`.
    async fn expired_assets(&self, cutoff: DateTime<Utc>) -> Result<Vec<MediaAsset>, StoreError>;
    async fn mark_asset_deleted(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError>;
    /// `false` when no open alert with this id belongs to the tenant.
    async fn acknowledge_alert(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    async fn start_job_log(&self, log: &JobLog) -> Result<(), StoreError>;
    async fn finish_job_log(
        &self,
        id: Uuid,
        status: RunStatus,
        items_found: i32,
        items_processed: i32,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;
}
