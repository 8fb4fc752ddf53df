use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_ERROR_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Blog,
    Style,
    Coupon,
    Social,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Blog => "blog",
            SourceType::Style => "style",
            SourceType::Coupon => "coupon",
            SourceType::Social => "social",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "blog" => Some(SourceType::Blog),
            "style" => Some(SourceType::Style),
            "coupon" => Some(SourceType::Coupon),
            "social" => Some(SourceType::Social),
            _ => None,
        }
    }
}

/// Which job table a status transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Publish,
    Upload,
}

impl JobKind {
    pub fn in_progress(&self) -> JobStatus {
        match self {
            JobKind::Publish => JobStatus::Posting,
            JobKind::Upload => JobStatus::Uploading,
        }
    }

    pub fn succeeded(&self) -> JobStatus {
        match self {
            JobKind::Publish => JobStatus::Posted,
            JobKind::Upload => JobStatus::Uploaded,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            JobKind::Publish => "publish_jobs",
            JobKind::Upload => "upload_jobs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Posting,
    Uploading,
    Posted,
    Uploaded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Posting => "posting",
            JobStatus::Uploading => "uploading",
            JobStatus::Posted => "posted",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "posting" => Some(JobStatus::Posting),
            "uploading" => Some(JobStatus::Uploading),
            "posted" => Some(JobStatus::Posted),
            "uploaded" => Some(JobStatus::Uploaded),
            "failed" => Some(JobStatus::Failed),
            "skipped" => Some(JobStatus::Skipped),
            _ => None,
        }
    }

    /// States a worker may claim from.
    pub const CLAIMABLE: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Pending];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostKind {
    Standard,
    Offer,
    Event,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Standard => "STANDARD",
            PostKind::Offer => "OFFER",
            PostKind::Event => "EVENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "STANDARD" => Some(PostKind::Standard),
            "OFFER" => Some(PostKind::Offer),
            "EVENT" => Some(PostKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "PHOTO",
            MediaKind::Video => "VIDEO",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PHOTO" => Some(MediaKind::Photo),
            "VIDEO" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    Available,
    Failed,
    Deleted,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Available => "available",
            AssetStatus::Failed => "failed",
            AssetStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(AssetStatus::Pending),
            "available" => Some(AssetStatus::Available),
            "failed" => Some(AssetStatus::Failed),
            "deleted" => Some(AssetStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ConnectionStatus::Active),
            "expired" => Some(ConnectionStatus::Expired),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acked,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acked => "acked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(AlertStatus::Open),
            "acked" => Some(AlertStatus::Acked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub source_salon_id: Option<String>,
    pub blog_url: Option<String>,
    pub style_url: Option<String>,
    pub coupon_url: Option<String>,
}

impl Tenant {
    pub fn source_url(&self, source: SourceType) -> Option<String> {
        let (explicit, segment) = match source {
            SourceType::Blog => (self.blog_url.as_ref(), "blog"),
            SourceType::Style => (self.style_url.as_ref(), "style"),
            SourceType::Coupon => (self.coupon_url.as_ref(), "coupon"),
            SourceType::Social => return None,
        };
        if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
            return Some(url.clone());
        }
        self.source_salon_id
            .as_ref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| format!("https://beauty.hotpepper.jp/slnH{id}/{segment}/"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub social_account_id: Option<Uuid>,
    pub title: Option<String>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub image_urls: Vec<String>,
    pub source_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(tenant_id: Uuid, source_type: SourceType, source_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            source_type,
            source_id: source_id.into(),
            social_account_id: None,
            title: None,
            body_html: None,
            body_text: None,
            image_urls: Vec::new(),
            source_url: None,
            published_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub connection_id: Uuid,
    pub account_id: String,
    pub location_id: String,
    pub display_name: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub access_token_enc: String,
    #[serde(skip_serializing)]
    pub refresh_token_enc: String,
    pub token_expires_at: DateTime<Utc>,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_user_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub access_token_enc: String,
    pub token_expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub sync_hashtags: bool,
}

/// A GBP local post waiting for (or past) publication to one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub content_id: Uuid,
    pub location_id: Uuid,
    pub kind: PostKind,
    pub summary_generated: String,
    pub summary_final: String,
    pub image_asset_id: Option<Uuid>,
    pub cta_type: Option<String>,
    pub cta_url: Option<String>,
    pub offer_redeem_url: Option<String>,
    pub event_title: Option<String>,
    pub event_start_date: Option<NaiveDate>,
    pub event_end_date: Option<NaiveDate>,
    pub external_post_id: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub content_id: Uuid,
    pub location_id: Uuid,
    pub asset_id: Uuid,
    pub media_kind: MediaKind,
    pub category: String,
    pub source_image_url: String,
    pub external_media_name: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub origin_url: String,
    pub local_path: String,
    pub public_url: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub status: AssetStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub severity: Severity,
    pub alert_type: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLog {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub job_type: String,
    pub status: RunStatus,
    pub items_found: i32,
    pub items_processed: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Cuts an error message to the persisted bound on a char boundary.
pub fn bounded_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_derives_source_urls_from_salon_id() {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: "Salon".into(),
            is_active: true,
            source_salon_id: Some("000123".into()),
            blog_url: Some("https://example.com/custom-blog/".into()),
            style_url: None,
            coupon_url: Some("   ".into()),
        };
        assert_eq!(
            tenant.source_url(SourceType::Blog).as_deref(),
            Some("https://example.com/custom-blog/")
        );
        assert_eq!(
            tenant.source_url(SourceType::Style).as_deref(),
            Some("https://beauty.hotpepper.jp/slnH000123/style/")
        );
        assert_eq!(
            tenant.source_url(SourceType::Coupon).as_deref(),
            Some("https://beauty.hotpepper.jp/slnH000123/coupon/")
        );
        assert!(tenant.source_url(SourceType::Social).is_none());
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Posting,
            JobStatus::Uploading,
            JobStatus::Posted,
            JobStatus::Uploaded,
            JobStatus::Failed,
            JobStatus::Skipped,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("posting "), None);
    }

    #[test]
    fn bounded_error_respects_char_boundaries() {
        let long = "エ".repeat(MAX_ERROR_LEN + 10);
        let bounded = bounded_error(&long);
        assert_eq!(bounded.chars().count(), MAX_ERROR_LEN);
    }
}
