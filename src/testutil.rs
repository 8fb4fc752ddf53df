//! Shared fixtures for unit tests.

use crate::models::{
    AssetStatus, Connection, ConnectionStatus, ContentItem, JobStatus, Location, MediaAsset,
    MediaKind, PostKind, PublishJob, SourceType, Tenant, UploadJob,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

pub fn tenant() -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "Salon Lumière".into(),
        is_active: true,
        source_salon_id: Some("000123".into()),
        blog_url: Some("https://beauty.example.jp/slnH000123/blog/".into()),
        style_url: Some("https://beauty.example.jp/slnH000123/style/".into()),
        coupon_url: Some("https://beauty.example.jp/slnH000123/coupon/".into()),
    }
}

pub fn connection(expires_in: Duration) -> Connection {
    Connection {
        id: Uuid::new_v4(),
        email: format!("owner-{}@example.com", Uuid::new_v4().simple()),
        access_token_enc: "enc:access".into(),
        refresh_token_enc: "enc:refresh".into(),
        token_expires_at: Utc::now() + expires_in,
        status: ConnectionStatus::Active,
    }
}

pub fn location(tenant_id: Uuid, is_active: bool) -> Location {
    let external = Uuid::new_v4().simple().to_string();
    Location {
        id: Uuid::new_v4(),
        tenant_id,
        connection_id: Uuid::new_v4(),
        account_id: "1001".into(),
        location_id: external,
        display_name: Some("Lumière Shibuya".into()),
        is_active,
    }
}

pub fn content(tenant_id: Uuid, source_type: SourceType, source_id: &str) -> ContentItem {
    let mut item = ContentItem::new(tenant_id, source_type, source_id);
    item.title = Some("Spring colors".into());
    item.source_url = Some("https://beauty.example.jp/slnH000123/blog/bidA1.html".into());
    item
}

pub fn publish_job(
    tenant_id: Uuid,
    location_id: Uuid,
    content_id: Uuid,
    status: JobStatus,
) -> PublishJob {
    PublishJob {
        id: Uuid::new_v4(),
        tenant_id,
        content_id,
        location_id,
        kind: PostKind::Standard,
        summary_generated: "【Update】Spring colors".into(),
        summary_final: "【Update】Spring colors".into(),
        image_asset_id: None,
        cta_type: Some("LEARN_MORE".into()),
        cta_url: Some("https://beauty.example.jp/slnH000123/blog/bidA1.html".into()),
        offer_redeem_url: None,
        event_title: None,
        event_start_date: None,
        event_end_date: None,
        external_post_id: None,
        status,
        error_message: None,
        posted_at: None,
        edited_at: None,
        created_at: Utc::now(),
    }
}

pub fn asset(tenant_id: Uuid, status: AssetStatus) -> MediaAsset {
    let id = Uuid::new_v4();
    MediaAsset {
        id,
        tenant_id,
        origin_url: "https://imgbp.example/style/1.jpg".into(),
        local_path: format!("/tmp/media/{tenant_id}/{id}.jpg"),
        public_url: format!("http://localhost:8000/media/{tenant_id}/{id}.jpg"),
        content_type: Some("image/jpeg".into()),
        size_bytes: Some(1024),
        checksum: None,
        status,
        error_message: None,
        created_at: Utc::now(),
    }
}

pub fn upload_job(
    tenant_id: Uuid,
    location_id: Uuid,
    content_id: Uuid,
    asset_id: Uuid,
    status: JobStatus,
) -> UploadJob {
    UploadJob {
        id: Uuid::new_v4(),
        tenant_id,
        content_id,
        location_id,
        asset_id,
        media_kind: MediaKind::Photo,
        category: "ADDITIONAL".into(),
        source_image_url: "https://imgbp.example/style/1.jpg".into(),
        external_media_name: None,
        status,
        error_message: None,
        uploaded_at: None,
        created_at: Utc::now(),
    }
}
