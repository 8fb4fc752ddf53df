//! Local cache of post/upload images. GBP fetches media from a public URL,
//! so every image is downloaded once and served from `MEDIA_ROOT`.

use crate::{
    alerts::AlertSink,
    config::MediaSettings,
    models::{AssetStatus, MediaAsset, Severity},
    scrape::{FetchError, PageFetcher},
    store::{AssetDownload, Store, StoreError},
};
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const DOWNLOAD_MAX_RETRIES: u32 = 3;
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("asset {0} not found")]
    NotFound(Uuid),
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Download and write failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::Fetch(_) | MediaError::Io(_))
    }
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|raw| raw.split(';').next())
        .map(|raw| raw.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/jpeg" | "image/jpg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        _ => "bin",
    }
}

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    alerts: AlertSink,
    settings: MediaSettings,
}

impl MediaService {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        alerts: AlertSink,
        settings: MediaSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            alerts,
            settings,
        }
    }

    fn local_path(&self, tenant_id: Uuid, asset_id: Uuid, ext: &str) -> PathBuf {
        self.settings
            .root
            .join(tenant_id.to_string())
            .join(format!("{asset_id}.{ext}"))
    }

    fn public_url(&self, tenant_id: Uuid, asset_id: Uuid, ext: &str) -> String {
        format!(
            "{}{}/{tenant_id}/{asset_id}.{ext}",
            self.settings.public_base_url, self.settings.public_path
        )
    }

    /// Records the asset before anything is fetched so jobs can point at it.
    pub async fn create_pending_asset(
        &self,
        tenant_id: Uuid,
        origin_url: &str,
    ) -> Result<MediaAsset, MediaError> {
        let id = Uuid::new_v4();
        let asset = MediaAsset {
            id,
            tenant_id,
            origin_url: origin_url.to_string(),
            local_path: self.local_path(tenant_id, id, "bin").display().to_string(),
            public_url: self.public_url(tenant_id, id, "bin"),
            content_type: None,
            size_bytes: None,
            checksum: None,
            status: AssetStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        };
        self.store.insert_asset(&asset).await?;
        Ok(asset)
    }

    /// Fetches the origin and makes the asset available. Already available or
    /// deleted assets are left untouched. On failure the asset is marked
    /// failed, an alert is raised and the error is returned so the caller can
    /// schedule another attempt.
    pub async fn download_asset(&self, asset_id: Uuid) -> Result<MediaAsset, MediaError> {
        let asset = self
            .store
            .get_asset(asset_id)
            .await?
            .ok_or(MediaError::NotFound(asset_id))?;
        if matches!(asset.status, AssetStatus::Available | AssetStatus::Deleted) {
            return Ok(asset);
        }

        match self.fetch_and_write(&asset).await {
            Ok(download) => {
                self.store.mark_asset_available(asset.id, &download).await?;
                info!(
                    target = "salon_gbp.media",
                    asset_id = %asset.id,
                    size_bytes = download.size_bytes,
                    "asset_downloaded"
                );
                Ok(MediaAsset {
                    local_path: download.local_path,
                    public_url: download.public_url,
                    content_type: download.content_type,
                    size_bytes: Some(download.size_bytes),
                    checksum: Some(download.checksum),
                    status: AssetStatus::Available,
                    error_message: None,
                    ..asset
                })
            }
            Err(err) => {
                let message = err.to_string();
                self.store.mark_asset_failed(asset.id, &message).await?;
                warn!(
                    target = "salon_gbp.media",
                    asset_id = %asset.id,
                    origin = %asset.origin_url,
                    error = %message,
                    "asset_download_failed"
                );
                self.alerts
                    .raise(
                        Some(asset.tenant_id),
                        Severity::Warning,
                        "media_download_failed",
                        format!("Media download failed for {}: {message}", asset.origin_url),
                        Some(("media_asset", asset.id)),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn fetch_and_write(&self, asset: &MediaAsset) -> Result<AssetDownload, MediaError> {
        let fetched = self.fetcher.fetch(&asset.origin_url).await?;
        let checksum = hex::encode(Sha256::digest(&fetched.bytes));
        let ext = extension_for(fetched.content_type.as_deref());
        let path = self.local_path(asset.tenant_id, asset.id, ext);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension(format!("{ext}.tmp"));
        tokio::fs::write(&staging, &fetched.bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(AssetDownload {
            local_path: path.display().to_string(),
            public_url: self.public_url(asset.tenant_id, asset.id, ext),
            content_type: fetched.content_type,
            size_bytes: fetched.bytes.len() as i64,
            checksum,
        })
    }

    /// Removes files of available assets older than the retention window and
    /// marks them deleted. Returns how many assets were retired.
    pub async fn cleanup_assets(&self) -> Result<usize, MediaError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.settings.retention_days);
        let expired = self.store.expired_assets(cutoff).await?;
        for asset in &expired {
            if let Err(err) = tokio::fs::remove_file(&asset.local_path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(
                    target = "salon_gbp.media",
                    asset_id = %asset.id,
                    path = %asset.local_path,
                    error = %err,
                    "asset_file_remove_failed"
                );
            }
            self.store.mark_asset_deleted(asset.id).await?;
        }
        if !expired.is_empty() {
            info!(
                target = "salon_gbp.media",
                deleted = expired.len(),
                "asset_cleanup"
            );
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scrape::testing::FakeFetcher, store::MemoryStore, testutil};

    const ORIGIN: &str = "https://imgbp.example/style/1.jpg";

    fn service(store: Arc<MemoryStore>, fetcher: FakeFetcher, root: PathBuf) -> MediaService {
        MediaService::new(
            store.clone(),
            Arc::new(fetcher),
            AlertSink::new(store),
            MediaSettings {
                root,
                public_path: "/media".into(),
                public_base_url: "https://salon.example".into(),
                retention_days: 30,
            },
        )
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("salon-gbp-media-{}", Uuid::new_v4().simple()))
    }

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(extension_for(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for(Some("image/PNG; charset=binary")), "png");
        assert_eq!(extension_for(Some("image/webp")), "webp");
        assert_eq!(extension_for(Some("application/octet-stream")), "bin");
        assert_eq!(extension_for(None), "bin");
    }

    #[tokio::test]
    async fn pending_asset_points_into_media_root() {
        let store = Arc::new(MemoryStore::new());
        let root = scratch_dir();
        let media = service(store.clone(), FakeFetcher::default(), root.clone());
        let tenant_id = Uuid::new_v4();

        let asset = media.create_pending_asset(tenant_id, ORIGIN).await.unwrap();

        assert_eq!(asset.status, AssetStatus::Pending);
        assert_eq!(
            asset.public_url,
            format!("https://salon.example/media/{tenant_id}/{}.bin", asset.id)
        );
        assert!(asset.local_path.starts_with(&root.display().to_string()));
        assert!(store.get_asset(asset.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn download_writes_file_with_checksum() {
        let store = Arc::new(MemoryStore::new());
        let root = scratch_dir();
        let fetcher = FakeFetcher::default().binary(ORIGIN, b"jpeg-bytes", "image/jpeg");
        let media = service(store.clone(), fetcher, root.clone());
        let asset = media.create_pending_asset(Uuid::new_v4(), ORIGIN).await.unwrap();

        let done = media.download_asset(asset.id).await.unwrap();

        assert_eq!(done.status, AssetStatus::Available);
        assert!(done.public_url.ends_with(&format!("{}.jpg", asset.id)));
        assert_eq!(done.size_bytes, Some(10));
        assert_eq!(
            done.checksum.as_deref(),
            Some(hex::encode(Sha256::digest(b"jpeg-bytes")).as_str())
        );
        assert_eq!(tokio::fs::read(&done.local_path).await.unwrap(), b"jpeg-bytes");
        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Available);
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[tokio::test]
    async fn failed_download_marks_asset_and_alerts() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = FakeFetcher::default().status(ORIGIN, 503);
        let media = service(store.clone(), fetcher, scratch_dir());
        let tenant_id = Uuid::new_v4();
        let asset = media.create_pending_asset(tenant_id, ORIGIN).await.unwrap();

        let err = media.download_asset(asset.id).await.unwrap_err();

        assert!(err.is_retryable());
        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Failed);
        let alerts = store.list_alerts(Some(tenant_id)).await.unwrap();
        assert_eq!(alerts[0].alert_type, "media_download_failed");
    }

    #[tokio::test]
    async fn available_asset_is_not_fetched_again() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = FakeFetcher::default();
        let media = service(store.clone(), fetcher.clone(), scratch_dir());
        let asset = testutil::asset(Uuid::new_v4(), AssetStatus::Available);
        store.insert_asset(&asset).await.unwrap();

        media.download_asset(asset.id).await.unwrap();

        assert!(fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn cleanup_retires_only_old_available_assets() {
        let store = Arc::new(MemoryStore::new());
        let media = service(store.clone(), FakeFetcher::default(), scratch_dir());
        let tenant_id = Uuid::new_v4();
        let mut old = testutil::asset(tenant_id, AssetStatus::Available);
        old.created_at = Utc::now() - ChronoDuration::days(45);
        let fresh = testutil::asset(tenant_id, AssetStatus::Available);
        let mut old_pending = testutil::asset(tenant_id, AssetStatus::Pending);
        old_pending.created_at = Utc::now() - ChronoDuration::days(45);
        for asset in [&old, &fresh, &old_pending] {
            store.insert_asset(asset).await.unwrap();
        }

        assert_eq!(media.cleanup_assets().await.unwrap(), 1);

        let status = |id| {
            let store = store.clone();
            async move { store.get_asset(id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(old.id).await, AssetStatus::Deleted);
        assert_eq!(status(fresh.id).await, AssetStatus::Available);
        assert_eq!(status(old_pending.id).await, AssetStatus::Pending);
    }
}
