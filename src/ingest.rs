//! Scheduled ingest passes. Each pass walks every active tenant (or social
//! account), persists content it has not seen before, and fans it out into
//! pending jobs for the tenant's active locations.
//!
//! A failure for one tenant or one item raises an alert and the pass moves
//! on; only store failures outside those guards fail the whole run.

use crate::{
    alerts::AlertSink,
    config::ScraperSettings,
    crypto::{CryptoError, TokenCipher},
    fanout::{PublishDraft, UploadDraft, fan_out_publish, fan_out_upload},
    media::{MediaError, MediaService},
    meta::{FeedError, InstagramMedia, MediaFeed},
    metrics,
    models::{
        ContentItem, JobLog, Location, MediaKind, PostKind, RunStatus, Severity, SocialAccount,
        SourceType, Tenant, bounded_error,
    },
    scrape::{
        PageFetcher, PageLimits, ScrapeError, SelectorSet,
        blog::{self, BlogArticle},
        coupon::{self, CouponItem},
        style::{self, StyleImage},
    },
    store::{Store, StoreError},
    text::{
        MAX_EVENT_TITLE_LEN, blog_to_gbp_summary, caption_to_gbp_summary, coupon_summary,
        sanitize_event_title,
    },
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Articles considered per tenant on a seeded run, newest listing order
/// first. The backfill run takes every link it walked.
pub const MAX_ARTICLES_PER_RUN: usize = 20;
pub const INSTAGRAM_FETCH_LIMIT: u32 = 10;
const OFFER_DAYS: i64 = 30;
const BLOG_FALLBACK_TITLE: &str = "Blog update";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A pass that stopped on a store error. `report` holds what the run did
/// before that, including assets that still need downloading.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct PassFailed {
    pub report: IngestReport,
    pub source: StoreError,
}

impl PassFailed {
    fn early(source: StoreError) -> Self {
        Self {
            report: IngestReport::default(),
            source,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub found: usize,
    pub processed: usize,
    /// Assets created by this run that still need downloading.
    #[serde(skip)]
    pub pending_assets: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub max_pages: u32,
    pub page_delay: Duration,
    pub tenant_delay: Duration,
}

impl From<&ScraperSettings> for Pacing {
    fn from(settings: &ScraperSettings) -> Self {
        Self {
            max_pages: settings.max_pages,
            page_delay: settings.page_delay,
            tenant_delay: settings.tenant_delay,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RunPlan {
    limits: PageLimits,
    /// The tenant is not seeded yet for this source.
    backfill: bool,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    feed: Arc<dyn MediaFeed>,
    cipher: Arc<dyn TokenCipher>,
    media: MediaService,
    alerts: AlertSink,
    selectors: Arc<SelectorSet>,
    pacing: Pacing,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        feed: Arc<dyn MediaFeed>,
        cipher: Arc<dyn TokenCipher>,
        media: MediaService,
        alerts: AlertSink,
        selectors: Arc<SelectorSet>,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            fetcher,
            feed,
            cipher,
            media,
            alerts,
            selectors,
            pacing,
        }
    }

    async fn pause(&self) {
        if !self.pacing.tenant_delay.is_zero() {
            tokio::time::sleep(self.pacing.tenant_delay).await;
        }
    }

    /// Full history until the tenant is seeded for `source`, then page 1 only.
    async fn plan_for(&self, tenant: &Tenant, source: SourceType) -> Result<RunPlan, StoreError> {
        let backfill = !self.store.is_seeded(tenant.id, source).await?;
        let max_pages = if backfill { self.pacing.max_pages } else { 1 };
        Ok(RunPlan {
            limits: PageLimits::new(max_pages, self.pacing.page_delay),
            backfill,
        })
    }

    async fn mark_seeded(&self, tenant: &Tenant, source: SourceType) -> Result<(), StoreError> {
        if self.store.mark_seeded(tenant.id, source).await? {
            info!(
                target = "salon_gbp.ingest",
                tenant_id = %tenant.id,
                source = source.as_str(),
                "source_seeded"
            );
        }
        Ok(())
    }

    async fn scrape_failed(&self, tenant: &Tenant, what: &str, err: &IngestError) {
        warn!(
            target = "salon_gbp.ingest",
            tenant_id = %tenant.id,
            stage = what,
            error = %err,
            "scrape_failed"
        );
        self.alerts
            .raise(
                Some(tenant.id),
                Severity::Warning,
                "scrape_failed",
                format!("{what} failed: {err}"),
                Some(("tenant", tenant.id)),
            )
            .await;
    }

    /// Persists a new content item. `None` when the dedup key was taken
    /// between the existence check and the insert.
    async fn persist(&self, item: ContentItem) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.store.insert_content(&item).await?.then_some(item))
    }

    async fn pending_asset(
        &self,
        tenant_id: Uuid,
        origin_url: &str,
        report: &mut IngestReport,
    ) -> Result<Uuid, MediaError> {
        let asset = self.media.create_pending_asset(tenant_id, origin_url).await?;
        report.pending_assets.push(asset.id);
        Ok(asset.id)
    }

    async fn start_run(&self, job_type: &'static str) -> Result<Uuid, StoreError> {
        let log = JobLog {
            id: Uuid::new_v4(),
            tenant_id: None,
            job_type: job_type.to_string(),
            status: RunStatus::Started,
            items_found: 0,
            items_processed: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.store.start_job_log(&log).await?;
        Ok(log.id)
    }

    /// Closes the JobLog with the pass's counts and outcome.
    async fn finish_run(
        &self,
        log_id: Uuid,
        job_type: &'static str,
        report: IngestReport,
        result: Result<(), StoreError>,
    ) -> Result<IngestReport, PassFailed> {
        let (status, error) = match &result {
            Ok(()) => (RunStatus::Completed, None),
            Err(err) => (RunStatus::Failed, Some(bounded_error(&err.to_string()))),
        };
        if let Err(source) = self
            .store
            .finish_job_log(
                log_id,
                status,
                report.found as i32,
                report.processed as i32,
                error.as_deref(),
            )
            .await
        {
            return Err(PassFailed { report, source });
        }
        info!(
            target = "salon_gbp.ingest",
            job_type,
            status = status.as_str(),
            found = report.found,
            processed = report.processed,
            "ingest_finished"
        );
        metrics::items_ingested(job_type, report.found, report.processed);
        match result {
            Ok(()) => Ok(report),
            Err(source) => Err(PassFailed { report, source }),
        }
    }

    pub async fn ingest_blog(&self) -> Result<IngestReport, PassFailed> {
        let log_id = self.start_run("scrape_blog").await.map_err(PassFailed::early)?;
        let mut report = IngestReport::default();
        let result = self.blog_pass(&mut report).await;
        self.finish_run(log_id, "scrape_blog", report, result).await
    }

    async fn blog_pass(&self, report: &mut IngestReport) -> Result<(), StoreError> {
        for tenant in self.store.active_tenants().await? {
            let Some(list_url) = tenant.source_url(SourceType::Blog) else {
                continue;
            };
            self.pause().await;
            let plan = self.plan_for(&tenant, SourceType::Blog).await?;
            let urls = match blog::list_article_urls(
                self.fetcher.as_ref(),
                &list_url,
                plan.limits,
                &self.selectors.blog,
            )
            .await
            {
                Ok(urls) => urls,
                Err(err) => {
                    self.scrape_failed(&tenant, "Blog list fetch", &err.into()).await;
                    continue;
                }
            };
            self.mark_seeded(&tenant, SourceType::Blog).await?;
            let locations = self.store.active_locations(tenant.id).await?;
            let cap = if plan.backfill {
                urls.len()
            } else {
                MAX_ARTICLES_PER_RUN
            };
            for url in urls.into_iter().take(cap) {
                if self
                    .store
                    .content_exists(tenant.id, SourceType::Blog, &url)
                    .await?
                {
                    continue;
                }
                report.found += 1;
                match self.blog_item(&tenant, &locations, &url, report).await {
                    Ok(true) => report.processed += 1,
                    Ok(false) => {}
                    Err(err) => self.scrape_failed(&tenant, "Blog ingest", &err).await,
                }
            }
        }
        Ok(())
    }

    async fn blog_item(
        &self,
        tenant: &Tenant,
        locations: &[Location],
        url: &str,
        report: &mut IngestReport,
    ) -> Result<bool, IngestError> {
        let article: BlogArticle =
            blog::fetch_article(self.fetcher.as_ref(), url, &self.selectors.blog).await?;
        let title = if article.title.trim().is_empty() {
            BLOG_FALLBACK_TITLE
        } else {
            article.title.as_str()
        };
        let summary = blog_to_gbp_summary(title, &article.body_html, &article.url);

        let mut item = ContentItem::new(tenant.id, SourceType::Blog, url);
        item.title = Some(article.title.clone()).filter(|t| !t.is_empty());
        item.body_html = Some(article.body_html.clone());
        item.image_urls = article.image_urls.clone();
        item.source_url = Some(article.url.clone());
        item.published_at = article.published_at;
        let Some(item) = self.persist(item).await? else {
            return Ok(false);
        };

        let image_asset_id = match summary.image_url.as_deref() {
            Some(image) => Some(self.pending_asset(tenant.id, image, report).await?),
            None => None,
        };
        let draft = PublishDraft::standard(summary.summary, Some(article.url), image_asset_id);
        fan_out_publish(self.store.as_ref(), &item, locations, &draft).await?;
        Ok(true)
    }

    pub async fn ingest_style(&self) -> Result<IngestReport, PassFailed> {
        let log_id = self.start_run("scrape_style").await.map_err(PassFailed::early)?;
        let mut report = IngestReport::default();
        let result = self.style_pass(&mut report).await;
        self.finish_run(log_id, "scrape_style", report, result).await
    }

    async fn style_pass(&self, report: &mut IngestReport) -> Result<(), StoreError> {
        for tenant in self.store.active_tenants().await? {
            let Some(list_url) = tenant.source_url(SourceType::Style) else {
                continue;
            };
            self.pause().await;
            let plan = self.plan_for(&tenant, SourceType::Style).await?;
            let images = match style::fetch_style_images(
                self.fetcher.as_ref(),
                &list_url,
                plan.limits,
                &self.selectors.style,
            )
            .await
            {
                Ok(images) => images,
                Err(err) => {
                    self.scrape_failed(&tenant, "Style fetch", &err.into()).await;
                    continue;
                }
            };
            self.mark_seeded(&tenant, SourceType::Style).await?;
            let locations = self.store.active_locations(tenant.id).await?;
            for image in images {
                if self
                    .store
                    .content_exists(tenant.id, SourceType::Style, &image.source_id)
                    .await?
                {
                    continue;
                }
                report.found += 1;
                match self.style_item(&tenant, &locations, image, report).await {
                    Ok(true) => report.processed += 1,
                    Ok(false) => {}
                    Err(err) => self.scrape_failed(&tenant, "Style ingest", &err).await,
                }
            }
        }
        Ok(())
    }

    async fn style_item(
        &self,
        tenant: &Tenant,
        locations: &[Location],
        image: StyleImage,
        report: &mut IngestReport,
    ) -> Result<bool, IngestError> {
        let mut item = ContentItem::new(tenant.id, SourceType::Style, &image.source_id);
        item.title = image.title.clone();
        item.image_urls = vec![image.image_url.clone()];
        item.source_url = Some(image.page_url.clone());
        let Some(item) = self.persist(item).await? else {
            return Ok(false);
        };

        let asset_id = self.pending_asset(tenant.id, &image.image_url, report).await?;
        let draft = UploadDraft {
            asset_id,
            media_kind: MediaKind::Photo,
            category: "ADDITIONAL".to_string(),
            source_image_url: image.image_url,
        };
        fan_out_upload(self.store.as_ref(), &item, locations, &draft).await?;
        Ok(true)
    }

    pub async fn ingest_coupon(&self) -> Result<IngestReport, PassFailed> {
        let log_id = self.start_run("scrape_coupon").await.map_err(PassFailed::early)?;
        let mut report = IngestReport::default();
        let result = self.coupon_pass(&mut report).await;
        self.finish_run(log_id, "scrape_coupon", report, result).await
    }

    async fn coupon_pass(&self, report: &mut IngestReport) -> Result<(), StoreError> {
        for tenant in self.store.active_tenants().await? {
            let Some(list_url) = tenant.source_url(SourceType::Coupon) else {
                continue;
            };
            self.pause().await;
            let plan = self.plan_for(&tenant, SourceType::Coupon).await?;
            let coupons = match coupon::fetch_coupons(
                self.fetcher.as_ref(),
                &list_url,
                plan.limits,
                &self.selectors.coupon,
            )
            .await
            {
                Ok(coupons) => coupons,
                Err(err) => {
                    self.scrape_failed(&tenant, "Coupon fetch", &err.into()).await;
                    continue;
                }
            };
            self.mark_seeded(&tenant, SourceType::Coupon).await?;
            let locations = self.store.active_locations(tenant.id).await?;
            for coupon in coupons {
                if self
                    .store
                    .content_exists(tenant.id, SourceType::Coupon, &coupon.source_id)
                    .await?
                {
                    continue;
                }
                report.found += 1;
                match self.coupon_item(&tenant, &locations, &list_url, coupon).await {
                    Ok(true) => report.processed += 1,
                    Ok(false) => {}
                    Err(err) => self.scrape_failed(&tenant, "Coupon ingest", &err).await,
                }
            }
        }
        Ok(())
    }

    async fn coupon_item(
        &self,
        tenant: &Tenant,
        locations: &[Location],
        list_url: &str,
        coupon: CouponItem,
    ) -> Result<bool, IngestError> {
        let mut item = ContentItem::new(tenant.id, SourceType::Coupon, &coupon.source_id);
        item.title = Some(coupon.title.clone());
        item.body_text = Some(coupon.body_text.clone());
        item.source_url = Some(coupon.url.clone());
        let Some(item) = self.persist(item).await? else {
            return Ok(false);
        };

        let today = Utc::now().date_naive();
        let draft = PublishDraft {
            kind: PostKind::Offer,
            summary: coupon_summary(&coupon.title, &coupon.body_text),
            image_asset_id: None,
            cta_type: None,
            cta_url: None,
            offer_redeem_url: Some(list_url.to_string()),
            event_title: Some(sanitize_event_title(&coupon.title, MAX_EVENT_TITLE_LEN)),
            event_start_date: Some(today),
            event_end_date: Some(today + ChronoDuration::days(OFFER_DAYS)),
        };
        fan_out_publish(self.store.as_ref(), &item, locations, &draft).await?;
        Ok(true)
    }

    pub async fn ingest_instagram(&self) -> Result<IngestReport, PassFailed> {
        let log_id = self.start_run("fetch_instagram").await.map_err(PassFailed::early)?;
        let mut report = IngestReport::default();
        let result = self.instagram_pass(&mut report).await;
        self.finish_run(log_id, "fetch_instagram", report, result).await
    }

    async fn instagram_pass(&self, report: &mut IngestReport) -> Result<(), StoreError> {
        for account in self.store.active_social_accounts().await? {
            self.pause().await;
            let media = match self.recent_media(&account).await {
                Ok(media) => media,
                Err(err) => {
                    self.social_failed(&account, "instagram_fetch_failed", "Instagram fetch", &err)
                        .await;
                    continue;
                }
            };
            let locations = self.store.active_locations(account.tenant_id).await?;
            for post in media {
                if self
                    .store
                    .content_exists(account.tenant_id, SourceType::Social, &post.id)
                    .await?
                {
                    continue;
                }
                report.found += 1;
                match self.instagram_item(&account, &locations, post, report).await {
                    Ok(true) => report.processed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        self.social_failed(
                            &account,
                            "instagram_ingest_failed",
                            "Instagram ingest",
                            &err,
                        )
                        .await
                    }
                }
            }
        }
        Ok(())
    }

    async fn recent_media(&self, account: &SocialAccount) -> Result<Vec<InstagramMedia>, IngestError> {
        let token = self.cipher.decrypt(&account.access_token_enc)?;
        Ok(self
            .feed
            .recent_media(&account.external_user_id, &token, INSTAGRAM_FETCH_LIMIT)
            .await?)
    }

    async fn social_failed(
        &self,
        account: &SocialAccount,
        alert_type: &str,
        what: &str,
        err: &IngestError,
    ) {
        warn!(
            target = "salon_gbp.ingest",
            account_id = %account.id,
            alert_type,
            error = %err,
            "social_ingest_failed"
        );
        self.alerts
            .raise(
                Some(account.tenant_id),
                Severity::Warning,
                alert_type,
                format!("{what} failed for {}: {err}", account.username),
                Some(("social_account", account.id)),
            )
            .await;
    }

    async fn instagram_item(
        &self,
        account: &SocialAccount,
        locations: &[Location],
        post: InstagramMedia,
        report: &mut IngestReport,
    ) -> Result<bool, IngestError> {
        let caption = post.caption.clone().unwrap_or_default();
        let permalink = post.permalink.clone().filter(|p| !p.is_empty());
        let image_url = post.image_url().map(str::to_string);

        let mut item = ContentItem::new(account.tenant_id, SourceType::Social, &post.id);
        item.social_account_id = Some(account.id);
        item.body_text = Some(caption.clone());
        item.image_urls = image_url.iter().cloned().collect();
        item.source_url = permalink.clone();
        let Some(item) = self.persist(item).await? else {
            return Ok(false);
        };

        let image_asset_id = match image_url.as_deref() {
            Some(image) => Some(self.pending_asset(account.tenant_id, image, report).await?),
            None => None,
        };
        let summary = caption_to_gbp_summary(
            &caption,
            permalink.as_deref().unwrap_or(""),
            account.sync_hashtags,
        );
        let draft = PublishDraft::standard(summary, permalink, image_asset_id);
        fan_out_publish(self.store.as_ref(), &item, locations, &draft).await?;
        Ok(true)
    }
}
