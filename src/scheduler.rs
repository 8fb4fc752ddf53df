//! Periodic sweep: the four ingest passes, then the social token refresh and
//! media retention. Newly created assets are handed to the task queue.

use crate::{
    alerts::AlertSink,
    crypto::TokenCipher,
    ingest::{IngestReport, Ingestor, PassFailed},
    jobs::{Task, TaskQueue},
    media::MediaService,
    meta::SocialTokenExchange,
    store::Store,
    tokens::{RefreshSummary, refresh_social_tokens},
};
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub blog: Option<IngestReport>,
    pub style: Option<IngestReport>,
    pub coupon: Option<IngestReport>,
    pub instagram: Option<IngestReport>,
    pub social_tokens: Option<RefreshSummary>,
    pub assets_cleaned: Option<usize>,
    pub downloads_enqueued: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    ingestor: Ingestor,
    media: MediaService,
    queue: TaskQueue,
    cipher: Arc<dyn TokenCipher>,
    exchange: Arc<dyn SocialTokenExchange>,
    alerts: AlertSink,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        ingestor: Ingestor,
        media: MediaService,
        queue: TaskQueue,
        cipher: Arc<dyn TokenCipher>,
        exchange: Arc<dyn SocialTokenExchange>,
        alerts: AlertSink,
    ) -> Self {
        Self {
            store,
            ingestor,
            media,
            queue,
            cipher,
            exchange,
            alerts,
        }
    }

    /// Runs `run_once` every `interval`, starting immediately. A slow sweep
    /// delays the next tick instead of bunching them.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                let report = self.run_once().await;
                let elapsed_ms = started.elapsed().as_millis();
                crate::metrics::stage_elapsed("sweep", elapsed_ms);
                info!(
                    target = "salon_gbp.scheduler",
                    downloads = report.downloads_enqueued,
                    elapsed_ms = elapsed_ms as u64,
                    "sweep_finished"
                );
            }
        })
    }

    pub async fn run_once(&self) -> SweepReport {
        let mut pending = Vec::new();
        let mut report = SweepReport {
            blog: settle("scrape_blog", self.ingestor.ingest_blog().await, &mut pending),
            ..Default::default()
        };
        report.style = settle("scrape_style", self.ingestor.ingest_style().await, &mut pending);
        report.coupon = settle("scrape_coupon", self.ingestor.ingest_coupon().await, &mut pending);
        report.instagram = settle(
            "fetch_instagram",
            self.ingestor.ingest_instagram().await,
            &mut pending,
        );
        report.downloads_enqueued = self.dispatch_downloads(&pending).await;

        report.social_tokens = match refresh_social_tokens(
            self.store.as_ref(),
            self.cipher.as_ref(),
            self.exchange.as_ref(),
            &self.alerts,
        )
        .await
        {
            Ok(summary) => Some(summary),
            Err(err) => {
                error!(target = "salon_gbp.scheduler", error = %err, "social_refresh_failed");
                None
            }
        };

        report.assets_cleaned = match self.media.cleanup_assets().await {
            Ok(count) => Some(count),
            Err(err) => {
                error!(target = "salon_gbp.scheduler", error = %err, "media_cleanup_failed");
                None
            }
        };
        report
    }

    async fn dispatch_downloads(&self, assets: &[Uuid]) -> usize {
        let mut sent = 0;
        for asset_id in assets {
            match self.queue.enqueue(Task::download(*asset_id)).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(
                        target = "salon_gbp.scheduler",
                        asset_id = %asset_id,
                        error = %err,
                        "download_enqueue_failed"
                    );
                    break;
                }
            }
        }
        sent
    }
}

/// Collects the pass's new assets, including those created before a failure.
fn settle(
    job_type: &'static str,
    result: Result<IngestReport, PassFailed>,
    pending: &mut Vec<Uuid>,
) -> Option<IngestReport> {
    match result {
        Ok(report) => {
            pending.extend_from_slice(&report.pending_assets);
            Some(report)
        }
        Err(PassFailed { report, source }) => {
            error!(
                target = "salon_gbp.scheduler",
                job_type,
                error = %source,
                orphaned_assets = report.pending_assets.len(),
                "ingest_pass_failed"
            );
            pending.extend(report.pending_assets);
            None
        }
    }
}
