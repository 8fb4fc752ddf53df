use crate::{
    models::{
        Alert, AlertStatus, AssetStatus, Connection, ConnectionStatus, ContentItem, JobKind, JobLog,
        JobStatus, Location, MediaAsset, MediaKind, PostKind, PublishJob, RunStatus, Severity,
        SocialAccount, SourceType, Tenant, UploadJob, bounded_error,
    },
    store::{AssetDownload, Store, StoreError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query,
};
use tracing::info;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(target = "salon_gbp.store", "postgres store ready");
        Ok(Self { pool })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Runs `query` inside a savepoint so a unique violation is swallowed
/// without aborting the enclosing transaction.
async fn insert_or_skip(
    tx: &mut Transaction<'_, Postgres>,
    query: Query<'_, Postgres, PgArguments>,
) -> Result<bool, StoreError> {
    sqlx::query("SAVEPOINT idempotent_insert")
        .execute(&mut **tx)
        .await?;
    match query.execute(&mut **tx).await {
        Ok(_) => {
            sqlx::query("RELEASE SAVEPOINT idempotent_insert")
                .execute(&mut **tx)
                .await?;
            Ok(true)
        }
        Err(err) if is_unique_violation(&err) => {
            sqlx::query("ROLLBACK TO SAVEPOINT idempotent_insert")
                .execute(&mut **tx)
                .await?;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn decode<T>(
    column: &'static str,
    raw: String,
    parse: fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(&raw).ok_or(StoreError::Corrupt { column, value: raw })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, StoreError> {
    Ok(Tenant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        source_salon_id: row.try_get("source_salon_id")?,
        blog_url: row.try_get("blog_url")?,
        style_url: row.try_get("style_url")?,
        coupon_url: row.try_get("coupon_url")?,
    })
}

fn content_from_row(row: &PgRow) -> Result<ContentItem, StoreError> {
    Ok(ContentItem {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        source_type: decode("source_type", row.try_get("source_type")?, SourceType::parse)?,
        source_id: row.try_get("source_id")?,
        social_account_id: row.try_get("social_account_id")?,
        title: row.try_get("title")?,
        body_html: row.try_get("body_html")?,
        body_text: row.try_get("body_text")?,
        image_urls: row.try_get("image_urls")?,
        source_url: row.try_get("source_url")?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn connection_from_row(row: &PgRow) -> Result<Connection, StoreError> {
    Ok(Connection {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        access_token_enc: row.try_get("access_token_enc")?,
        refresh_token_enc: row.try_get("refresh_token_enc")?,
        token_expires_at: row.try_get("token_expires_at")?,
        status: decode("status", row.try_get("status")?, ConnectionStatus::parse)?,
    })
}

fn location_from_row(row: &PgRow) -> Result<Location, StoreError> {
    Ok(Location {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        connection_id: row.try_get("connection_id")?,
        account_id: row.try_get("account_id")?,
        location_id: row.try_get("location_id")?,
        display_name: row.try_get("display_name")?,
        is_active: row.try_get("is_active")?,
    })
}

fn social_from_row(row: &PgRow) -> Result<SocialAccount, StoreError> {
    Ok(SocialAccount {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        external_user_id: row.try_get("external_user_id")?,
        username: row.try_get("username")?,
        access_token_enc: row.try_get("access_token_enc")?,
        token_expires_at: row.try_get("token_expires_at")?,
        is_active: row.try_get("is_active")?,
        sync_hashtags: row.try_get("sync_hashtags")?,
    })
}

fn publish_from_row(row: &PgRow) -> Result<PublishJob, StoreError> {
    Ok(PublishJob {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        content_id: row.try_get("content_id")?,
        location_id: row.try_get("location_id")?,
        kind: decode("kind", row.try_get("kind")?, PostKind::parse)?,
        summary_generated: row.try_get("summary_generated")?,
        summary_final: row.try_get("summary_final")?,
        image_asset_id: row.try_get("image_asset_id")?,
        cta_type: row.try_get("cta_type")?,
        cta_url: row.try_get("cta_url")?,
        offer_redeem_url: row.try_get("offer_redeem_url")?,
        event_title: row.try_get("event_title")?,
        event_start_date: row.try_get("event_start_date")?,
        event_end_date: row.try_get("event_end_date")?,
        external_post_id: row.try_get("external_post_id")?,
        status: decode("status", row.try_get("status")?, JobStatus::parse)?,
        error_message: row.try_get("error_message")?,
        posted_at: row.try_get("posted_at")?,
        edited_at: row.try_get("edited_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<UploadJob, StoreError> {
    Ok(UploadJob {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        content_id: row.try_get("content_id")?,
        location_id: row.try_get("location_id")?,
        asset_id: row.try_get("asset_id")?,
        media_kind: decode("media_kind", row.try_get("media_kind")?, MediaKind::parse)?,
        category: row.try_get("category")?,
        source_image_url: row.try_get("source_image_url")?,
        external_media_name: row.try_get("external_media_name")?,
        status: decode("status", row.try_get("status")?, JobStatus::parse)?,
        error_message: row.try_get("error_message")?,
        uploaded_at: row.try_get("uploaded_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn asset_from_row(row: &PgRow) -> Result<MediaAsset, StoreError> {
    Ok(MediaAsset {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        origin_url: row.try_get("origin_url")?,
        local_path: row.try_get("local_path")?,
        public_url: row.try_get("public_url")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get("size_bytes")?,
        checksum: row.try_get("checksum")?,
        status: decode("status", row.try_get("status")?, AssetStatus::parse)?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert, StoreError> {
    Ok(Alert {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        severity: decode("severity", row.try_get("severity")?, Severity::parse)?,
        alert_type: row.try_get("alert_type")?,
        message: row.try_get("message")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        status: decode("status", row.try_get("status")?, AlertStatus::parse)?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(
    rows: Vec<PgRow>,
    map: fn(&PgRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, is_active, source_salon_id, blog_url, style_url, coupon_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                source_salon_id = EXCLUDED.source_salon_id,
                blog_url = EXCLUDED.blog_url,
                style_url = EXCLUDED.style_url,
                coupon_url = EXCLUDED.coupon_url
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(tenant.is_active)
        .bind(&tenant.source_salon_id)
        .bind(&tenant.blog_url)
        .bind(&tenant.style_url)
        .bind(&tenant.coupon_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn active_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tenants WHERE is_active ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        collect(rows, tenant_from_row)
    }

    async fn content_exists(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM content_items
                WHERE tenant_id = $1 AND source_type = $2 AND source_id = $3
            )
            "#,
        )
        .bind(tenant_id)
        .bind(source_type.as_str())
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_content(&self, item: &ContentItem) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_items
                (id, tenant_id, source_type, source_id, social_account_id, title, body_html,
                 body_text, image_urls, source_url, published_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (tenant_id, source_type, source_id) DO NOTHING
            "#,
        )
        .bind(item.id)
        .bind(item.tenant_id)
        .bind(item.source_type.as_str())
        .bind(&item.source_id)
        .bind(item.social_account_id)
        .bind(&item.title)
        .bind(&item.body_html)
        .bind(&item.body_text)
        .bind(&item.image_urls)
        .bind(&item.source_url)
        .bind(item.published_at)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        let row = sqlx::query("SELECT * FROM content_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn get_connection(&self, id: Uuid) -> Result<Option<Connection>, StoreError> {
        let row = sqlx::query("SELECT * FROM gbp_connections WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<Connection, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO gbp_connections
                (id, email, access_token_enc, refresh_token_enc, token_expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE SET
                access_token_enc = EXCLUDED.access_token_enc,
                refresh_token_enc = EXCLUDED.refresh_token_enc,
                token_expires_at = EXCLUDED.token_expires_at,
                status = EXCLUDED.status,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(connection.id)
        .bind(&connection.email)
        .bind(&connection.access_token_enc)
        .bind(&connection.refresh_token_enc)
        .bind(connection.token_expires_at)
        .bind(connection.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        connection_from_row(&row)
    }

    async fn update_connection_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE gbp_connections
            SET access_token_enc = $2, token_expires_at = $3, status = 'active', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(access_token_enc)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_connection_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE gbp_connections SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query("SELECT * FROM gbp_locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query("SELECT * FROM gbp_locations WHERE tenant_id = $1 ORDER BY location_id")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows, location_from_row)
    }

    async fn active_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM gbp_locations WHERE tenant_id = $1 AND is_active ORDER BY location_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, location_from_row)
    }

    async fn upsert_location(&self, location: &Location) -> Result<Location, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO gbp_locations
                (id, tenant_id, connection_id, account_id, location_id, display_name, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, location_id) DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                account_id = EXCLUDED.account_id,
                display_name = EXCLUDED.display_name
            RETURNING *
            "#,
        )
        .bind(location.id)
        .bind(location.tenant_id)
        .bind(location.connection_id)
        .bind(&location.account_id)
        .bind(&location.location_id)
        .bind(&location.display_name)
        .bind(location.is_active)
        .fetch_one(&self.pool)
        .await?;
        location_from_row(&row)
    }

    async fn activate_location(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
    ) -> Result<Location, StoreError> {
        let mut tx = self.pool.begin().await?;
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM gbp_locations WHERE id = $1 AND tenant_id = $2)",
        )
        .bind(location_id)
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;
        if !owned {
            return Err(StoreError::NotFound {
                entity: "location",
                id: location_id,
            });
        }
        sqlx::query("UPDATE gbp_locations SET is_active = FALSE WHERE tenant_id = $1 AND id <> $2")
            .bind(tenant_id)
            .bind(location_id)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("UPDATE gbp_locations SET is_active = TRUE WHERE id = $1 RETURNING *")
            .bind(location_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        location_from_row(&row)
    }

    async fn upsert_social_account(
        &self,
        account: &SocialAccount,
    ) -> Result<SocialAccount, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO social_accounts
                (id, tenant_id, external_user_id, username, access_token_enc, token_expires_at,
                 is_active, sync_hashtags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, external_user_id) DO UPDATE SET
                username = EXCLUDED.username,
                access_token_enc = EXCLUDED.access_token_enc,
                token_expires_at = EXCLUDED.token_expires_at,
                is_active = EXCLUDED.is_active
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(account.tenant_id)
        .bind(&account.external_user_id)
        .bind(&account.username)
        .bind(&account.access_token_enc)
        .bind(account.token_expires_at)
        .bind(account.is_active)
        .bind(account.sync_hashtags)
        .fetch_one(&self.pool)
        .await?;
        social_from_row(&row)
    }

    async fn active_social_accounts(&self) -> Result<Vec<SocialAccount>, StoreError> {
        let rows = sqlx::query("SELECT * FROM social_accounts WHERE is_active ORDER BY username")
            .fetch_all(&self.pool)
            .await?;
        collect(rows, social_from_row)
    }

    async fn update_social_token(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE social_accounts SET access_token_enc = $2, token_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(access_token_enc)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        kind: PostKind,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM publish_jobs
                WHERE tenant_id = $1 AND location_id = $2 AND content_id = $3 AND kind = $4
            )
            "#,
        )
        .bind(tenant_id)
        .bind(location_id)
        .bind(content_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn upload_job_exists(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        content_id: Uuid,
        asset_id: Uuid,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM upload_jobs
                WHERE tenant_id = $1 AND location_id = $2 AND content_id = $3 AND asset_id = $4
            )
            "#,
        )
        .bind(tenant_id)
        .bind(location_id)
        .bind(content_id)
        .bind(asset_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_publish_jobs(&self, jobs: &[PublishJob]) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();
        for job in jobs {
            let query = sqlx::query(
                r#"
                INSERT INTO publish_jobs
                    (id, tenant_id, content_id, location_id, kind, summary_generated,
                     summary_final, image_asset_id, cta_type, cta_url, offer_redeem_url,
                     event_title, event_start_date, event_end_date, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(job.id)
            .bind(job.tenant_id)
            .bind(job.content_id)
            .bind(job.location_id)
            .bind(job.kind.as_str())
            .bind(&job.summary_generated)
            .bind(&job.summary_final)
            .bind(job.image_asset_id)
            .bind(&job.cta_type)
            .bind(&job.cta_url)
            .bind(&job.offer_redeem_url)
            .bind(&job.event_title)
            .bind(job.event_start_date)
            .bind(job.event_end_date)
            .bind(job.status.as_str())
            .bind(job.created_at);
            if insert_or_skip(&mut tx, query).await? {
                inserted.push(job.id);
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_upload_jobs(&self, jobs: &[UploadJob]) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();
        for job in jobs {
            let query = sqlx::query(
                r#"
                INSERT INTO upload_jobs
                    (id, tenant_id, content_id, location_id, asset_id, media_kind, category,
                     source_image_url, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(job.id)
            .bind(job.tenant_id)
            .bind(job.content_id)
            .bind(job.location_id)
            .bind(job.asset_id)
            .bind(job.media_kind.as_str())
            .bind(&job.category)
            .bind(&job.source_image_url)
            .bind(job.status.as_str())
            .bind(job.created_at);
            if insert_or_skip(&mut tx, query).await? {
                inserted.push(job.id);
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_publish_job(&self, id: Uuid) -> Result<Option<PublishJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM publish_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(publish_from_row).transpose()
    }

    async fn get_upload_job(&self, id: Uuid) -> Result<Option<UploadJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM upload_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(upload_from_row).transpose()
    }

    async fn list_publish_jobs(&self, tenant_id: Uuid) -> Result<Vec<PublishJob>, StoreError> {
        let rows = sqlx::query("SELECT * FROM publish_jobs WHERE tenant_id = $1 ORDER BY created_at")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows, publish_from_row)
    }

    async fn list_upload_jobs(&self, tenant_id: Uuid) -> Result<Vec<UploadJob>, StoreError> {
        let rows = sqlx::query("SELECT * FROM upload_jobs WHERE tenant_id = $1 ORDER BY created_at")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows, upload_from_row)
    }

    async fn save_publish_edits(&self, job: &PublishJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE publish_jobs SET
                summary_final = $2,
                image_asset_id = $3,
                cta_type = $4,
                cta_url = $5,
                offer_redeem_url = $6,
                event_title = $7,
                event_start_date = $8,
                event_end_date = $9,
                edited_at = $10
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.summary_final)
        .bind(job.image_asset_id)
        .bind(&job.cta_type)
        .bind(&job.cta_url)
        .bind(&job.offer_redeem_url)
        .bind(&job.event_title)
        .bind(job.event_start_date)
        .bind(job.event_end_date)
        .bind(job.edited_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_job(
        &self,
        kind: JobKind,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET status = $3 WHERE id = $1 AND status = ANY($2)",
            kind.table()
        );
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(from)
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_job_error(&self, kind: JobKind, id: Uuid) -> Result<(), StoreError> {
        let sql = format!("UPDATE {} SET error_message = NULL WHERE id = $1", kind.table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn complete_publish_job(
        &self,
        id: Uuid,
        external_post_id: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE publish_jobs
            SET external_post_id = $2, status = 'posted', posted_at = $3, error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_post_id)
        .bind(posted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_upload_job(
        &self,
        id: Uuid,
        external_media_name: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE upload_jobs
            SET external_media_name = $2, status = 'uploaded', uploaded_at = $3, error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_media_name)
        .bind(uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_job(&self, kind: JobKind, id: Uuid, message: &str) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET status = 'failed', error_message = $2 WHERE id = $1",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(bounded_error(message))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_seeded(&self, tenant_id: Uuid, source_type: SourceType) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM scrape_seeds WHERE tenant_id = $1 AND source_type = $2)",
        )
        .bind(tenant_id)
        .bind(source_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_seeded(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = sqlx::query("INSERT INTO scrape_seeds (tenant_id, source_type) VALUES ($1, $2)")
            .bind(tenant_id)
            .bind(source_type.as_str());
        let created = insert_or_skip(&mut tx, query).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn insert_asset(&self, asset: &MediaAsset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO media_assets
                (id, tenant_id, origin_url, local_path, public_url, content_type, size_bytes,
                 checksum, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(asset.id)
        .bind(asset.tenant_id)
        .bind(&asset.origin_url)
        .bind(&asset.local_path)
        .bind(&asset.public_url)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .bind(&asset.checksum)
        .bind(asset.status.as_str())
        .bind(&asset.error_message)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>, StoreError> {
        let row = sqlx::query("SELECT * FROM media_assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(asset_from_row).transpose()
    }

    async fn mark_asset_available(
        &self,
        id: Uuid,
        download: &AssetDownload,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE media_assets SET
                local_path = $2,
                public_url = $3,
                content_type = $4,
                size_bytes = $5,
                checksum = $6,
                status = 'available',
                error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&download.local_path)
        .bind(&download.public_url)
        .bind(&download.content_type)
        .bind(download.size_bytes)
        .bind(&download.checksum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_asset_failed(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE media_assets SET status = 'failed', error_message = $2 WHERE id = $1")
            .bind(id)
            .bind(bounded_error(message))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expired_assets(&self, cutoff: DateTime<Utc>) -> Result<Vec<MediaAsset>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM media_assets WHERE status = 'available' AND created_at < $1 ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, asset_from_row)
    }

    async fn mark_asset_deleted(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE media_assets SET status = 'deleted' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, tenant_id, severity, alert_type, message, entity_type, entity_id, status,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(alert.tenant_id)
        .bind(alert.severity.as_str())
        .bind(&alert.alert_type)
        .bind(&alert.message)
        .bind(&alert.entity_type)
        .bind(alert.entity_id)
        .bind(alert.status.as_str())
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM alerts WHERE ($1::uuid IS NULL OR tenant_id = $1) ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, alert_from_row)
    }

    async fn acknowledge_alert(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE alerts SET status = 'acked' WHERE id = $1 AND tenant_id = $2 AND status = 'open'",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn start_job_log(&self, log: &JobLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_logs
                (id, tenant_id, job_type, status, items_found, items_processed, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id)
        .bind(&log.job_type)
        .bind(log.status.as_str())
        .bind(log.items_found)
        .bind(log.items_processed)
        .bind(log.started_at)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            UPDATE job_logs SET
                status = $2,
                items_found = $3,
                items_processed = $4,
                error_message = $5,
                completed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(items_found)
        .bind(items_processed)
        .bind(error_message.map(bounded_error))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
