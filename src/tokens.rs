//! Access-token lifecycle: refresh-on-demand for GBP connections and the
//! periodic renewal of long-lived Instagram tokens.

use crate::{
    alerts::AlertSink,
    crypto::{CryptoError, TokenCipher},
    meta::SocialTokenExchange,
    models::{Connection, Severity},
    oauth::{OAuthError, TokenRefresher},
    store::{Store, StoreError},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Tokens expiring within this margin are refreshed before use.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;
/// Social tokens expiring within this window are renewed by the sweep.
pub const SOCIAL_REFRESH_WINDOW_DAYS: i64 = 14;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("token refresh failed: {0}")]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now + Duration::minutes(REFRESH_MARGIN_MINUTES)
}

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn Store>,
    cipher: Arc<dyn TokenCipher>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: Arc<dyn TokenCipher>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            store,
            cipher,
            refresher,
        }
    }

    pub fn cipher(&self) -> &dyn TokenCipher {
        self.cipher.as_ref()
    }

    /// Plaintext access token for `connection`, refreshed and persisted first
    /// when it is about to expire.
    pub async fn access_token(&self, connection: &Connection) -> Result<String, TokenError> {
        if !needs_refresh(connection.token_expires_at, Utc::now()) {
            return Ok(self.cipher.decrypt(&connection.access_token_enc)?);
        }
        info!(
            target = "salon_gbp.tokens",
            connection_id = %connection.id,
            expires_at = %connection.token_expires_at,
            "gbp_token_refresh"
        );
        let refresh_token = self.cipher.decrypt(&connection.refresh_token_enc)?;
        let grant = self.refresher.refresh(&refresh_token).await?;
        let sealed = self.cipher.encrypt(&grant.access_token)?;
        self.store
            .update_connection_token(connection.id, &sealed, grant.expires_at)
            .await?;
        info!(
            target = "salon_gbp.tokens",
            connection_id = %connection.id,
            expires_at = %grant.expires_at,
            "gbp_token_refreshed"
        );
        Ok(grant.access_token)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// Renews every active social token that lapses within the refresh window.
/// A failing account raises a critical alert and the sweep continues.
pub async fn refresh_social_tokens(
    store: &dyn Store,
    cipher: &dyn TokenCipher,
    exchange: &dyn SocialTokenExchange,
    alerts: &AlertSink,
) -> Result<RefreshSummary, StoreError> {
    let threshold = Utc::now() + Duration::days(SOCIAL_REFRESH_WINDOW_DAYS);
    let mut summary = RefreshSummary::default();
    for account in store.active_social_accounts().await? {
        if account.token_expires_at > threshold {
            continue;
        }
        let renewed = async {
            let current = cipher.decrypt(&account.access_token_enc)?;
            let grant = exchange.exchange_long_lived(&current).await?;
            let sealed = cipher.encrypt(&grant.access_token)?;
            store
                .update_social_token(account.id, &sealed, grant.expires_at)
                .await?;
            Ok::<_, TokenError>(grant.expires_at)
        }
        .await;
        match renewed {
            Ok(expires_at) => {
                summary.refreshed += 1;
                info!(
                    target = "salon_gbp.tokens",
                    account_id = %account.id,
                    expires_at = %expires_at,
                    "social_token_refreshed"
                );
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    target = "salon_gbp.tokens",
                    account_id = %account.id,
                    error = %err,
                    "social_token_refresh_failed"
                );
                alerts
                    .raise(
                        Some(account.tenant_id),
                        Severity::Critical,
                        "instagram_token_expiring",
                        format!(
                            "Instagram token refresh failed for {}: {err}",
                            account.username
                        ),
                        Some(("social_account", account.id)),
                    )
                    .await;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::oauth::TokenGrant;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Hands out a fixed token and records each refresh token it was given.
    pub struct FakeRefresher {
        pub grant: Result<TokenGrant, OAuthError>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRefresher {
        pub fn granting(access_token: &str, ttl: Duration) -> Self {
            Self {
                grant: Ok(TokenGrant {
                    access_token: access_token.into(),
                    refresh_token: None,
                    expires_at: Utc::now() + ttl,
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
            self.calls.lock().unwrap().push(refresh_token.to_string());
            self.grant.clone()
        }
    }

    #[async_trait]
    impl SocialTokenExchange for FakeRefresher {
        async fn exchange_long_lived(&self, access_token: &str) -> Result<TokenGrant, OAuthError> {
            self.refresh(access_token).await
        }
    }

    /// Reversible stand-in for the AES cipher.
    pub struct PlainCipher;

    impl TokenCipher for PlainCipher {
        fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
            Ok(format!("enc:{plaintext}"))
        }

        fn decrypt(&self, payload: &str) -> Result<String, CryptoError> {
            payload
                .strip_prefix("enc:")
                .map(str::to_string)
                .ok_or(CryptoError::Malformed("missing test prefix"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeRefresher, PlainCipher};
    use super::*;
    use crate::{models::SocialAccount, store::MemoryStore, testutil};
    use uuid::Uuid;

    #[tokio::test]
    async fn token_close_to_expiry_is_refreshed_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let connection = store
            .upsert_connection(&testutil::connection(Duration::minutes(3)))
            .await
            .unwrap();
        let refresher = Arc::new(FakeRefresher::granting("fresh", Duration::hours(1)));
        let manager = TokenManager::new(store.clone(), Arc::new(PlainCipher), refresher.clone());

        let token = manager.access_token(&connection).await.unwrap();

        assert_eq!(token, "fresh");
        assert_eq!(*refresher.calls.lock().unwrap(), vec!["refresh".to_string()]);
        let stored = store.get_connection(connection.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token_enc, "enc:fresh");
        assert!(stored.token_expires_at > Utc::now() + Duration::minutes(50));
    }

    #[tokio::test]
    async fn healthy_token_is_used_as_is() {
        let store = Arc::new(MemoryStore::new());
        let connection = testutil::connection(Duration::hours(1));
        let refresher = Arc::new(FakeRefresher::granting("unused", Duration::hours(1)));
        let manager = TokenManager::new(store, Arc::new(PlainCipher), refresher.clone());

        assert_eq!(manager.access_token(&connection).await.unwrap(), "access");
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let connection = testutil::connection(Duration::minutes(-10));
        let refresher = Arc::new(FakeRefresher {
            grant: Err(OAuthError::Status(400)),
            calls: Default::default(),
        });
        let manager = TokenManager::new(store, Arc::new(PlainCipher), refresher);
        assert!(matches!(
            manager.access_token(&connection).await,
            Err(TokenError::OAuth(OAuthError::Status(400)))
        ));
    }

    fn social(tenant_id: Uuid, username: &str, expires_in: Duration) -> SocialAccount {
        SocialAccount {
            id: Uuid::new_v4(),
            tenant_id,
            external_user_id: format!("ig-{username}"),
            username: username.into(),
            access_token_enc: format!("enc:{username}-token"),
            token_expires_at: Utc::now() + expires_in,
            is_active: true,
            sync_hashtags: false,
        }
    }

    #[tokio::test]
    async fn social_sweep_renews_only_expiring_tokens() {
        let store = Arc::new(MemoryStore::new());
        let tenant = testutil::tenant();
        store.insert_tenant(&tenant).await.unwrap();
        let soon = social(tenant.id, "soon", Duration::days(3));
        let later = social(tenant.id, "later", Duration::days(40));
        store.upsert_social_account(&soon).await.unwrap();
        store.upsert_social_account(&later).await.unwrap();
        let exchange = FakeRefresher::granting("renewed", Duration::days(60));
        let alerts = AlertSink::new(store.clone());

        let summary = refresh_social_tokens(store.as_ref(), &PlainCipher, &exchange, &alerts)
            .await
            .unwrap();

        assert_eq!(summary, RefreshSummary { refreshed: 1, failed: 0 });
        assert_eq!(*exchange.calls.lock().unwrap(), vec!["soon-token".to_string()]);
        let accounts = store.active_social_accounts().await.unwrap();
        let renewed = accounts.iter().find(|a| a.id == soon.id).unwrap();
        assert_eq!(renewed.access_token_enc, "enc:renewed");
    }

    #[tokio::test]
    async fn social_sweep_alerts_and_continues_on_failure() {
        let store = Arc::new(MemoryStore::new());
        let tenant = testutil::tenant();
        store.insert_tenant(&tenant).await.unwrap();
        store
            .upsert_social_account(&social(tenant.id, "a", Duration::days(1)))
            .await
            .unwrap();
        store
            .upsert_social_account(&social(tenant.id, "b", Duration::days(2)))
            .await
            .unwrap();
        let exchange = FakeRefresher {
            grant: Err(OAuthError::Status(400)),
            calls: Default::default(),
        };
        let alerts = AlertSink::new(store.clone());

        let summary = refresh_social_tokens(store.as_ref(), &PlainCipher, &exchange, &alerts)
            .await
            .unwrap();

        assert_eq!(summary, RefreshSummary { refreshed: 0, failed: 2 });
        let raised = store.list_alerts(Some(tenant.id)).await.unwrap();
        assert_eq!(raised.len(), 2);
        assert!(raised.iter().all(|a| a.alert_type == "instagram_token_expiring"
            && a.severity == Severity::Critical));
    }
}
