//! GBP connections and the locations they expose, plus the Instagram
//! account link. Every entry point is tenant-scoped; OAuth callbacks recover
//! the tenant from the signed `state`.

use crate::{
    alerts::AlertSink,
    crypto::CryptoError,
    gbp::{GbpApi, GbpError},
    meta::InstagramLogin,
    models::{Connection, ConnectionStatus, Location, Severity, SocialAccount},
    oauth::{GoogleLogin, OAuthError},
    security::{StateError, StateSigner},
    store::{Store, StoreError},
    tokens::{TokenError, TokenManager},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Gbp(#[from] GbpError),
    #[error("no Instagram business account is linked to this login")]
    NoInstagramAccount,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LocationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => LocationError::NotFound { entity, id },
            other => LocationError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct LocationService {
    store: Arc<dyn Store>,
    gbp: Arc<dyn GbpApi>,
    tokens: TokenManager,
    google: Arc<dyn GoogleLogin>,
    instagram: Arc<dyn InstagramLogin>,
    states: StateSigner,
    alerts: AlertSink,
}

impl LocationService {
    pub fn new(
        store: Arc<dyn Store>,
        gbp: Arc<dyn GbpApi>,
        tokens: TokenManager,
        google: Arc<dyn GoogleLogin>,
        instagram: Arc<dyn InstagramLogin>,
        states: StateSigner,
        alerts: AlertSink,
    ) -> Self {
        Self {
            store,
            gbp,
            tokens,
            google,
            instagram,
            states,
            alerts,
        }
    }

    pub fn google_authorize_url(&self, tenant_id: Uuid) -> Result<String, LocationError> {
        let state = self.states.sign(tenant_id)?;
        Ok(self.google.authorize_url(&state)?)
    }

    pub fn instagram_authorize_url(&self, tenant_id: Uuid) -> Result<String, LocationError> {
        let state = self.states.sign(tenant_id)?;
        Ok(self.instagram.authorize_url(&state)?)
    }

    /// Finishes the Google consent round trip: exchanges the code, looks up
    /// the account email and upserts the connection keyed by it. Returns the
    /// tenant named in `state` with the stored connection.
    pub async fn connect_google(
        &self,
        state: &str,
        code: &str,
    ) -> Result<(Uuid, Connection), LocationError> {
        let tenant_id = self.states.verify(state)?.tenant_id;
        let grant = self.google.exchange_code(code).await?;
        let email = self.google.fetch_user_email(&grant.access_token).await?;
        let refresh_token = grant
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::MissingField("refresh_token"))?;
        let cipher = self.tokens.cipher();
        let connection = Connection {
            id: Uuid::new_v4(),
            email,
            access_token_enc: cipher.encrypt(&grant.access_token)?,
            refresh_token_enc: cipher.encrypt(refresh_token)?,
            token_expires_at: grant.expires_at,
            status: ConnectionStatus::Active,
        };
        let stored = self.store.upsert_connection(&connection).await?;
        info!(
            target = "salon_gbp.api",
            tenant_id = %tenant_id,
            connection_id = %stored.id,
            "gbp_connected"
        );
        Ok((tenant_id, stored))
    }

    /// Pulls every account and location visible to the connection and
    /// upserts them for the tenant. New rows start inactive.
    pub async fn sync_locations(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Vec<Location>, LocationError> {
        let connection = self
            .store
            .get_connection(connection_id)
            .await?
            .ok_or(LocationError::NotFound {
                entity: "connection",
                id: connection_id,
            })?;
        let token = self.tokens.access_token(&connection).await?;
        let discovered = match self.discover(&token).await {
            Ok(found) => found,
            Err(err) => {
                if err.status() == Some(401) {
                    self.expire(tenant_id, &connection).await;
                }
                return Err(err.into());
            }
        };

        let mut synced = Vec::with_capacity(discovered.len());
        for info in discovered {
            let location = Location {
                id: Uuid::new_v4(),
                tenant_id,
                connection_id: connection.id,
                account_id: info.account_id,
                location_id: info.location_id,
                display_name: info.location_name,
                is_active: false,
            };
            synced.push(self.store.upsert_location(&location).await?);
        }
        info!(
            target = "salon_gbp.api",
            tenant_id = %tenant_id,
            connection_id = %connection.id,
            locations = synced.len(),
            "locations_synced"
        );
        Ok(synced)
    }

    async fn discover(&self, token: &str) -> Result<Vec<crate::gbp::GbpLocationInfo>, GbpError> {
        let mut out = Vec::new();
        for account_id in self.gbp.list_accounts(token).await? {
            out.extend(self.gbp.list_locations(token, &account_id).await?);
        }
        Ok(out)
    }

    async fn expire(&self, tenant_id: Uuid, connection: &Connection) {
        if let Err(err) = self
            .store
            .set_connection_status(connection.id, ConnectionStatus::Expired)
            .await
        {
            warn!(
                target = "salon_gbp.api",
                connection_id = %connection.id,
                error = %err,
                "connection_expire_failed"
            );
        }
        self.alerts
            .raise(
                Some(tenant_id),
                Severity::Critical,
                "oauth_expired",
                format!("GBP connection {} was rejected; reconnect Google", connection.email),
                Some(("gbp_connection", connection.id)),
            )
            .await;
    }

    pub async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, LocationError> {
        Ok(self.store.list_locations(tenant_id).await?)
    }

    /// Makes `location_id` the tenant's only active location.
    pub async fn activate_location(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
    ) -> Result<Location, LocationError> {
        let location = self.store.activate_location(tenant_id, location_id).await?;
        info!(
            target = "salon_gbp.api",
            tenant_id = %tenant_id,
            location_id = %location.id,
            "location_activated"
        );
        Ok(location)
    }

    /// Finishes the Meta consent round trip: trades the code for a long-lived
    /// token and links every Instagram business account it can read.
    pub async fn connect_instagram(
        &self,
        state: &str,
        code: &str,
    ) -> Result<(Uuid, Vec<SocialAccount>), LocationError> {
        let tenant_id = self.states.verify(state)?.tenant_id;
        let short = self.instagram.exchange_code(code).await?;
        let long = self.instagram.exchange_long_lived(&short.access_token).await?;
        let found = self.instagram.discover_accounts(&long.access_token).await?;
        if found.is_empty() {
            return Err(LocationError::NoInstagramAccount);
        }
        let sealed = self.tokens.cipher().encrypt(&long.access_token)?;
        let mut linked = Vec::with_capacity(found.len());
        for account in found {
            let row = SocialAccount {
                id: Uuid::new_v4(),
                tenant_id,
                external_user_id: account.user_id,
                username: account.username,
                access_token_enc: sealed.clone(),
                token_expires_at: long.expires_at,
                is_active: true,
                sync_hashtags: false,
            };
            linked.push(self.store.upsert_social_account(&row).await?);
        }
        info!(
            target = "salon_gbp.api",
            tenant_id = %tenant_id,
            accounts = linked.len(),
            "instagram_connected"
        );
        Ok((tenant_id, linked))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLogin;
    use super::*;
    use crate::{
        gbp::{GbpLocationInfo, testing::FakeGbp},
        store::MemoryStore,
        testutil,
        tokens::testing::{FakeRefresher, PlainCipher},
    };
    use chrono::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: LocationService,
        states: StateSigner,
    }

    fn fixture(gbp: FakeGbp, login: FakeLogin) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tokens = TokenManager::new(
            store.clone(),
            Arc::new(PlainCipher),
            Arc::new(FakeRefresher::granting("fresh", Duration::hours(1))),
        );
        let login = Arc::new(login);
        let states = StateSigner::new("state-secret");
        let service = LocationService::new(
            store.clone(),
            Arc::new(gbp),
            tokens,
            login.clone(),
            login,
            states.clone(),
            AlertSink::new(store.clone()),
        );
        Fixture {
            store,
            service,
            states,
        }
    }

    fn gbp_with_two_accounts() -> FakeGbp {
        FakeGbp {
            accounts: vec!["1001".into(), "1002".into()],
            locations: vec![
                GbpLocationInfo {
                    account_id: "1001".into(),
                    location_id: "L-shibuya".into(),
                    location_name: Some("Lumière Shibuya".into()),
                },
                GbpLocationInfo {
                    account_id: "1002".into(),
                    location_id: "L-ginza".into(),
                    location_name: None,
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sync_upserts_inactive_rows_and_keeps_existing_flags() {
        let fx = fixture(gbp_with_two_accounts(), FakeLogin::default());
        let tenant = testutil::tenant();
        let connection = fx
            .store
            .upsert_connection(&testutil::connection(Duration::hours(1)))
            .await
            .unwrap();

        let first = fx.service.sync_locations(tenant.id, connection.id).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|l| !l.is_active));
        let ginza = first.iter().find(|l| l.location_id == "L-ginza").unwrap();
        fx.service.activate_location(tenant.id, ginza.id).await.unwrap();

        let second = fx.service.sync_locations(tenant.id, connection.id).await.unwrap();
        let again = second.iter().find(|l| l.location_id == "L-ginza").unwrap();
        assert_eq!(again.id, ginza.id);
        assert!(again.is_active);
        assert_eq!(fx.store.list_locations(tenant.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sync_for_unknown_connection_is_not_found() {
        let fx = fixture(FakeGbp::default(), FakeLogin::default());
        let err = fx
            .service
            .sync_locations(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::NotFound { entity: "connection", .. }));
    }

    #[tokio::test]
    async fn activating_another_tenants_location_is_not_found() {
        let fx = fixture(FakeGbp::default(), FakeLogin::default());
        let foreign = testutil::location(Uuid::new_v4(), false);
        fx.store.upsert_location(&foreign).await.unwrap();
        let err = fx
            .service
            .activate_location(Uuid::new_v4(), foreign.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn google_callback_upserts_connection_by_email() {
        let fx = fixture(FakeGbp::default(), FakeLogin::default());
        let tenant_id = Uuid::new_v4();
        let url = fx.service.google_authorize_url(tenant_id).unwrap();
        let state = url.split_once("state=").unwrap().1.to_string();

        let (tenant, first) = fx.service.connect_google(&state, "good-code").await.unwrap();
        assert_eq!(tenant, tenant_id);
        assert_eq!(first.email, "owner@salon.example");
        assert_eq!(first.access_token_enc, "enc:ya29.access");
        assert_eq!(first.refresh_token_enc, "enc:1//refresh");

        let (_, second) = fx.service.connect_google(&state, "good-code").await.unwrap();
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn google_callback_rejects_forged_state_and_missing_refresh_token() {
        let fx = fixture(
            FakeGbp::default(),
            FakeLogin {
                refresh_token: None,
                ..Default::default()
            },
        );
        let forged = StateSigner::new("other-secret").sign(Uuid::new_v4()).unwrap();
        let err = fx.service.connect_google(&forged, "good-code").await.unwrap_err();
        assert!(matches!(err, LocationError::State(StateError::Invalid)));

        let state = fx.states.sign(Uuid::new_v4()).unwrap();
        let err = fx.service.connect_google(&state, "good-code").await.unwrap_err();
        assert!(matches!(
            err,
            LocationError::OAuth(OAuthError::MissingField("refresh_token"))
        ));
    }

    #[tokio::test]
    async fn instagram_callback_links_accounts_with_long_lived_token() {
        let fx = fixture(FakeGbp::default(), FakeLogin::default());
        let tenant = testutil::tenant();
        let state = fx.states.sign(tenant.id).unwrap();

        let (tenant_id, linked) = fx.service.connect_instagram(&state, "good-code").await.unwrap();

        assert_eq!(tenant_id, tenant.id);
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].access_token_enc, "enc:ig-long");
        assert!(!linked[0].sync_hashtags);
        let active = fx.store.active_social_accounts().await.unwrap();
        assert_eq!(active[0].external_user_id, "17841400000");
    }

    #[tokio::test]
    async fn instagram_callback_without_business_account_fails() {
        let fx = fixture(
            FakeGbp::default(),
            FakeLogin {
                accounts: vec![],
                ..Default::default()
            },
        );
        let state = fx.states.sign(Uuid::new_v4()).unwrap();
        let err = fx.service.connect_instagram(&state, "good-code").await.unwrap_err();
        assert!(matches!(err, LocationError::NoInstagramAccount));
    }
}
