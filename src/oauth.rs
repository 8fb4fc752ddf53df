//! OAuth plumbing shared by the Google (GBP) and Meta (Instagram) flows,
//! plus the Google client itself.

use crate::{
    gbp::config::{
        GOOGLE_AUTH_URL, GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET, GOOGLE_OAUTH_SCOPES,
        GOOGLE_REDIRECT_URI, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL,
    },
    http::build_client,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

const GOOGLE_DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OAuthError {
    #[error("oauth setting {0} is not configured")]
    MissingSetting(&'static str),
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("oauth endpoint returned HTTP {0}")]
    Status(u16),
    #[error("oauth response did not include {0}")]
    MissingField(&'static str),
}

impl OAuthError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Request(err.to_string()),
        }
    }
}

/// Tokens returned by any of the exchange endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenPayload {
    pub(crate) fn into_grant(
        self,
        default_ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(OAuthError::MissingField("access_token"))?;
        let ttl = self.expires_in.filter(|s| *s > 0).unwrap_or(default_ttl_secs);
        Ok(TokenGrant {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at: now + Duration::seconds(ttl),
        })
    }
}

/// Exchanges a stored refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;
}

/// Authorization-code half of the Google flow: consent URL, code exchange
/// and the account email the connection is keyed by.
#[async_trait]
pub trait GoogleLogin: Send + Sync {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError>;
    async fn fetch_user_email(&self, access_token: &str) -> Result<String, OAuthError>;
}

/// Client registration shared by the authorize and token endpoints.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
}

impl OAuthApp {
    fn require(&self) -> Result<(), OAuthError> {
        if self.client_id.is_empty() {
            return Err(OAuthError::MissingSetting("client_id"));
        }
        if self.client_secret.is_empty() {
            return Err(OAuthError::MissingSetting("client_secret"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct GoogleOAuth {
    client: Client,
    app: OAuthApp,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuth {
    pub fn from_env() -> Self {
        let app = OAuthApp {
            client_id: GOOGLE_CLIENT_ID.clone(),
            client_secret: GOOGLE_CLIENT_SECRET.clone(),
            redirect_uri: GOOGLE_REDIRECT_URI.clone(),
            scopes: GOOGLE_OAUTH_SCOPES.clone(),
        };
        Self::new(build_client(), app)
    }

    pub fn new(client: Client, app: OAuthApp) -> Self {
        Self {
            client,
            app,
            auth_url: GOOGLE_AUTH_URL.clone(),
            token_url: GOOGLE_TOKEN_URL.clone(),
            userinfo_url: GOOGLE_USERINFO_URL.clone(),
        }
    }

    pub fn with_endpoints(mut self, token_url: &str, userinfo_url: &str) -> Self {
        self.token_url = token_url.to_string();
        self.userinfo_url = userinfo_url.to_string();
        self
    }
}

#[async_trait]
impl GoogleLogin for GoogleOAuth {
    /// Consent URL requesting offline access so Google issues a refresh token.
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        if self.app.client_id.is_empty() {
            return Err(OAuthError::MissingSetting("client_id"));
        }
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.app.client_id.as_str()),
                ("redirect_uri", self.app.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.app.scopes.trim()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|err| OAuthError::Request(err.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError> {
        self.app.require()?;
        let form = [
            ("client_id", self.app.client_id.as_str()),
            ("client_secret", self.app.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.app.redirect_uri.as_str()),
        ];
        self.post_token(&form).await
    }

    async fn fetch_user_email(&self, access_token: &str) -> Result<String, OAuthError> {
        #[derive(Deserialize)]
        struct UserInfo {
            #[serde(default)]
            email: Option<String>,
        }
        let info: UserInfo = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(OAuthError::from_reqwest)?
            .json()
            .await
            .map_err(|err| OAuthError::Request(err.to_string()))?;
        info.email
            .filter(|e| !e.is_empty())
            .ok_or(OAuthError::MissingField("email"))
    }
}

impl GoogleOAuth {
    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant, OAuthError> {
        let payload: TokenPayload = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(OAuthError::from_reqwest)?
            .json()
            .await
            .map_err(|err| OAuthError::Request(err.to_string()))?;
        payload.into_grant(GOOGLE_DEFAULT_TTL_SECS, Utc::now())
    }
}

#[async_trait]
impl TokenRefresher for GoogleOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        self.app.require()?;
        let form = [
            ("client_id", self.app.client_id.as_str()),
            ("client_secret", self.app.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let mut grant = self.post_token(&form).await?;
        // Google does not rotate refresh tokens on this grant.
        grant.refresh_token = None;
        info!(
            target = "salon_gbp.tokens",
            expires_at = %grant.expires_at,
            "google_token_refreshed"
        );
        Ok(grant)
    }
}
