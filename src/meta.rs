//! Meta Graph API: Instagram login, long-lived token exchange and the
//! recent-media feed.

use crate::{
    http::build_client,
    oauth::{OAuthApp, OAuthError, TokenGrant, TokenPayload},
};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use thiserror::Error;
use url::Url;

pub static META_GRAPH_BASE: Lazy<String> = Lazy::new(|| {
    env::var("META_GRAPH_BASE")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string())
});

pub static META_AUTH_URL: Lazy<String> = Lazy::new(|| {
    env::var("META_AUTH_URL")
        .unwrap_or_else(|_| "https://www.facebook.com/v19.0/dialog/oauth".to_string())
});

const SHORT_LIVED_TTL_SECS: i64 = 3600;
const LONG_LIVED_TTL_SECS: i64 = 60 * 24 * 60 * 60;
const MEDIA_FIELDS: &str = "id,caption,media_type,media_url,thumbnail_url,timestamp,permalink";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("instagram feed request failed: {0}")]
    Request(String),
    #[error("instagram feed returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct InstagramMedia {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl InstagramMedia {
    /// Still image to attach to the post: the media itself for photos and
    /// albums, the thumbnail for videos.
    pub fn image_url(&self) -> Option<&str> {
        let media = self.media_url.as_deref().filter(|u| !u.is_empty());
        match self.media_type.as_deref() {
            Some("IMAGE" | "CAROUSEL_ALBUM") => media,
            Some("VIDEO") => self
                .thumbnail_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .or(media),
            _ => None,
        }
    }
}

/// Renews a long-lived social token before it lapses.
#[async_trait]
pub trait SocialTokenExchange: Send + Sync {
    async fn exchange_long_lived(&self, access_token: &str) -> Result<TokenGrant, OAuthError>;
}

/// Instagram business account reachable through one of the user's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstagramAccountRef {
    pub user_id: String,
    pub username: String,
}

/// Login half of the Meta flow: consent URL, code exchange and discovery of
/// the Instagram accounts the granted token can read.
#[async_trait]
pub trait InstagramLogin: SocialTokenExchange {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;
    /// Short-lived user token for the authorization code.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError>;
    async fn discover_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<InstagramAccountRef>, OAuthError>;
}

/// Most recent media of an Instagram business account.
#[async_trait]
pub trait MediaFeed: Send + Sync {
    async fn recent_media(
        &self,
        user_id: &str,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<InstagramMedia>, FeedError>;
}

#[derive(Clone)]
pub struct MetaClient {
    client: Client,
    app: OAuthApp,
    graph_base: String,
    auth_url: String,
}

impl MetaClient {
    pub fn from_env() -> Self {
        let app = OAuthApp {
            client_id: env::var("META_APP_ID").unwrap_or_default(),
            client_secret: env::var("META_APP_SECRET").unwrap_or_default(),
            redirect_uri: env::var("META_REDIRECT_URI").unwrap_or_default(),
            scopes: env::var("META_OAUTH_SCOPES").unwrap_or_else(|_| {
                "instagram_basic,pages_show_list,pages_read_engagement".to_string()
            }),
        };
        Self::new(build_client(), app, META_GRAPH_BASE.as_str())
    }

    pub fn new(client: Client, app: OAuthApp, graph_base: &str) -> Self {
        Self {
            client,
            app,
            graph_base: graph_base.trim_end_matches('/').to_string(),
            auth_url: META_AUTH_URL.clone(),
        }
    }

    fn require(&self) -> Result<(), OAuthError> {
        if self.app.client_id.is_empty() {
            return Err(OAuthError::MissingSetting("META_APP_ID"));
        }
        if self.app.client_secret.is_empty() {
            return Err(OAuthError::MissingSetting("META_APP_SECRET"));
        }
        Ok(())
    }

    async fn token_request(
        &self,
        query: &[(&str, &str)],
        default_ttl_secs: i64,
    ) -> Result<TokenGrant, OAuthError> {
        let payload: TokenPayload = self
            .client
            .get(format!("{}/oauth/access_token", self.graph_base))
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(OAuthError::from_reqwest)?
            .json()
            .await
            .map_err(|err| OAuthError::Request(err.to_string()))?;
        payload.into_grant(default_ttl_secs, Utc::now())
    }
}

#[async_trait]
impl InstagramLogin for MetaClient {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        if self.app.client_id.is_empty() {
            return Err(OAuthError::MissingSetting("META_APP_ID"));
        }
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.app.client_id.as_str()),
                ("redirect_uri", self.app.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.app.scopes.as_str()),
                ("state", state),
            ],
        )
        .map_err(|err| OAuthError::Request(err.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError> {
        self.require()?;
        let query = [
            ("client_id", self.app.client_id.as_str()),
            ("redirect_uri", self.app.redirect_uri.as_str()),
            ("client_secret", self.app.client_secret.as_str()),
            ("code", code),
        ];
        self.token_request(&query, SHORT_LIVED_TTL_SECS).await
    }

    async fn discover_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<InstagramAccountRef>, OAuthError> {
        #[derive(Deserialize)]
        struct Linked {
            #[serde(default)]
            id: String,
            #[serde(default)]
            username: Option<String>,
        }
        #[derive(Deserialize)]
        struct PageEntry {
            #[serde(default)]
            instagram_business_account: Option<Linked>,
        }
        #[derive(Deserialize)]
        struct Pages {
            #[serde(default)]
            data: Vec<PageEntry>,
        }
        let pages: Pages = self
            .client
            .get(format!("{}/me/accounts", self.graph_base))
            .query(&[
                ("fields", "id,name,instagram_business_account{id,username}"),
                ("access_token", access_token),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(OAuthError::from_reqwest)?
            .json()
            .await
            .map_err(|err| OAuthError::Request(err.to_string()))?;
        Ok(pages
            .data
            .into_iter()
            .filter_map(|page| page.instagram_business_account)
            .filter(|ig| !ig.id.is_empty())
            .map(|ig| InstagramAccountRef {
                username: ig
                    .username
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| ig.id.clone()),
                user_id: ig.id,
            })
            .collect())
    }
}

#[async_trait]
impl SocialTokenExchange for MetaClient {
    async fn exchange_long_lived(&self, access_token: &str) -> Result<TokenGrant, OAuthError> {
        self.require()?;
        let query = [
            ("grant_type", "fb_exchange_token"),
            ("client_id", self.app.client_id.as_str()),
            ("client_secret", self.app.client_secret.as_str()),
            ("fb_exchange_token", access_token),
        ];
        self.token_request(&query, LONG_LIVED_TTL_SECS).await
    }
}

#[async_trait]
impl MediaFeed for MetaClient {
    async fn recent_media(
        &self,
        user_id: &str,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<InstagramMedia>, FeedError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            data: Vec<InstagramMedia>,
        }
        let limit = limit.to_string();
        let response = self
            .client
            .get(format!("{}/{user_id}/media", self.graph_base))
            .query(&[
                ("fields", MEDIA_FIELDS),
                ("limit", limit.as_str()),
                ("access_token", access_token),
            ])
            .send()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }
        let page: Page = response
            .json()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))?;
        Ok(page.data.into_iter().filter(|m| !m.id.is_empty()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, routing::get};
    use chrono::Duration;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn app() -> OAuthApp {
        OAuthApp {
            client_id: "meta-app".into(),
            client_secret: "meta-secret".into(),
            redirect_uri: "https://salon.example/oauth/meta/callback".into(),
            scopes: "instagram_basic".into(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn video_posts_use_thumbnail() {
        let video = InstagramMedia {
            id: "1".into(),
            media_type: Some("VIDEO".into()),
            media_url: Some("https://cdn.example/v.mp4".into()),
            thumbnail_url: Some("https://cdn.example/v.jpg".into()),
            ..Default::default()
        };
        assert_eq!(video.image_url(), Some("https://cdn.example/v.jpg"));

        let album = InstagramMedia {
            id: "2".into(),
            media_type: Some("CAROUSEL_ALBUM".into()),
            media_url: Some("https://cdn.example/a.jpg".into()),
            ..Default::default()
        };
        assert_eq!(album.image_url(), Some("https://cdn.example/a.jpg"));

        let unknown = InstagramMedia {
            id: "3".into(),
            media_type: Some("REEL".into()),
            media_url: Some("https://cdn.example/r.mp4".into()),
            ..Default::default()
        };
        assert_eq!(unknown.image_url(), None);
    }

    #[tokio::test]
    async fn long_lived_exchange_defaults_to_sixty_days() {
        async fn token(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(q["grant_type"], "fb_exchange_token");
            assert_eq!(q["fb_exchange_token"], "short");
            Json(json!({"access_token": "long"}))
        }
        let base = serve(Router::new().route("/oauth/access_token", get(token))).await;
        let meta = MetaClient::new(Client::new(), app(), &base);
        let grant = meta.exchange_long_lived("short").await.unwrap();
        assert_eq!(grant.access_token, "long");
        assert!(grant.expires_at > Utc::now() + Duration::days(59));
    }

    #[tokio::test]
    async fn recent_media_requests_limit_and_drops_blank_ids() {
        async fn media(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(q["limit"], "10");
            assert_eq!(q["access_token"], "ig-token");
            Json(json!({"data": [
                {"id": "178", "caption": "新色 #ヘアカラー", "media_type": "IMAGE",
                 "media_url": "https://cdn.example/1.jpg", "permalink": "https://instagram.com/p/1"},
                {"caption": "missing id"}
            ]}))
        }
        let base = serve(Router::new().route("/{user}/media", get(media))).await;
        let meta = MetaClient::new(Client::new(), app(), &base);
        let items = meta.recent_media("1784", "ig-token", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "178");
        assert_eq!(items[0].permalink.as_deref(), Some("https://instagram.com/p/1"));
    }

    #[tokio::test]
    async fn discovery_keeps_pages_with_linked_instagram() {
        async fn accounts(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(q["access_token"], "long");
            Json(json!({"data": [
                {"id": "p1", "instagram_business_account": {"id": "1784", "username": "salon.lumiere"}},
                {"id": "p2"},
                {"id": "p3", "instagram_business_account": {"id": "1785"}}
            ]}))
        }
        let base = serve(Router::new().route("/me/accounts", get(accounts))).await;
        let meta = MetaClient::new(Client::new(), app(), &base);
        let found = meta.discover_accounts("long").await.unwrap();
        assert_eq!(
            found,
            vec![
                InstagramAccountRef {
                    user_id: "1784".into(),
                    username: "salon.lumiere".into()
                },
                InstagramAccountRef {
                    user_id: "1785".into(),
                    username: "1785".into()
                },
            ]
        );
    }
}
