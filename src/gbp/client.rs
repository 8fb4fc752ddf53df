use crate::{
    gbp::config::GBP_API_BASE,
    http::build_client,
    models::{MediaKind, PostKind, PublishJob},
};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::{debug, warn};
use urlencoding::encode;

pub const ACCOUNTS_PAGE_SIZE: u32 = 20;
pub const LOCATIONS_PAGE_SIZE: u32 = 100;
pub const MAX_LIST_PAGES: usize = 50;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GbpError {
    #[error("GBP API error: {status}")]
    Status { status: u16 },
    #[error("GBP request failed: {0}")]
    Request(String),
    #[error("unexpected GBP response: {0}")]
    Decode(String),
}

impl GbpError {
    /// HTTP status when the API answered with an error code.
    pub fn status(&self) -> Option<u16> {
        match self {
            GbpError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbpLocationInfo {
    pub account_id: String,
    pub location_id: String,
    pub location_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalPostBody {
    pub language_code: &'static str,
    pub summary: String,
    pub topic_type: PostKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<PostMedia>,
    pub call_to_action: Option<CallToAction>,
    pub offer: Option<Offer>,
    pub event: Option<Event>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostMedia {
    pub media_format: MediaKind,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallToAction {
    pub action_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub redeem_online_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Event {
    pub title: String,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub start_date: WireDate,
    pub end_date: WireDate,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WireDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl From<NaiveDate> for WireDate {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }
}

impl LocalPostBody {
    /// Wire body for a job; `image_url` is the public URL of its asset when
    /// that asset is available.
    pub fn from_job(job: &PublishJob, image_url: Option<String>) -> Self {
        let call_to_action = match (&job.cta_type, &job.cta_url) {
            (Some(action_type), Some(url)) if !action_type.is_empty() && !url.is_empty() => {
                Some(CallToAction {
                    action_type: action_type.clone(),
                    url: url.clone(),
                })
            }
            _ => None,
        };
        let offer = match (job.kind, &job.offer_redeem_url) {
            (PostKind::Offer, Some(url)) if !url.is_empty() => Some(Offer {
                redeem_online_url: url.clone(),
            }),
            _ => None,
        };
        let event = match (
            job.kind,
            &job.event_title,
            job.event_start_date,
            job.event_end_date,
        ) {
            (PostKind::Offer | PostKind::Event, Some(title), Some(start), Some(end)) => {
                Some(Event {
                    title: title.clone(),
                    schedule: Schedule {
                        start_date: start.into(),
                        end_date: end.into(),
                    },
                })
            }
            _ => None,
        };
        Self {
            language_code: "ja",
            summary: job.summary_final.clone(),
            topic_type: job.kind,
            media: image_url
                .into_iter()
                .map(|source_url| PostMedia {
                    media_format: MediaKind::Photo,
                    source_url,
                })
                .collect(),
            call_to_action,
            offer,
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaBody {
    pub media_format: MediaKind,
    pub source_url: String,
    pub location_association: LocationAssociation,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocationAssociation {
    pub category: String,
}

impl MediaBody {
    pub fn new(media_format: MediaKind, source_url: &str, category: &str) -> Self {
        Self {
            media_format,
            source_url: source_url.to_string(),
            location_association: LocationAssociation {
                category: category.to_string(),
            },
        }
    }
}

/// The slice of the Business Profile API the pipeline talks to.
#[async_trait]
pub trait GbpApi: Send + Sync {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>, GbpError>;
    async fn list_locations(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<GbpLocationInfo>, GbpError>;
    /// Returns the created post's resource name.
    async fn create_local_post(
        &self,
        access_token: &str,
        account_id: &str,
        location_id: &str,
        body: &LocalPostBody,
    ) -> Result<String, GbpError>;
    /// Returns the created media item's resource name.
    async fn upload_media(
        &self,
        access_token: &str,
        account_id: &str,
        location_id: &str,
        body: &MediaBody,
    ) -> Result<String, GbpError>;
}

#[derive(Clone)]
pub struct GbpClient {
    client: Client,
    base: String,
}

impl GbpClient {
    pub fn from_env() -> Self {
        Self::new(build_client(), GBP_API_BASE.as_str())
    }

    pub fn new(client: Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GbpError> {
        let response = request
            .send()
            .await
            .map_err(|err| GbpError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GbpError::Status {
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| GbpError::Decode(err.to_string()))
    }

    /// Follows `nextPageToken` until exhausted or the page cap is hit.
    async fn paginate<P, T>(
        &self,
        url: &str,
        access_token: &str,
        page_size: u32,
        mut take: impl FnMut(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, GbpError>
    where
        P: DeserializeOwned,
    {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        for page in 0..MAX_LIST_PAGES {
            let mut query = vec![("pageSize", page_size.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self.client.get(url).bearer_auth(access_token).query(&query);
            let payload: P = self.send_json(request).await?;
            let (items, next) = take(payload);
            debug!(
                target = "salon_gbp.gbp",
                page = page + 1,
                items = items.len(),
                "gbp_list_page"
            );
            out.extend(items);
            match next.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(out),
            }
        }
        warn!(
            target = "salon_gbp.gbp",
            url = %url,
            max_pages = MAX_LIST_PAGES,
            "gbp_list_page_cap_reached"
        );
        Ok(out)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountsPage {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    account_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationsPage {
    #[serde(default)]
    locations: Vec<LocationEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    store_code: Option<String>,
}

#[derive(Deserialize)]
struct CreatedResource {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl CreatedResource {
    fn identifier(self) -> String {
        self.name
            .filter(|n| !n.is_empty())
            .or(self.id)
            .unwrap_or_default()
    }
}

fn account_id_from(entry: AccountEntry) -> Option<String> {
    let name = entry.name.or(entry.account_name).unwrap_or_default();
    match name.strip_prefix("accounts/") {
        Some(id) => Some(id.to_string()),
        None if !name.is_empty() => Some(name),
        None => None,
    }
}

fn location_from(account_id: &str, entry: LocationEntry) -> GbpLocationInfo {
    let name = entry.name.unwrap_or_default();
    let location_id = match name.split_once("locations/") {
        Some((_, id)) => id.to_string(),
        None => entry.location_id.unwrap_or(name),
    };
    GbpLocationInfo {
        account_id: account_id.to_string(),
        location_id,
        location_name: entry.location_name.or(entry.title).or(entry.store_code),
    }
}

#[async_trait]
impl GbpApi for GbpClient {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>, GbpError> {
        let url = format!("{}/accounts", self.base);
        self.paginate(&url, access_token, ACCOUNTS_PAGE_SIZE, |page: AccountsPage| {
            let ids = page.accounts.into_iter().filter_map(account_id_from).collect();
            (ids, page.next_page_token)
        })
        .await
    }

    async fn list_locations(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<GbpLocationInfo>, GbpError> {
        let url = format!("{}/accounts/{}/locations", self.base, encode(account_id));
        self.paginate(&url, access_token, LOCATIONS_PAGE_SIZE, |page: LocationsPage| {
            let locations = page
                .locations
                .into_iter()
                .map(|entry| location_from(account_id, entry))
                .filter(|loc| !loc.location_id.is_empty())
                .collect();
            (locations, page.next_page_token)
        })
        .await
    }

    async fn create_local_post(
        &self,
        access_token: &str,
        account_id: &str,
        location_id: &str,
        body: &LocalPostBody,
    ) -> Result<String, GbpError> {
        let url = format!(
            "{}/accounts/{}/locations/{}/localPosts",
            self.base,
            encode(account_id),
            encode(location_id)
        );
        let request = self.client.post(url).bearer_auth(access_token).json(body);
        let created: CreatedResource = self.send_json(request).await?;
        Ok(created.identifier())
    }

    async fn upload_media(
        &self,
        access_token: &str,
        account_id: &str,
        location_id: &str,
        body: &MediaBody,
    ) -> Result<String, GbpError> {
        let url = format!(
            "{}/accounts/{}/locations/{}/media",
            self.base,
            encode(account_id),
            encode(location_id)
        );
        let request = self.client.post(url).bearer_auth(access_token).json(body);
        let created: CreatedResource = self.send_json(request).await?;
        Ok(created.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::JobStatus, testutil};
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn offer_post_body_carries_offer_and_event() {
        let mut job = testutil::publish_job(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            JobStatus::Queued,
        );
        job.kind = PostKind::Offer;
        job.cta_type = None;
        job.offer_redeem_url = Some("https://beauty.example.jp/slnH000123/coupon/".into());
        job.event_title = Some("学割U24 [全員] ¥12,990".into());
        job.event_start_date = NaiveDate::from_ymd_opt(2026, 4, 1);
        job.event_end_date = NaiveDate::from_ymd_opt(2026, 5, 1);

        let body = LocalPostBody::from_job(&job, Some("https://cdn.example/a.jpg".into()));
        let wire = serde_json::to_value(&body).unwrap();
        assert_eq!(wire["languageCode"], "ja");
        assert_eq!(wire["topicType"], "OFFER");
        assert_eq!(wire["media"][0]["mediaFormat"], "PHOTO");
        assert_eq!(
            wire["offer"]["redeemOnlineUrl"],
            "https://beauty.example.jp/slnH000123/coupon/"
        );
        assert_eq!(wire["event"]["schedule"]["endDate"], json!({"year": 2026, "month": 5, "day": 1}));
        assert!(wire.get("callToAction").is_none());
    }

    #[test]
    fn standard_post_body_omits_offer_fields() {
        let job = testutil::publish_job(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            JobStatus::Queued,
        );
        let wire = serde_json::to_value(LocalPostBody::from_job(&job, None)).unwrap();
        assert_eq!(wire["topicType"], "STANDARD");
        assert_eq!(wire["callToAction"]["actionType"], "LEARN_MORE");
        assert!(wire.get("media").is_none());
        assert!(wire.get("offer").is_none());
        assert!(wire.get("event").is_none());
    }

    #[test]
    fn media_body_matches_wire_shape() {
        let body = MediaBody::new(MediaKind::Photo, "https://salon.example/media/a.jpg", "ADDITIONAL");
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({
                "mediaFormat": "PHOTO",
                "sourceUrl": "https://salon.example/media/a.jpg",
                "locationAssociation": {"category": "ADDITIONAL"}
            })
        );
    }

    #[tokio::test]
    async fn list_accounts_follows_page_tokens() {
        async fn accounts(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(q["pageSize"], "20");
            match q.get("pageToken").map(String::as_str) {
                None => Json(json!({
                    "accounts": [{"name": "accounts/111"}, {"accountName": "222"}],
                    "nextPageToken": "p2"
                })),
                Some("p2") => Json(json!({"accounts": [{"name": "accounts/333"}]})),
                Some(other) => panic!("unexpected token {other}"),
            }
        }
        let base = serve(Router::new().route("/accounts", get(accounts))).await;
        let client = GbpClient::new(Client::new(), &base);
        assert_eq!(
            client.list_accounts("token").await.unwrap(),
            vec!["111", "222", "333"]
        );
    }

    #[tokio::test]
    async fn list_locations_extracts_ids_and_names() {
        async fn locations(Path(account): Path<String>) -> Json<Value> {
            Json(json!({
                "locations": [
                    {"name": format!("accounts/{account}/locations/9001"), "locationName": "Shibuya"},
                    {"locationId": "9002", "storeCode": "SJK"}
                ]
            }))
        }
        let base = serve(Router::new().route("/accounts/{account}/locations", get(locations))).await;
        let client = GbpClient::new(Client::new(), &base);
        let found = client.list_locations("token", "111").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].location_id, "9001");
        assert_eq!(found[0].location_name.as_deref(), Some("Shibuya"));
        assert_eq!(found[1].location_id, "9002");
        assert_eq!(found[1].location_name.as_deref(), Some("SJK"));
    }

    #[tokio::test]
    async fn create_post_returns_name_and_surfaces_status() {
        async fn created() -> Json<Value> {
            Json(json!({"name": "accounts/1/locations/2/localPosts/abc"}))
        }
        async fn limited() -> StatusCode {
            StatusCode::TOO_MANY_REQUESTS
        }
        let base = serve(
            Router::new()
                .route("/accounts/1/locations/2/localPosts", post(created))
                .route("/accounts/1/locations/3/localPosts", post(limited)),
        )
        .await;
        let client = GbpClient::new(Client::new(), &base);
        let job = testutil::publish_job(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            JobStatus::Posting,
        );
        let body = LocalPostBody::from_job(&job, None);

        let name = client.create_local_post("t", "1", "2", &body).await.unwrap();
        assert_eq!(name, "accounts/1/locations/2/localPosts/abc");

        let err = client.create_local_post("t", "1", "3", &body).await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.to_string(), "GBP API error: 429");
    }
}
