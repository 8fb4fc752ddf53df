use reqwest::{Client, ClientBuilder};
use std::time::Duration;

pub fn build_client() -> Client {
    configured(Client::builder())
}

/// Client for crawling salon pages; identifies itself with `user_agent`.
pub fn build_scraper_client(user_agent: &str) -> Client {
    configured(Client::builder().user_agent(user_agent))
}

fn configured(builder: ClientBuilder) -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(20);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    builder
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}
