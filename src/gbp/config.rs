use once_cell::sync::Lazy;
use std::env;

pub static GBP_API_BASE: Lazy<String> = Lazy::new(|| {
    env::var("GBP_API_BASE")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "https://mybusiness.googleapis.com/v4".to_string())
});

pub static GOOGLE_AUTH_URL: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_AUTH_URL")
        .unwrap_or_else(|_| "https://accounts.google.com/o/oauth2/v2/auth".to_string())
});

pub static GOOGLE_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_TOKEN_URL").unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string())
});

pub static GOOGLE_USERINFO_URL: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_USERINFO_URL")
        .unwrap_or_else(|_| "https://www.googleapis.com/oauth2/v2/userinfo".to_string())
});

pub static GOOGLE_CLIENT_ID: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_CLIENT_ID").unwrap_or_default());

pub static GOOGLE_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default());

pub static GOOGLE_REDIRECT_URI: Lazy<String> =
    Lazy::new(|| env::var("GOOGLE_REDIRECT_URI").unwrap_or_default());

pub static GOOGLE_OAUTH_SCOPES: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_OAUTH_SCOPES").unwrap_or_else(|_| {
        "https://www.googleapis.com/auth/business.manage openid email".to_string()
    })
});
