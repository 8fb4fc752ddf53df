use std::{env, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub port: u16,
    pub scraper: ScraperSettings,
    pub media: MediaSettings,
    pub task_max_retries: u32,
    pub queue_capacity: usize,
    pub worker_concurrency: usize,
    pub scrape_interval: Duration,
    pub selectors_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub user_agent: String,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub tenant_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub robots_ttl: Duration,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            user_agent: "SalonGBPSystem/0.1".to_string(),
            max_pages: 5,
            page_delay: Duration::from_millis(2000),
            tenant_delay: Duration::from_millis(5000),
            max_retries: 3,
            backoff_base: Duration::from_millis(5000),
            robots_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub root: PathBuf,
    pub public_path: String,
    pub public_base_url: String,
    pub retention_days: i64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./media"),
            public_path: "/media".to_string(),
            public_base_url: "http://localhost:8000".to_string(),
            retention_days: 30,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ScraperSettings::default();
        let max_retries = match env::var("SCRAPER_MAX_RETRIES") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v >= 1)
                .ok_or(ConfigError::Invalid {
                    key: "SCRAPER_MAX_RETRIES",
                    value: raw,
                })?,
            Err(_) => defaults.max_retries,
        };

        let scraper = ScraperSettings {
            user_agent: env::var("SCRAPER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            max_pages: env_or("SCRAPER_MAX_PAGES", defaults.max_pages).max(1),
            page_delay: Duration::from_millis(env_or("SCRAPER_PAGE_DELAY_MS", 2000)),
            tenant_delay: Duration::from_millis(env_or("SCRAPER_TENANT_DELAY_MS", 5000)),
            max_retries,
            backoff_base: Duration::from_millis(env_or("SCRAPER_BACKOFF_BASE_MS", 5000)),
            robots_ttl: Duration::from_secs(env_or("ROBOTS_TTL_SECS", 24 * 60 * 60)),
        };

        let media_defaults = MediaSettings::default();
        let media = MediaSettings {
            root: env::var("MEDIA_ROOT")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(media_defaults.root),
            public_path: env::var("MEDIA_PUBLIC_PATH")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(media_defaults.public_path),
            public_base_url: env::var("APP_PUBLIC_BASE_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(media_defaults.public_base_url),
            retention_days: env_or("MEDIA_RETENTION_DAYS", media_defaults.retention_days).max(1),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            port: env_or("PORT", 8000),
            scraper,
            media,
            task_max_retries: env_or("TASK_MAX_RETRIES", 5),
            queue_capacity: env_or("QUEUE_CAPACITY", 64usize).max(1),
            worker_concurrency: env_or("WORKER_CONCURRENCY", 4usize).max(1),
            scrape_interval: Duration::from_secs(env_or("SCRAPE_INTERVAL_SECS", 3600).max(60)),
            selectors_dir: env::var("SELECTORS_DIR").ok().map(PathBuf::from),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraper_defaults_match_documented_values() {
        let settings = ScraperSettings::default();
        assert_eq!(settings.user_agent, "SalonGBPSystem/0.1");
        assert_eq!(settings.max_pages, 5);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.page_delay, Duration::from_secs(2));
        assert_eq!(settings.robots_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        assert_eq!(env_or::<u32>("SALON_GBP_TEST_UNSET_VARIABLE", 7), 7);
    }
}
