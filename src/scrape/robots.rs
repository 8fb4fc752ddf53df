use lru::LruCache;
use reqwest::Client;
use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Allow/disallow rules from one robots.txt that apply to our user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(content: &str, user_agent: &str) -> Self {
        let agent = user_agent.to_lowercase();
        let mut rules = Self::default();
        let mut applies = false;
        let mut matched_specific = false;
        let mut in_agent_block = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match directive.trim().to_lowercase().as_str() {
                "user-agent" => {
                    let named = value.to_lowercase();
                    let hit = if named == "*" {
                        !matched_specific
                    } else if !named.is_empty() && agent.contains(&named) {
                        if !matched_specific {
                            rules = Self::default();
                        }
                        matched_specific = true;
                        true
                    } else {
                        false
                    };
                    // consecutive user-agent lines share one group
                    applies = if in_agent_block { applies || hit } else { hit };
                    in_agent_block = true;
                }
                "allow" => {
                    in_agent_block = false;
                    if applies && !value.is_empty() {
                        rules.allow.push(value.to_string());
                    }
                }
                "disallow" => {
                    in_agent_block = false;
                    if applies && !value.is_empty() {
                        rules.disallow.push(value.to_string());
                    }
                }
                _ => in_agent_block = false,
            }
        }
        rules
    }

    /// Longest matching pattern wins; ties go to allow.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|pattern| path_matches(path, pattern))
                .map(String::len)
                .max()
                .unwrap_or(0)
        };
        longest(&self.allow) >= longest(&self.disallow)
    }
}

fn path_matches(path: &str, pattern: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    if !pattern.contains('*') {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let mut pos = 0;
    for (idx, part) in pattern.split('*').enumerate() {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(found) if idx == 0 && found != 0 => return false,
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }
    !anchored || pattern.ends_with('*') || pos == path.len()
}

#[derive(Debug, Clone)]
struct CachedRobots {
    rules: RobotsRules,
    fetched_at: Instant,
}

/// Outcome of one robots.txt fetch attempt.
#[derive(Debug)]
pub enum RobotsFetch {
    Body(String),
    /// The origin answered with a status of 400 or above.
    Missing,
    Failed(String),
}

pub const ROBOTS_CACHE_CAPACITY: usize = 1000;

/// Per-origin robots.txt cache with a TTL, holding at most `capacity`
/// origins. Constructed once and shared.
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: impl Into<String>, ttl: Duration) -> Self {
        Self::with_capacity(client, user_agent, ttl, ROBOTS_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        client: Client,
        user_agent: impl Into<String>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            user_agent: user_agent.into(),
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn allows(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let rules = self.rules_for(&origin).await;
        let target = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        rules.is_allowed(&target)
    }

    async fn rules_for(&self, origin: &str) -> RobotsRules {
        let previous = {
            let mut guard = self.entries.lock().await;
            match guard.get(origin) {
                Some(entry) if entry.fetched_at.elapsed() < self.ttl => return entry.rules.clone(),
                other => other.map(|entry| entry.rules.clone()),
            }
        };

        let outcome = self.fetch(origin).await;
        let rules = next_rules(previous, outcome, &self.user_agent, origin);
        self.entries.lock().await.put(
            origin.to_string(),
            CachedRobots {
                rules: rules.clone(),
                fetched_at: Instant::now(),
            },
        );
        rules
    }

    async fn fetch(&self, origin: &str) -> RobotsFetch {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(err) => return RobotsFetch::Failed(err.to_string()),
        };
        if response.status().as_u16() >= 400 {
            return RobotsFetch::Missing;
        }
        match response.text().await {
            Ok(body) => RobotsFetch::Body(body),
            Err(err) => RobotsFetch::Failed(err.to_string()),
        }
    }
}

/// A failed refresh keeps the stale rules when there are any.
fn next_rules(
    previous: Option<RobotsRules>,
    outcome: RobotsFetch,
    user_agent: &str,
    origin: &str,
) -> RobotsRules {
    match outcome {
        RobotsFetch::Body(body) => RobotsRules::parse(&body, user_agent),
        RobotsFetch::Missing => {
            debug!(target = "salon_gbp.scrape", origin, "robots_missing_allow_all");
            RobotsRules::allow_all()
        }
        RobotsFetch::Failed(error) => {
            warn!(target = "salon_gbp.scrape", origin, error = %error, "robots_fetch_failed");
            previous.unwrap_or_else(RobotsRules::allow_all)
        }
    }
}
