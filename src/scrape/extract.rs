use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use url::Url;

const FALLBACK_HASH_LEN: usize = 16;
const IMAGE_ATTRS: [&str; 3] = ["src", "data-src", "data-original"];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static LOOSE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})/(\d{1,2})/(\d{1,2})").expect("date regex"));

pub fn collapse_ws(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Stable id for items without a natural one: `{prefix}_` followed by the
/// first 16 hex chars of SHA-256 over the sorted, compact JSON of the fields.
pub fn fallback_id(prefix: &str, fields: &[(&str, &str)]) -> String {
    let normalized: BTreeMap<&str, String> = fields
        .iter()
        .map(|(key, value)| (*key, collapse_ws(value)))
        .collect();
    let payload = serde_json::to_string(&normalized).unwrap_or_default();
    let digest = hex::encode(Sha256::digest(payload.as_bytes()));
    format!("{prefix}_{}", &digest[..FALLBACK_HASH_LEN])
}

/// Drops query and fragment so resize variants of one image compare equal.
pub fn normalize_image_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.into()
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or(raw)
            .to_string(),
    }
}

/// Midnight UTC of the first `YYYY/M/D` in `text`.
pub fn parse_blog_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = LOOSE_DATE.captures(text)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

/// `"SalonName 【Title】"` becomes `"【Title】"`.
pub fn strip_salon_prefix(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find('【') {
        Some(idx) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

pub fn clean_style_title(alt: &str) -> Option<String> {
    let title = strip_salon_prefix(alt);
    let title = title
        .strip_prefix('【')
        .map(|rest| rest.split('】').next().unwrap_or(rest))
        .unwrap_or(&title);
    let title = collapse_ws(title);
    (!title.is_empty()).then_some(title)
}

pub fn first_match(pattern: &Regex, text: &str) -> Option<String> {
    pattern.find(text).map(|m| m.as_str().to_string())
}

pub fn image_source(element: ElementRef<'_>) -> Option<String> {
    IMAGE_ATTRS
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty())
        .map(str::to_string)
}

pub fn element_text(element: ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Keeps the first item for every key, in order.
pub fn dedup_by_key<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fallback_id_is_stable_and_order_independent() {
        let a = fallback_id("hp_coupon", &[("title", "Cut  +\nColor"), ("body", "¥5,000")]);
        let b = fallback_id("hp_coupon", &[("body", "¥5,000 "), ("title", "Cut + Color")]);
        assert_eq!(a, b);
        assert!(a.starts_with("hp_coupon_"));
        assert_eq!(a.len(), "hp_coupon_".len() + 16);

        // sha256 of {"body":"x","title":"y"}
        let known = fallback_id("hp_style", &[("title", "y"), ("body", "x")]);
        let expected = hex::encode(Sha256::digest(br#"{"body":"x","title":"y"}"#));
        assert_eq!(known, format!("hp_style_{}", &expected[..16]));
    }

    #[test]
    fn image_urls_lose_query_and_fragment() {
        assert_eq!(
            normalize_image_url("https://imgbp.example.com/a/b.jpg?impolicy=resize&w=300#x"),
            "https://imgbp.example.com/a/b.jpg"
        );
        assert_eq!(normalize_image_url("not a url?x=1"), "not a url");
    }

    #[test]
    fn blog_dates_parse_loosely() {
        assert_eq!(
            parse_blog_date("投稿日：2026/2/3"),
            Some(Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_blog_date("2026/13/45"), None);
        assert_eq!(parse_blog_date(""), None);
    }

    #[test]
    fn style_titles_drop_salon_prefix() {
        assert_eq!(strip_salon_prefix("Salon ABC 【ナチュラルボブ】"), "【ナチュラルボブ】");
        assert_eq!(
            clean_style_title("Salon ABC 【ナチュラルボブ】").as_deref(),
            Some("ナチュラルボブ")
        );
        assert_eq!(clean_style_title("  Short layer ").as_deref(), Some("Short layer"));
        assert_eq!(clean_style_title("   "), None);
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let items: Vec<String> = ["b", "a", "b", "c", "a"].map(String::from).to_vec();
        let out = dedup_by_key(items, |s| s.as_str());
        assert_eq!(out, vec!["b", "a", "c"]);
    }
}
