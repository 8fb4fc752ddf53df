use crate::scrape::ScrapeError;
use serde::{Deserialize, de::DeserializeOwned};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BlogSelectors {
    pub article_link: String,
    pub paging: String,
    pub title: String,
    pub body: String,
    pub images: String,
    pub published_at: String,
}

impl Default for BlogSelectors {
    fn default() -> Self {
        Self {
            article_link: "a[href*='/blog/bid']".into(),
            paging: "div.paging, p.pa".into(),
            title: "h1, h2".into(),
            body: "div.blogDetailText, article".into(),
            images: "img".into(),
            published_at: "time, p.blogDetailDate".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StyleSelectors {
    pub item: String,
    pub image: String,
    pub link: String,
    pub paging: String,
}

impl Default for StyleSelectors {
    fn default() -> Self {
        Self {
            item: "li.dibBL, li".into(),
            image: "img".into(),
            link: "a[href*='/style/L']".into(),
            paging: "div.paging, p.pa".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CouponSelectors {
    pub item: String,
    pub title: String,
    pub body: String,
    pub link: String,
    pub paging: String,
}

impl Default for CouponSelectors {
    fn default() -> Self {
        Self {
            item: "table.couponTbl, li".into(),
            title: "h3, p.couponMenuName".into(),
            body: "p".into(),
            link: "a[href]".into(),
            paging: "div.paging, p.pa".into(),
        }
    }
}

/// CSS selectors for every source. Built-in defaults, overridable per
/// source by `<dir>/<source>.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorSet {
    pub blog: BlogSelectors,
    pub style: StyleSelectors,
    pub coupon: CouponSelectors,
}

impl SelectorSet {
    pub fn load(dir: Option<&Path>) -> Result<Self, ScrapeError> {
        let Some(dir) = dir else {
            return Ok(Self::default());
        };
        Ok(Self {
            blog: load_file(dir, "blog")?,
            style: load_file(dir, "style")?,
            coupon: load_file(dir, "coupon")?,
        })
    }
}

fn load_file<T: DeserializeOwned + Default>(dir: &Path, source: &str) -> Result<T, ScrapeError> {
    let path = dir.join(format!("{source}.yaml"));
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|err| ScrapeError::SelectorFile {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    parse_overrides(&raw).map_err(|message| ScrapeError::SelectorFile {
        path: path.display().to_string(),
        message,
    })
}

fn parse_overrides<T: DeserializeOwned + Default>(raw: &str) -> Result<T, String> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let parsed: CouponSelectors = parse_overrides("item: div.coupon\ntitle: h4\n").unwrap();
        assert_eq!(parsed.item, "div.coupon");
        assert_eq!(parsed.title, "h4");
        assert_eq!(parsed.body, CouponSelectors::default().body);
    }

    #[test]
    fn empty_file_means_defaults() {
        let parsed: BlogSelectors = parse_overrides("   \n").unwrap();
        assert_eq!(parsed, BlogSelectors::default());
    }

    #[test]
    fn missing_directory_uses_builtins() {
        let set = SelectorSet::load(Some(Path::new("/nonexistent/selectors"))).unwrap();
        assert_eq!(set, SelectorSet::default());
    }

    #[test]
    fn builtin_selectors_compile() {
        let set = SelectorSet::default();
        for css in [
            &set.blog.article_link,
            &set.blog.paging,
            &set.blog.body,
            &set.style.item,
            &set.style.link,
            &set.coupon.item,
            &set.coupon.title,
        ] {
            assert!(crate::scrape::compile(css).is_ok(), "{css}");
        }
    }
}
