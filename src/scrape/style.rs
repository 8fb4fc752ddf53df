use crate::{
    scrape::{
        PageFetcher, PageLimits, ScrapeError, compile,
        extract::{clean_style_title, fallback_id, image_source, normalize_image_url},
        pagination::{Keyed, walk_pages},
        selectors::StyleSelectors,
    },
    text::resolve_url,
};
use once_cell::sync::Lazy;
use regex::Regex;

static STYLE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(L\d+)").expect("style id regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleImage {
    pub source_id: String,
    pub page_url: String,
    pub image_url: String,
    pub title: Option<String>,
}

impl Keyed for StyleImage {
    fn key(&self) -> &str {
        &self.source_id
    }
}

pub async fn fetch_style_images(
    fetcher: &dyn PageFetcher,
    list_url: &str,
    limits: PageLimits,
    selectors: &StyleSelectors,
) -> Result<Vec<StyleImage>, ScrapeError> {
    let item_sel = compile(&selectors.item)?;
    let image_sel = compile(&selectors.image)?;
    let link_sel = compile(&selectors.link)?;
    let paging = compile(&selectors.paging)?;

    walk_pages(fetcher, list_url, limits, &paging, |doc, page_url| {
        let mut out = Vec::new();
        for item in doc.select(&item_sel) {
            let Some(img) = item.select(&image_sel).next() else {
                continue;
            };
            let Some(image_url) = image_source(img)
                .and_then(|src| resolve_url(page_url, &src))
                .map(|url| normalize_image_url(&url))
            else {
                continue;
            };
            let title = img.value().attr("alt").and_then(clean_style_title);
            let detail_url = item
                .select(&link_sel)
                .next()
                .and_then(|anchor| anchor.value().attr("href"))
                .and_then(|href| resolve_url(page_url, href.trim()));
            let natural_id = detail_url
                .as_deref()
                .and_then(|url| STYLE_ID.captures(url))
                .map(|caps| caps[1].to_string());
            let source_id = natural_id.unwrap_or_else(|| {
                fallback_id(
                    "hp_style",
                    &[
                        ("image_url", image_url.as_str()),
                        ("title", title.as_deref().unwrap_or("")),
                    ],
                )
            });
            out.push(StyleImage {
                source_id,
                page_url: detail_url.unwrap_or_else(|| page_url.to_string()),
                image_url,
                title,
            });
        }
        out
    })
    .await
}
