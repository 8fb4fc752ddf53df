use crate::{
    scrape::{
        PageFetcher, PageLimits, ScrapeError, compile,
        extract::{element_text, fallback_id, first_match},
        pagination::{Keyed, walk_pages},
        selectors::CouponSelectors,
    },
    text::resolve_url,
};
use once_cell::sync::Lazy;
use regex::Regex;

static COUPON_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"CP\d+").expect("coupon id regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponItem {
    pub source_id: String,
    pub title: String,
    pub body_text: String,
    pub url: String,
}

impl Keyed for CouponItem {
    fn key(&self) -> &str {
        &self.source_id
    }
}

pub async fn fetch_coupons(
    fetcher: &dyn PageFetcher,
    list_url: &str,
    limits: PageLimits,
    selectors: &CouponSelectors,
) -> Result<Vec<CouponItem>, ScrapeError> {
    let item_sel = compile(&selectors.item)?;
    let title_sel = compile(&selectors.title)?;
    let body_sel = compile(&selectors.body)?;
    let link_sel = compile(&selectors.link)?;
    let paging = compile(&selectors.paging)?;

    walk_pages(fetcher, list_url, limits, &paging, |doc, page_url| {
        let mut out = Vec::new();
        for item in doc.select(&item_sel) {
            let title = item
                .select(&title_sel)
                .next()
                .map(|el| element_text(el, ""))
                .unwrap_or_default();
            let body_text = item
                .select(&body_sel)
                .next()
                .map(|el| element_text(el, "\n"))
                .unwrap_or_default();
            if title.is_empty() && body_text.is_empty() {
                continue;
            }
            let href = item
                .select(&link_sel)
                .filter_map(|anchor| anchor.value().attr("href"))
                .map(str::trim)
                .find(|href| !href.is_empty());
            let natural_id = href.and_then(|href| first_match(&COUPON_ID, href));
            let url = href
                .and_then(|href| resolve_url(page_url, href))
                .unwrap_or_else(|| list_url.to_string());
            let source_id = natural_id.unwrap_or_else(|| {
                fallback_id(
                    "hp_coupon",
                    &[("title", title.as_str()), ("body", body_text.as_str())],
                )
            });
            out.push(CouponItem {
                source_id,
                title,
                body_text,
                url,
            });
        }
        out
    })
    .await
}
