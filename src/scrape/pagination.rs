use crate::scrape::{PageFetcher, ScrapeError};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::{collections::HashSet, time::Duration};
use tracing::{debug, warn};

static PAGE_INDICATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)\s*ページ").expect("page indicator regex"));

/// Anything a list page yields that carries a dedup key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for String {
    fn key(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub max_pages: u32,
    pub page_delay: Duration,
}

impl PageLimits {
    pub fn new(max_pages: u32, page_delay: Duration) -> Self {
        Self {
            max_pages: max_pages.max(1),
            page_delay,
        }
    }
}

/// Fetches page 1, reads the `X/Y ページ` indicator, then walks pages 2..=min(Y, max)
/// sequentially. Stops on a page with no new items or on a failed fetch past
/// page 1; a failure on page 1 is returned.
pub async fn walk_pages<T, F>(
    fetcher: &dyn PageFetcher,
    list_url: &str,
    limits: PageLimits,
    paging: &Selector,
    extract: F,
) -> Result<Vec<T>, ScrapeError>
where
    T: Keyed + Send,
    F: Fn(&Html, &str) -> Vec<T> + Send + Sync,
{
    let first = fetcher.fetch(list_url).await?.text();
    let (items, total) = {
        let doc = Html::parse_document(&first);
        (extract(&doc, list_url), parse_total_pages(&doc, paging))
    };
    let pages = total.unwrap_or(1).min(limits.max_pages).max(1);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    if absorb(items, &mut seen, &mut out) == 0 {
        return Ok(out);
    }

    for page in 2..=pages {
        if !limits.page_delay.is_zero() {
            tokio::time::sleep(limits.page_delay).await;
        }
        let url = page_url(list_url, page);
        let body = match fetcher.fetch(&url).await {
            Ok(fetched) => fetched.text(),
            Err(err) => {
                warn!(target = "salon_gbp.scrape", url = %url, page, error = %err, "pagination_stopped");
                break;
            }
        };
        let items = {
            let doc = Html::parse_document(&body);
            extract(&doc, &url)
        };
        if absorb(items, &mut seen, &mut out) == 0 {
            debug!(target = "salon_gbp.scrape", url = %url, page, "pagination_exhausted");
            break;
        }
    }
    Ok(out)
}

fn absorb<T: Keyed>(items: Vec<T>, seen: &mut HashSet<String>, out: &mut Vec<T>) -> usize {
    let before = out.len();
    for item in items {
        if seen.insert(item.key().to_string()) {
            out.push(item);
        }
    }
    out.len() - before
}

pub fn page_url(list_url: &str, page: u32) -> String {
    if page <= 1 {
        return list_url.to_string();
    }
    if list_url.ends_with('/') {
        format!("{list_url}PN{page}.html")
    } else {
        format!("{list_url}/PN{page}.html")
    }
}

/// Total page count from the paging container, else from the whole page.
pub fn parse_total_pages(doc: &Html, paging: &Selector) -> Option<u32> {
    if let Some(container) = doc.select(paging).next() {
        let text = container.text().collect::<Vec<_>>().join(" ");
        if let Some(total) = indicator_total(&text) {
            return Some(total);
        }
    }
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    indicator_total(&text)
}

fn indicator_total(text: &str) -> Option<u32> {
    PAGE_INDICATOR
        .captures(text)
        .and_then(|caps| caps[2].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::{compile, testing::FakeFetcher};

    const LIST: &str = "https://salon.example/blog/";

    fn listing(items: &[&str], indicator: &str) -> String {
        let lis: String = items.iter().map(|i| format!("<li>{i}</li>")).collect();
        format!("<html><body><ul>{lis}</ul><div class=\"paging\">{indicator}</div></body></html>")
    }

    async fn walk(fetcher: &FakeFetcher, max_pages: u32) -> Result<Vec<String>, ScrapeError> {
        let li = compile("li").unwrap();
        let paging = compile("div.paging").unwrap();
        walk_pages(
            fetcher,
            LIST,
            PageLimits::new(max_pages, Duration::ZERO),
            &paging,
            |doc, _| doc.select(&li).map(|el| el.text().collect::<String>()).collect(),
        )
        .await
    }

    #[test]
    fn indicator_prefers_paging_container() {
        let doc = Html::parse_document(
            "<p>Campaign 1/9ページ</p><div class=\"paging\">2/4ページ</div>",
        );
        let paging = compile("div.paging").unwrap();
        assert_eq!(parse_total_pages(&doc, &paging), Some(4));
        let bare = Html::parse_document("<p>3 / 7 ページ</p>");
        assert_eq!(parse_total_pages(&bare, &paging), Some(7));
        assert_eq!(parse_total_pages(&Html::parse_document("<p>none</p>"), &paging), None);
    }

    #[test]
    fn page_urls_follow_pn_scheme() {
        assert_eq!(page_url(LIST, 1), LIST);
        assert_eq!(page_url(LIST, 3), "https://salon.example/blog/PN3.html");
        assert_eq!(page_url("https://salon.example/coupon", 2), "https://salon.example/coupon/PN2.html");
    }

    #[tokio::test]
    async fn walks_until_a_page_has_nothing_new() {
        let fetcher = FakeFetcher::default()
            .page(LIST, &listing(&["a", "b"], "1/4ページ"))
            .page(&page_url(LIST, 2), &listing(&["b", "c"], "2/4ページ"))
            .page(&page_url(LIST, 3), &listing(&["a", "c"], "3/4ページ"))
            .page(&page_url(LIST, 4), &listing(&["d"], "4/4ページ"));
        let items = walk(&fetcher, 5).await.unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn empty_first_page_stops_immediately() {
        let fetcher = FakeFetcher::default().page(LIST, &listing(&[], "1/3ページ"));
        let items = walk(&fetcher, 5).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(fetcher.requested(), vec![LIST.to_string()]);
    }

    #[tokio::test]
    async fn error_after_first_page_ends_quietly() {
        let fetcher = FakeFetcher::default()
            .page(LIST, &listing(&["a"], "1/3ページ"))
            .status(&page_url(LIST, 2), 500);
        let items = walk(&fetcher, 5).await.unwrap();
        assert_eq!(items, vec!["a"]);
    }

    #[tokio::test]
    async fn error_on_first_page_propagates() {
        let fetcher = FakeFetcher::default().status(LIST, 503);
        let err = walk(&fetcher, 5).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Fetch(crate::scrape::FetchError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn max_pages_caps_the_walk() {
        let fetcher = FakeFetcher::default()
            .page(LIST, &listing(&["a"], "1/10ページ"))
            .page(&page_url(LIST, 2), &listing(&["b"], "2/10ページ"))
            .page(&page_url(LIST, 3), &listing(&["c"], "3/10ページ"));
        let items = walk(&fetcher, 2).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn missing_indicator_means_single_page() {
        let fetcher = FakeFetcher::default()
            .page(LIST, "<ul><li>a</li><li>b</li></ul>")
            .page(&page_url(LIST, 2), &listing(&["c"], ""));
        let items = walk(&fetcher, 5).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(fetcher.requested().len(), 1);
    }
}
