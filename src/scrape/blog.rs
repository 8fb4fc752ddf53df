use crate::{
    scrape::{
        PageFetcher, PageLimits, ScrapeError, compile,
        extract::{dedup_by_key, element_text, image_source, normalize_image_url, parse_blog_date},
        pagination::walk_pages,
        selectors::BlogSelectors,
    },
    text::resolve_url,
};
use chrono::{DateTime, Utc};
use scraper::Html;

#[derive(Debug, Clone, PartialEq)]
pub struct BlogArticle {
    pub url: String,
    pub title: String,
    pub body_html: String,
    pub image_urls: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Absolute article URLs across the blog's list pages, first-seen order.
pub async fn list_article_urls(
    fetcher: &dyn PageFetcher,
    list_url: &str,
    limits: PageLimits,
    selectors: &BlogSelectors,
) -> Result<Vec<String>, ScrapeError> {
    let link = compile(&selectors.article_link)?;
    let paging = compile(&selectors.paging)?;
    walk_pages(fetcher, list_url, limits, &paging, |doc, page_url| {
        doc.select(&link)
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter_map(|href| resolve_url(page_url, href.trim()))
            .map(|url| url.split('#').next().unwrap_or(&url).to_string())
            .collect()
    })
    .await
}

pub async fn fetch_article(
    fetcher: &dyn PageFetcher,
    url: &str,
    selectors: &BlogSelectors,
) -> Result<BlogArticle, ScrapeError> {
    let title_sel = compile(&selectors.title)?;
    let body_sel = compile(&selectors.body)?;
    let images_sel = compile(&selectors.images)?;
    let published_sel = compile(&selectors.published_at)?;

    let html = fetcher.fetch(url).await?.text();
    let doc = Html::parse_document(&html);

    let title = doc
        .select(&title_sel)
        .next()
        .map(|el| element_text(el, ""))
        .unwrap_or_default();
    let body_html = doc
        .select(&body_sel)
        .next()
        .map(|el| el.html())
        .unwrap_or_else(|| html.clone());
    let image_urls = dedup_by_key(
        doc.select(&images_sel)
            .filter_map(image_source)
            .filter_map(|src| resolve_url(url, &src))
            .map(|src| normalize_image_url(&src))
            .collect(),
        |src| src.as_str(),
    );
    let published_at = doc
        .select(&published_sel)
        .next()
        .and_then(|el| parse_blog_date(&element_text(el, " ")));

    Ok(BlogArticle {
        url: url.to_string(),
        title,
        body_html,
        image_urls,
        published_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::testing::FakeFetcher;
    use chrono::TimeZone;
    use std::time::Duration;

    const LIST: &str = "https://beauty.example.jp/slnH000123/blog/";

    fn list_page(ids: &[u32], indicator: &str) -> String {
        let links: String = ids
            .iter()
            .map(|id| format!("<li><a href=\"/slnH000123/blog/bidA{id}.html#top\">post {id}</a></li>"))
            .collect();
        format!("<html><body><ul>{links}</ul><div class=\"paging\">{indicator}</div></body></html>")
    }

    #[tokio::test]
    async fn collects_links_across_pages() {
        let fetcher = FakeFetcher::default()
            .page(LIST, &list_page(&[1, 2, 3], "1/2ページ"))
            .page(&format!("{LIST}PN2.html"), &list_page(&[4, 5], "2/2ページ"));
        let urls = list_article_urls(
            &fetcher,
            LIST,
            PageLimits::new(5, Duration::ZERO),
            &BlogSelectors::default(),
        )
        .await
        .unwrap();
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[0], "https://beauty.example.jp/slnH000123/blog/bidA1.html");
        assert_eq!(urls[4], "https://beauty.example.jp/slnH000123/blog/bidA5.html");
    }

    #[tokio::test]
    async fn article_fields_are_extracted() {
        let url = "https://beauty.example.jp/slnH000123/blog/bidA1.html";
        let article_html = r#"<html><body>
            <h1> Spring colors </h1>
            <p class="blogDetailDate">投稿日：2026/2/3</p>
            <div class="blogDetailText"><p>New menu!</p>
              <img src="/img/a.jpg?w=300"><img data-src="https://cdn.example/b.png">
              <img src="/img/a.jpg?w=600"></div>
        </body></html>"#;
        let fetcher = FakeFetcher::default().page(url, article_html);
        let article = fetch_article(&fetcher, url, &BlogSelectors::default())
            .await
            .unwrap();
        assert_eq!(article.title, "Spring colors");
        assert!(article.body_html.contains("New menu!"));
        assert_eq!(
            article.image_urls,
            vec![
                "https://beauty.example.jp/img/a.jpg".to_string(),
                "https://cdn.example/b.png".to_string(),
            ]
        );
        assert_eq!(
            article.published_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap())
        );
    }
}
