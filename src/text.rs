use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

pub const MAX_SUMMARY_LEN: usize = 1500;
pub const MAX_EVENT_TITLE_LEN: usize = 58;

const ELLIPSIS: &str = "...";
const STRIPPED_TAGS: [&str; 5] = ["script", "style", "nav", "footer", "aside"];
const IMAGE_ATTRS: [&str; 3] = ["src", "data-src", "data-original"];

static HORIZONTAL_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("horizontal ws regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));
static ANY_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogSummary {
    pub summary: String,
    pub image_url: Option<String>,
}

/// Collapses every whitespace run to one space, trims, and cuts to `max_len` chars.
pub fn sanitize_event_title(text: &str, max_len: usize) -> String {
    ANY_WS
        .replace_all(text, " ")
        .trim()
        .chars()
        .take(max_len)
        .collect()
}

/// Joins header, body and footer within `limit` chars. The footer is always
/// kept unless header and footer alone do not fit.
pub fn truncate_with_footer(header: &str, body: &str, footer: &str, limit: usize) -> String {
    let fixed = header.chars().count() + footer.chars().count();
    if fixed >= limit {
        return header.chars().chain(footer.chars()).take(limit).collect();
    }
    let available = limit - fixed;
    let body_len = body.chars().count();
    if body_len <= available {
        return format!("{header}{body}{footer}");
    }
    let ellipsis_len = ELLIPSIS.chars().count();
    let mut out = String::with_capacity(header.len() + body.len() + footer.len());
    out.push_str(header);
    if available <= ellipsis_len {
        out.extend(body.chars().take(available));
    } else {
        out.extend(body.chars().take(available - ellipsis_len));
        out.push_str(ELLIPSIS);
    }
    out.push_str(footer);
    out
}

/// Squeezes spaces, trims every line, and keeps at most one blank line in a row.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let spaced = HORIZONTAL_WS.replace_all(&unified, " ");
    let lines: Vec<&str> = spaced.split('\n').map(str::trim).collect();
    BLANK_RUNS.replace_all(&lines.join("\n"), "\n\n").trim().to_string()
}

pub fn blog_to_gbp_summary(title: &str, body_html: &str, article_url: &str) -> BlogSummary {
    let (text, first_image) = html_to_text(body_html);
    let header = format!("【Update】{title}\n\n");
    let footer = format!("\n\n▼ Read more\n{article_url}");
    BlogSummary {
        summary: truncate_with_footer(&header, &text, &footer, MAX_SUMMARY_LEN),
        image_url: first_image.and_then(|src| resolve_url(article_url, &src)),
    }
}

pub fn caption_to_gbp_summary(caption: &str, permalink: &str, sync_hashtags: bool) -> String {
    let text = if sync_hashtags {
        normalize_text(caption)
    } else {
        normalize_text(&strip_hashtags(caption))
    };
    let footer = format!("\n\nSee more on Instagram\n{permalink}");
    truncate_with_footer("", &text, &footer, MAX_SUMMARY_LEN)
}

pub fn coupon_summary(title: &str, body: &str) -> String {
    let joined = match (title.trim(), body.trim()) {
        ("", body) => body.to_string(),
        (title, "") => title.to_string(),
        (title, body) => format!("{title}\n{body}"),
    };
    joined.chars().take(MAX_SUMMARY_LEN).collect()
}

pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(href).ok().map(String::from),
        Err(_) => Url::parse(href).ok().map(String::from),
    }
}

/// Plain text of an HTML fragment plus the first image source found outside
/// stripped elements.
fn html_to_text(html: &str) -> (String, Option<String>) {
    let fragment = Html::parse_fragment(html);
    let mut pieces = Vec::new();
    let mut first_image = None;
    collect_text(fragment.root_element(), &mut pieces, &mut first_image);
    (normalize_text(&pieces.join("\n")), first_image)
}

fn collect_text(element: ElementRef<'_>, pieces: &mut Vec<String>, first_image: &mut Option<String>) {
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            let name = el.value().name();
            if STRIPPED_TAGS.contains(&name) {
                continue;
            }
            match name {
                "br" => pieces.push("\n".to_string()),
                "img" => {
                    if first_image.is_none() {
                        *first_image = IMAGE_ATTRS
                            .iter()
                            .filter_map(|attr| el.value().attr(attr))
                            .map(str::trim)
                            .find(|src| !src.is_empty())
                            .map(str::to_string);
                    }
                }
                _ => {
                    collect_text(el, pieces, first_image);
                    if matches!(name, "p" | "div") {
                        pieces.push("\n".to_string());
                    }
                }
            }
        } else if let Some(text) = child.value().as_text() {
            pieces.push(text.to_string());
        }
    }
}

/// Removes `#tag` runs that start at a word boundary.
fn strip_hashtags(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        let at_boundary = idx == 0 || !is_word_char(chars[idx - 1]);
        let starts_tag = chars[idx] == '#'
            && at_boundary
            && chars
                .get(idx + 1)
                .is_some_and(|next| !next.is_whitespace() && *next != '#');
        if starts_tag {
            idx += 1;
            while idx < chars.len() && !chars[idx].is_whitespace() && chars[idx] != '#' {
                idx += 1;
            }
            continue;
        }
        out.push(chars[idx]);
        idx += 1;
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_title_collapses_whitespace() {
        assert_eq!(
            sanitize_event_title("学割U24\n[全員]\n¥12,990", MAX_EVENT_TITLE_LEN),
            "学割U24 [全員] ¥12,990"
        );
        let long = "あ".repeat(100);
        assert_eq!(
            sanitize_event_title(&long, MAX_EVENT_TITLE_LEN).chars().count(),
            58
        );
        assert_eq!(sanitize_event_title(" \t\n ", MAX_EVENT_TITLE_LEN), "");
    }

    #[test]
    fn footer_survives_every_truncation() {
        let header = "【Update】Title\n\n";
        let footer = "\n\n▼ Read more\nhttps://example.com/a";
        for body_len in [0usize, 10, 100, 1400, 1500, 5000] {
            let body = "本".repeat(body_len);
            for limit in [60usize, 100, 1500] {
                let out = truncate_with_footer(header, &body, footer, limit);
                assert!(out.chars().count() <= limit, "len {body_len} limit {limit}");
                assert!(out.ends_with(footer));
                assert!(out.starts_with(header));
            }
        }
    }

    #[test]
    fn truncation_appends_ellipsis_when_room_allows() {
        let out = truncate_with_footer("H", "abcdefghij", "F", 8);
        assert_eq!(out, "Habc...F");
        let tight = truncate_with_footer("H", "abcdefghij", "F", 5);
        assert_eq!(tight, "HabcF");
    }

    #[test]
    fn degenerate_budget_cuts_header_and_footer() {
        let out = truncate_with_footer("HEADER", "body", "FOOTER", 8);
        assert_eq!(out, "HEADERFO");
    }

    #[test]
    fn blog_summary_strips_chrome_and_resolves_image() {
        let html = "<div><p>Hello</p><script>track()</script><nav>menu</nav>\
                    <p>World<br>again</p><img data-src=\"/img/a.jpg\"></div>";
        let out = blog_to_gbp_summary("T", html, "https://example.com/blog/1.html");
        assert_eq!(
            out.summary,
            "【Update】T\n\nHello\n\nWorld\n\nagain\n\n▼ Read more\nhttps://example.com/blog/1.html"
        );
        assert_eq!(out.image_url.as_deref(), Some("https://example.com/img/a.jpg"));
    }

    #[test]
    fn blog_summary_stays_within_limit() {
        let body = format!("<p>{}</p>", "長".repeat(3000));
        let out = blog_to_gbp_summary("Title", &body, "https://example.com/x");
        assert_eq!(out.summary.chars().count(), MAX_SUMMARY_LEN);
        assert!(out.summary.ends_with("\n\n▼ Read more\nhttps://example.com/x"));
        assert!(out.summary.contains("..."));
        assert!(out.image_url.is_none());
    }

    #[test]
    fn caption_hashtags_removed_unless_synced() {
        let caption = "New color #haircolor #salon\nbook now a#b";
        let stripped = caption_to_gbp_summary(caption, "https://ig/p/1", false);
        assert_eq!(
            stripped,
            "New color\nbook now a#b\n\nSee more on Instagram\nhttps://ig/p/1"
        );
        let kept = caption_to_gbp_summary(caption, "https://ig/p/1", true);
        assert!(kept.starts_with("New color #haircolor #salon"));
    }

    #[test]
    fn normalize_collapses_blank_lines() {
        assert_eq!(normalize_text("  a\r\n\r\n\r\n\tb  "), "a\n\nb");
    }

    #[test]
    fn indented_markup_leaves_single_blank_lines() {
        let html = "<div class=\"body\">\n    <p>Hello</p>\n\n    <p>World</p>\n  </div>";
        let out = blog_to_gbp_summary("T", html, "https://e.com/a");
        assert_eq!(out.summary, "【Update】T\n\nHello\n\nWorld\n\n▼ Read more\nhttps://e.com/a");
        assert!(!out.summary.contains("\n \n"));
    }

    #[test]
    fn coupon_summary_joins_title_and_body() {
        assert_eq!(coupon_summary("Cut", "¥3,000"), "Cut\n¥3,000");
        assert_eq!(coupon_summary("", "only body"), "only body");
        assert_eq!(coupon_summary(&"x".repeat(2000), "").chars().count(), 1500);
    }
}
