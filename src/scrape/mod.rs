//! Selector-driven scrapers for the salon's public blog, style gallery and
//! coupon pages.
//!
//! Every scraper reads pages through [`PageFetcher`], walks pagination with
//! [`pagination::walk_pages`], and derives identifiers that stay stable across
//! process restarts so cross-run dedup can rely on them.

pub mod blog;
pub mod coupon;
pub mod extract;
pub mod fetcher;
pub mod pagination;
pub mod robots;
pub mod selectors;
pub mod style;

pub use fetcher::{FetchError, Fetched, HttpFetcher, PageFetcher};
pub use pagination::PageLimits;
pub use robots::RobotsCache;
pub use selectors::SelectorSet;

use scraper::Selector;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("selector file {path}: {message}")]
    SelectorFile { path: String, message: String },
}

pub(crate) fn compile(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|_| ScrapeError::Selector(css.to_string()))
}
