//! Clothing image extraction from product pages.
//!
//! Given a shop URL, fetch the page and pick one representative product
//! image, trying in order: structured metadata (`og:image`), images tagged as
//! product or clothing by class name, then the first image that doesn't look
//! like a logo, icon or avatar.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Substrings that mark an `<img>` as page chrome rather than a product.
const EXCLUDED_IMAGE_HINTS: &[&str] = &["logo", "icon", "avatar", "thumbnail", "placeholder"];

/// Client that resolves a product page URL to an image URL.
pub struct ImageExtractor {
    http: reqwest::Client,
}

impl ImageExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { http })
    }

    /// Fetch `page_url` and return the best product image URL on it.
    pub async fn extract(&self, page_url: &str) -> Result<String, ExtractionError> {
        let base = Url::parse(page_url)
            .map_err(|e| ExtractionError::InvalidUrl(format!("{page_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ExtractionError::InvalidUrl(format!(
                "{page_url}: unsupported scheme"
            )));
        }

        let response = self.http.get(base.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::Unreachable(format!(
                "{} returned HTTP {}",
                page_url,
                response.status()
            )));
        }

        let html = response.text().await?;
        let image_url = extract_product_image(&html, &base).ok_or(ExtractionError::NoImage)?;

        tracing::debug!(page_url, image_url = %image_url, "Extracted clothing image");
        Ok(image_url)
    }
}

/// Pick a product image from a page's HTML, resolved against `base`.
pub fn extract_product_image(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);

    let candidate = meta_image(&document)
        .or_else(|| classed_image(&document, "product"))
        .or_else(|| classed_image(&document, "clothing"))
        .or_else(|| first_content_image(&document))?;

    resolve_against(base, &candidate)
}

/// `og:image` (as property or name), then `twitter:image`.
fn meta_image(document: &Html) -> Option<String> {
    let selectors = [
        r#"meta[property="og:image"]"#,
        r#"meta[name="og:image"]"#,
        r#"meta[property="og:image:url"]"#,
        r#"meta[name="twitter:image"]"#,
    ];

    selectors.iter().find_map(|sel| {
        let selector = Selector::parse(sel).expect("valid selector");
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .map(str::to_string)
    })
}

/// First `<img>` whose class list mentions `marker` (case-insensitive).
fn classed_image(document: &Html, marker: &str) -> Option<String> {
    let img_sel = Selector::parse("img").expect("valid selector");
    document
        .select(&img_sel)
        .filter(|img| {
            img.value()
                .attr("class")
                .is_some_and(|class| class.to_lowercase().contains(marker))
        })
        .find_map(image_source)
}

/// First `<img>` that isn't an icon, logo, vector or animation.
fn first_content_image(document: &Html) -> Option<String> {
    let img_sel = Selector::parse("img").expect("valid selector");
    document
        .select(&img_sel)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| is_content_image(src))
        .map(str::to_string)
}

fn image_source(img: ElementRef<'_>) -> Option<String> {
    ["src", "data-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(str::to_string)
}

fn is_content_image(src: &str) -> bool {
    if src.is_empty() || src.starts_with("data:") {
        return false;
    }
    let lower = src.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    if path.ends_with(".svg") || path.ends_with(".gif") {
        return false;
    }
    !EXCLUDED_IMAGE_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Resolve protocol-relative, root-relative and path-relative references.
fn resolve_against(base: &Url, candidate: &str) -> Option<String> {
    base.join(candidate).ok().map(|url| url.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Invalid page URL: {0}")]
    InvalidUrl(String),

    #[error("Page unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not extract image from URL")]
    NoImage,
}
