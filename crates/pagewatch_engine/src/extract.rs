//! Selector-based new-item detection and Open Graph metadata extraction.

use scraper::{Html, Selector};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("selector '{selector}' matched nothing")]
    NoMatch { selector: String },
    #[error("element matched by '{selector}' has no usable href")]
    MissingLink { selector: String },
    #[error("cannot resolve '{href}' against base url '{base}': {message}")]
    InvalidBaseUrl {
        href: String,
        base: String,
        message: String,
    },
}

/// Metadata of an item page. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub url: String,
    pub thumbnail_url: String,
    pub description: String,
}

pub fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|err| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{err:?}"),
    })
}

/// Locates the newest-item anchor and returns its absolute URL.
///
/// Only the first matching element is considered; if it has no `href`, this fails
/// even when later matches would have one.
pub fn find_candidate_url(html: &str, selector: &str, base_url: &str) -> Result<String, ExtractError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| ExtractError::NoMatch {
            selector: selector.to_string(),
        })?;
    let href = element
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .ok_or_else(|| ExtractError::MissingLink {
            selector: selector.to_string(),
        })?;
    resolve_link(href, base_url)
}

/// Resolves `href` against `base_url`; `scheme://...` and `//...` links pass through unchanged.
pub fn resolve_link(href: &str, base_url: &str) -> Result<String, ExtractError> {
    if is_absolute_link(href) {
        return Ok(href.to_string());
    }
    let invalid = |message: String| ExtractError::InvalidBaseUrl {
        href: href.to_string(),
        base: base_url.to_string(),
        message,
    };
    let base = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
    base.join(href)
        .map(String::from)
        .map_err(|err| invalid(err.to_string()))
}

fn is_absolute_link(href: &str) -> bool {
    let scheme_len = href
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    let rest = &href[scheme_len..];
    let rest = if scheme_len > 0 {
        match rest.strip_prefix(':') {
            Some(rest) => rest,
            None => return false,
        }
    } else {
        rest
    };
    rest.starts_with("//")
}

/// Pulls title, canonical URL, thumbnail and description, first match wins:
///
/// - title: `og:title` -> `<title>` -> ""
/// - url: `og:url` -> `fallback_url`
/// - thumbnail: `og:image` -> `og:image:secure_url` -> ""
/// - description: `og:description` -> ""
pub fn extract_metadata(html: &str, fallback_url: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = og_content(&document, "og:title")
        .or_else(|| title_text(&document))
        .unwrap_or_default();
    let url = og_content(&document, "og:url").unwrap_or_else(|| fallback_url.to_string());
    let thumbnail_url = og_content(&document, "og:image")
        .or_else(|| og_content(&document, "og:image:secure_url"))
        .unwrap_or_default();
    let description = og_content(&document, "og:description").unwrap_or_default();

    PageMetadata {
        title,
        url,
        thumbnail_url,
        description,
    }
}

fn og_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
    document
        .select(&selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn title_text(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}
