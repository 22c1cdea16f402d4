//! Page parsing capability and its CSS-selector implementation
//!
//! The crawl engine does not know what a page contains. It hands the body to
//! a [`PageParser`] and gets back records for the sink and links for the
//! frontier.

use crate::config::ParserConfig;
use crate::record::Record;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Errors produced while extracting data from a page
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no natural key in {url}: path has fewer than {segment} segments")]
    MissingKey { url: String, segment: usize },
}

/// Records and links extracted from one page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub records: Vec<Record>,

    /// Absolute URLs found on the page
    pub links: Vec<String>,
}

/// Turns a fetched page into records and outgoing links
///
/// Implementations must be side-effect free with respect to crawl state. An
/// error marks the page Failed and is never retried.
pub trait PageParser: Send + Sync {
    fn parse(&self, body: &str, url: &Url) -> Result<ParsedPage, ParseError>;
}

/// Where a record field takes its value from
///
/// Written as a CSS selector, optionally followed by `@attr` to read an
/// attribute of the first match instead of its text, e.g.
/// `.star-rating@class`.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    selector: Selector,
    attr: Option<String>,
}

impl FieldSelector {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (css, attr) = match spec.rsplit_once('@') {
            Some((css, attr)) if is_attr_name(attr) => (css, Some(attr.to_string())),
            _ => (spec, None),
        };

        Ok(Self {
            selector: compile(css.trim()).map_err(|_| ConfigError::InvalidSelector(spec.to_string()))?,
            attr,
        })
    }

    fn extract(&self, document: &Html) -> Value {
        let Some(element) = document.select(&self.selector).next() else {
            return Value::Null;
        };

        match &self.attr {
            Some(attr) => element
                .value()
                .attr(attr)
                .map(|v| Value::String(v.trim().to_string()))
                .unwrap_or(Value::Null),
            None => Value::String(element_text(element)),
        }
    }
}

fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

/// Parser driven entirely by configured CSS selectors
#[derive(Debug)]
pub struct SelectorParser {
    follow: Selector,
    record: Option<Selector>,
    key_segment: Option<usize>,
    fields: Vec<(String, FieldSelector)>,
}

impl SelectorParser {
    /// Compiles the configured selectors
    ///
    /// # Arguments
    ///
    /// * `config` - The parser configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorParser)` - All selectors compiled
    /// * `Err(ConfigError::InvalidSelector)` - A selector did not parse
    pub fn from_config(config: &ParserConfig) -> Result<Self, ConfigError> {
        let record = config.record_selector.as_deref().map(compile).transpose()?;
        let fields = config
            .fields
            .iter()
            .map(|(name, spec)| Ok((name.clone(), FieldSelector::parse(spec)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            follow: compile(&config.follow_selector)?,
            record,
            key_segment: config.record_key_segment,
            fields,
        })
    }

    fn extract_links(&self, document: &Html, base_url: &Url) -> Vec<String> {
        document
            .select(&self.follow)
            .filter(|element| element.value().attr("download").is_none())
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_link(href, base_url))
            .collect()
    }

    fn extract_record(&self, document: &Html, url: &Url) -> Result<Option<Record>, ParseError> {
        let is_record_page = match &self.record {
            Some(selector) => document.select(selector).next().is_some(),
            None => !self.fields.is_empty(),
        };
        if !is_record_page {
            return Ok(None);
        }

        let mut payload = Map::new();
        for (name, field) in &self.fields {
            payload.insert(name.clone(), field.extract(document));
        }

        let key = record_key(url, self.key_segment)?;
        Ok(Some(Record::new(key, url.as_str(), Value::Object(payload))))
    }
}

impl PageParser for SelectorParser {
    fn parse(&self, body: &str, url: &Url) -> Result<ParsedPage, ParseError> {
        let document = Html::parse_document(body);

        let links = self.extract_links(&document, url);
        let records = self
            .extract_record(&document, url)?
            .map(|record| record.with_snapshot(body))
            .into_iter()
            .collect();

        Ok(ParsedPage { records, links })
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector(selector.to_string()))
}

/// Text content with whitespace runs collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives the natural key of a record page
///
/// With `segment = Some(n)` the key is the n-th path segment counted from
/// the end, so `/catalogue/some-book_12/index.html` with `n = 2` gives
/// `some-book_12`. Without a segment the full URL is the key.
pub fn record_key(url: &Url, segment: Option<usize>) -> Result<String, ParseError> {
    let Some(n) = segment else {
        return Ok(url.to_string());
    };

    let segments: Vec<&str> = url
        .path()
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if n == 0 || n > segments.len() {
        return Err(ParseError::MissingKey {
            url: url.to_string(),
            segment: n,
        });
    }

    Ok(segments[segments.len() - n].to_string())
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url.to_string()),
        _ => None,
    }
}
