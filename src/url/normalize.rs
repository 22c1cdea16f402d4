use crate::config::NormalizationConfig;
use crate::UrlError;
use url::Url;

/// Query parameters dropped from URL keys when no list is configured
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Rules deciding when two URLs name the same page
///
/// Lowercasing, default-port removal, dot-segment removal, duplicate-slash
/// collapse, fragment removal and empty-query removal always apply. The
/// remaining steps are switched by configuration.
#[derive(Debug, Clone)]
pub struct NormalizationRules {
    pub strip_trailing_slash: bool,
    pub sort_query: bool,
    pub strip_www: bool,
    ignored_params: Option<Vec<String>>,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            strip_trailing_slash: true,
            sort_query: true,
            strip_www: false,
            ignored_params: None,
        }
    }
}

impl From<&NormalizationConfig> for NormalizationRules {
    fn from(config: &NormalizationConfig) -> Self {
        Self {
            strip_trailing_slash: config.strip_trailing_slash,
            sort_query: config.sort_query,
            strip_www: config.strip_www,
            ignored_params: config.ignored_params.clone(),
        }
    }
}

impl NormalizationRules {
    /// Checks if a query parameter is dropped from URL keys
    fn is_ignored_param(&self, key: &str) -> bool {
        match &self.ignored_params {
            Some(params) => params.iter().any(|p| p == key),
            None => TRACKING_PARAMS.contains(&key) || key.starts_with("utm_"),
        }
    }
}

/// Normalizes a URL into its canonical URL key form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host (and optionally drop a `www.` prefix)
/// 3. Normalize the path:
///    - Remove dot segments (. and ..) and duplicate slashes
///    - Optionally remove the trailing slash (except for root /)
///    - Empty path becomes /
/// 4. Remove the fragment
/// 5. Drop ignored query parameters, optionally sort the rest
/// 6. Remove an empty query string (trailing ?)
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
/// * `rules` - Which optional normalization steps apply
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use catalog_crawler::url::{normalize_url, NormalizationRules};
///
/// let rules = NormalizationRules::default();
/// let url = normalize_url("HTTP://EXAMPLE.COM/page/?b=2&a=1#top", &rules).unwrap();
/// assert_eq!(url.as_str(), "http://example.com/page?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str, rules: &NormalizationRules) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    // The url crate already lowercases scheme and host and drops default ports
    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    if rules.strip_www {
        if let Some(bare) = host.strip_prefix("www.") {
            let bare = bare.to_string();
            url.set_host(Some(&bare))
                .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
        }
    }

    let normalized_path = normalize_path(url.path(), rules.strip_trailing_slash);
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_query_params(&url, rules);

        if params.is_empty() {
            url.set_query(None);
        } else {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in &params {
                serializer.append_pair(k, v);
            }
            url.set_query(Some(&serializer.finish()));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and duplicate slashes
fn normalize_path(path: &str, strip_trailing_slash: bool) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if trailing && !strip_trailing_slash {
        result.push('/');
    }
    result
}

/// Drops ignored query parameters and orders the remaining ones
fn filter_query_params(url: &Url, rules: &NormalizationRules) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !rules.is_ignored_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if rules.sort_query {
        params.sort();
    }

    params
}
