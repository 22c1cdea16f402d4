use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use catalog_crawler::url::extract_domain;
///
/// let url = Url::parse("https://Books.Example.com/catalogue/").unwrap();
/// assert_eq!(extract_domain(&url), Some("books.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
