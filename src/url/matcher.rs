use super::domain::extract_domain;
use url::Url;

/// Checks if a domain matches a wildcard pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any subdomain of it.
///
/// ```
/// use catalog_crawler::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || (candidate.len() > base.len()
                    && candidate.ends_with(base)
                    && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
        }
        None => candidate == pattern,
    }
}

/// The set of hosts a crawl run may follow links into
#[derive(Debug, Clone, Default)]
pub struct CrawlScope {
    patterns: Vec<String>,
}

impl CrawlScope {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Builds the scope from configured patterns, falling back to the seed hosts
    pub fn from_config(allowed_domains: &[String], seeds: &[String]) -> Self {
        if !allowed_domains.is_empty() {
            return Self::new(allowed_domains.to_vec());
        }

        let mut hosts: Vec<String> = seeds
            .iter()
            .filter_map(|s| Url::parse(s).ok())
            .filter_map(|u| extract_domain(&u))
            .collect();
        hosts.sort();
        hosts.dedup();
        Self::new(hosts)
    }

    /// An empty scope admits every host
    pub fn allows(&self, url: &Url) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        match extract_domain(url) {
            Some(domain) => self.patterns.iter().any(|p| matches_wildcard(p, &domain)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
        assert!(!matches_wildcard("blog.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_matches_subdomains() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "deep.nested.example.com"));
    }

    #[test]
    fn test_wildcard_no_partial_match() {
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.org"));
        assert!(!matches_wildcard("*.example.com", ""));
    }

    #[test]
    fn test_scope_defaults_to_seed_hosts() {
        let seeds = vec![
            "https://books.toscrape.com/catalogue/page-1.html".to_string(),
            "https://books.toscrape.com/index.html".to_string(),
        ];
        let scope = CrawlScope::from_config(&[], &seeds);

        let inside = Url::parse("https://books.toscrape.com/catalogue/a_1/index.html").unwrap();
        let outside = Url::parse("https://twitter.com/share").unwrap();
        assert!(scope.allows(&inside));
        assert!(!scope.allows(&outside));
    }

    #[test]
    fn test_scope_uses_configured_patterns() {
        let scope = CrawlScope::from_config(
            &["*.Example.com".to_string()],
            &["https://other.org/".to_string()],
        );

        assert!(scope.allows(&Url::parse("https://shop.example.com/x").unwrap()));
        assert!(!scope.allows(&Url::parse("https://other.org/").unwrap()));
    }

    #[test]
    fn test_empty_scope_allows_all() {
        let scope = CrawlScope::default();
        assert!(scope.allows(&Url::parse("https://anywhere.net/").unwrap()));
    }
}
