//! URL handling module
//!
//! This module turns raw links into URL keys (the frontier's dedup identity)
//! and decides which hosts a crawl run may follow links into.

mod domain;
mod matcher;
mod normalize;

pub use domain::extract_domain;
pub use matcher::{matches_wildcard, CrawlScope};
pub use normalize::{normalize_url, NormalizationRules};
