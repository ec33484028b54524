//! Cache strategy rules shared by the service worker and the `Cache-Control` middleware.

use axum::http::Method;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl CacheStrategy {
    pub fn cache_control(&self) -> &'static str {
        match self {
            CacheStrategy::CacheFirst => "public, max-age=31536000, immutable",
            CacheStrategy::NetworkFirst => "no-cache",
            CacheStrategy::StaleWhileRevalidate => "public, max-age=60, stale-while-revalidate=300",
            CacheStrategy::NetworkOnly => "no-store",
        }
    }
}

/// How a path is matched in the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    Prefix(&'static str),
    Extension(&'static [&'static str]),
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) if prefix.ends_with('/') => path.starts_with(prefix),
            Matcher::Prefix(prefix) => path
                .strip_prefix(prefix)
                .map(|rest| rest.is_empty() || rest.starts_with('/'))
                .unwrap_or(false),
            Matcher::Extension(exts) => path
                .rsplit_once('.')
                .filter(|(stem, _)| !stem.ends_with('/'))
                .map(|(_, ext)| exts.iter().any(|e| e.eq_ignore_ascii_case(ext)))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheRule {
    pub matcher: Matcher,
    pub strategy: CacheStrategy,
}

const STATIC_EXTENSIONS: &[&str] = &["js", "css", "png", "jpg", "jpeg", "webp", "svg", "woff2", "ico"];

/// GET rules in priority order; the first match wins
pub static RULES: &[CacheRule] = &[
    CacheRule { matcher: Matcher::Prefix("/api/checkout"), strategy: CacheStrategy::NetworkOnly },
    CacheRule { matcher: Matcher::Prefix("/api/cart"), strategy: CacheStrategy::NetworkOnly },
    CacheRule { matcher: Matcher::Prefix("/api/quotes/pay"), strategy: CacheStrategy::NetworkOnly },
    CacheRule { matcher: Matcher::Prefix("/api/admin"), strategy: CacheStrategy::NetworkOnly },
    CacheRule { matcher: Matcher::Prefix("/api/webhooks"), strategy: CacheStrategy::NetworkOnly },
    CacheRule { matcher: Matcher::Prefix("/api/products"), strategy: CacheStrategy::StaleWhileRevalidate },
    CacheRule { matcher: Matcher::Prefix("/api/"), strategy: CacheStrategy::NetworkFirst },
    CacheRule { matcher: Matcher::Prefix("/static/"), strategy: CacheStrategy::CacheFirst },
    CacheRule { matcher: Matcher::Extension(STATIC_EXTENSIONS), strategy: CacheStrategy::CacheFirst },
];

pub const DEFAULT_STRATEGY: CacheStrategy = CacheStrategy::NetworkFirst;

pub fn strategy_for(method: &Method, path: &str) -> CacheStrategy {
    if *method != Method::GET && *method != Method::HEAD {
        return CacheStrategy::NetworkOnly;
    }
    RULES
        .iter()
        .find(|rule| rule.matcher.matches(path))
        .map(|rule| rule.strategy)
        .unwrap_or(DEFAULT_STRATEGY)
}

/// Rule table as served to the service worker
#[derive(Debug, Serialize)]
pub struct CacheManifest {
    pub version: &'static str,
    pub non_get: CacheStrategy,
    pub rules: &'static [CacheRule],
    pub default: CacheStrategy,
}

pub fn manifest() -> CacheManifest {
    CacheManifest {
        version: env!("CARGO_PKG_VERSION"),
        non_get: CacheStrategy::NetworkOnly,
        rules: RULES,
        default: DEFAULT_STRATEGY,
    }
}
