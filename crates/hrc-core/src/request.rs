//! Request context
//!
//! An immutable view of the parts of an HTTP request that rules can match
//! on. Headers, cookies and query parameters are kept in sorted maps so that
//! matching never depends on the order they arrived in.

use std::collections::BTreeMap;

/// Requests carrying this header ask for purge-on-read
pub const PURGE_HEADER: &str = "X-HRC-Purge";

/// Requests carrying this header ask for the debug log
pub const DEBUG_HEADER: &str = "X-HRC-Debug";

/// Carries the shared control key that authorizes purge and debug
pub const CONTROL_KEY_HEADER: &str = "X-HRC-Control-Key";

/// Control headers, never folded into a cache key
pub const CONTROL_HEADERS: [&str; 3] = [PURGE_HEADER, DEBUG_HEADER, CONTROL_KEY_HEADER];

/// Canonical header name: every dash-separated word capitalised.
///
/// `x-cache-me` and `X-CACHE-ME` both become `X-Cache-Me`.
pub fn canonical_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    method: String,
    url: String,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a context for `method` and `url`.
    ///
    /// Anything after `?` in `url` is split into query parameters (no
    /// percent-decoding) and the remaining path is kept as the URL.
    pub fn new(method: impl Into<String>, url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };

        let mut ctx = Self {
            method: method.into().to_ascii_uppercase(),
            url: path.to_string(),
            ..Default::default()
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            ctx.query.insert(name.to_string(), value.to_string());
        }

        ctx
    }

    /// Shorthand for a `GET` request
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(canonical_header_name(name), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |ctx, (k, v)| ctx.with_header(k.as_ref(), v))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether the request may be served from or stored in the cache
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&canonical_header_name(name))
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query
    }
}
