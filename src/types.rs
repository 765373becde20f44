use base64::Engine; // for URL_SAFE_NO_PAD.encode/decode
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const CORE_POOL: &str = "core";
pub const SEARCH_POOL: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    /// Write methods carry a JSON body.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// How the paginator finds the following page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationStyle {
    /// Follow `rel="next"` from the Link header; no relation means last page.
    #[default]
    Link,
    /// Endpoints without Link headers: a full page implies another one.
    PageNumber,
}

/// Description of one logical API call. Built by the caller, never mutated by
/// the executor; paging derives a new spec per page.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the configured API URL, or an absolute URL on the same origin.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub pool: String,
    pub timeout: Option<Duration>,
    pub per_page: Option<u32>,
    /// Field holding the item array when the list payload is an object
    /// (`items` for search, `workflow_runs` for actions, ...).
    pub items_field: Option<String>,
    pub pagination: PaginationStyle,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let pool = if path.trim_start_matches('/').starts_with("search/") {
            SEARCH_POOL
        } else {
            CORE_POOL
        };
        Self {
            method,
            path,
            query: Vec::new(),
            body: None,
            pool: pool.to_string(),
            timeout: None,
            per_page: None,
            items_field: None,
            pagination: PaginationStyle::Link,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn items_field(mut self, field: impl Into<String>) -> Self {
        self.items_field = Some(field.into());
        self
    }

    pub fn pagination(mut self, style: PaginationStyle) -> Self {
        self.pagination = style;
        self
    }

    /// Derive the request for the page `cursor` points at. Caller-supplied
    /// `page`/`per_page` parameters are replaced.
    pub fn for_page(&self, cursor: &PageCursor) -> Self {
        let mut next = self.clone();
        if let Some(url) = &cursor.next_url {
            next.path = url.clone();
            next.query.clear();
            return next;
        }
        next.query.retain(|(k, _)| k != "page" && k != "per_page");
        next.query.push(("per_page".into(), cursor.per_page.to_string()));
        next.query.push(("page".into(), cursor.page.to_string()));
        next
    }
}

/// Position within a paginated collection. Replaced, never mutated, on each
/// page advance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub per_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
}

impl PageCursor {
    pub fn first(per_page: u32) -> Self {
        Self {
            page: 1,
            per_page,
            next_url: None,
        }
    }

    // Opaque form: base64(JSON { page, per_page, next_url? })
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_codec_roundtrip() {
        let c = PageCursor {
            page: 2,
            per_page: 30,
            next_url: Some("https://api.github.com/r?page=2".into()),
        };
        let s = c.encode();
        assert!(!s.contains('='));
        assert_eq!(PageCursor::decode(&s), Some(c));
        assert_eq!(PageCursor::decode("not base64!"), None);
    }

    #[test]
    fn search_paths_default_to_search_pool() {
        assert_eq!(RequestSpec::get("/search/issues").pool, SEARCH_POOL);
        assert_eq!(RequestSpec::get("search/code").pool, SEARCH_POOL);
        assert_eq!(RequestSpec::get("/repos/o/r/issues").pool, CORE_POOL);
    }

    #[test]
    fn for_page_replaces_paging_params_and_keeps_filters() {
        let spec = RequestSpec::get("/repos/o/r/issues")
            .query("state", "open")
            .query("page", 9);
        let paged = spec.for_page(&PageCursor {
            page: 3,
            per_page: 50,
            next_url: None,
        });
        assert_eq!(
            paged.query,
            vec![
                ("state".to_string(), "open".to_string()),
                ("per_page".to_string(), "50".to_string()),
                ("page".to_string(), "3".to_string()),
            ]
        );
        // original untouched
        assert_eq!(spec.query.len(), 2);
    }

    #[test]
    fn for_page_follows_next_url() {
        let spec = RequestSpec::get("/repos/o/r/issues").query("state", "open");
        let paged = spec.for_page(&PageCursor {
            page: 2,
            per_page: 30,
            next_url: Some("https://api.github.com/repositories/1/issues?page=2".into()),
        });
        assert_eq!(paged.path, "https://api.github.com/repositories/1/issues?page=2");
        assert!(paged.query.is_empty());
    }
}
