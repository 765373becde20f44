//! Link header parsing.
//!
//! GitHub Link headers look like:
//! `<https://api.github.com/repos/o/r/issues?per_page=100&page=2>; rel="next", <...&page=5>; rel="last"`

use reqwest::header::{HeaderMap, LINK};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub url: String,
    /// `page=N` from the target's query string, when present.
    pub page: Option<u32>,
}

impl LinkTarget {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            page: page_from_url(url),
        }
    }
}

/// Relations parsed from one Link header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationLinks {
    pub next: Option<LinkTarget>,
    pub prev: Option<LinkTarget>,
    pub first: Option<LinkTarget>,
    pub last: Option<LinkTarget>,
}

impl PaginationLinks {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(parse_link_header)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_none() && self.prev.is_none() && self.first.is_none() && self.last.is_none()
    }

    /// Total number of pages, if the server told us where the last one is.
    pub fn total_pages(&self) -> Option<u32> {
        self.last.as_ref().and_then(|l| l.page)
    }
}

pub fn parse_link_header(value: &str) -> PaginationLinks {
    let mut links = PaginationLinks::default();
    for part in value.split(',') {
        let mut url = None;
        let mut rels: Vec<&str> = Vec::new();
        for segment in part.split(';').map(str::trim) {
            if let Some(inner) = segment
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
            {
                url = Some(inner.trim());
            } else if let Some((key, val)) = segment.split_once('=') {
                if key.trim().eq_ignore_ascii_case("rel") {
                    // rel may hold several space-separated names
                    rels.extend(val.trim().trim_matches('"').split_whitespace());
                }
            }
        }
        let Some(url) = url else { continue };
        for rel in rels {
            let slot = match rel {
                "next" => &mut links.next,
                "prev" => &mut links.prev,
                "first" => &mut links.first,
                "last" => &mut links.last,
                _ => continue,
            };
            *slot = Some(LinkTarget::new(url));
        }
    }
    links
}

/// Extract the `page` query parameter from an absolute or relative URL.
pub fn page_from_url(url: &str) -> Option<u32> {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse("http://relative.invalid/").ok()?;
            base.join(url).ok()?
        }
        Err(_) => return None,
    };
    parsed
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}
