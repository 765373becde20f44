//! Cursor paginator over list endpoints.
//!
//! A logical sequence moves `Start -> Fetching -> (HasNext -> Fetching | Done)`;
//! each fetch is one [`RestClient::execute`] call with its own retry loop.

use futures::stream::{self, Stream, TryStreamExt};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;

use super::classify::{ApiError, ErrorKind};
use super::links::PaginationLinks;
use super::quota::QuotaState;
use super::RestClient;
use crate::cancel::CancelToken;
use crate::types::{PageCursor, PaginationStyle, RequestSpec};

/// One fetched page and where the next one is, if anywhere.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: PageCursor,
    pub next: Option<PageCursor>,
    pub links: PaginationLinks,
    pub quota: Option<QuotaState>,
}

enum Step {
    Start,
    HasNext(PageCursor),
    Done,
}

struct SequenceState<T> {
    buffer: VecDeque<T>,
    step: Step,
}

/// Decide the follow-up cursor. A short or empty page is always final; with
/// Link pagination a full page without `rel="next"` is final as well.
pub fn next_cursor(
    style: PaginationStyle,
    cursor: &PageCursor,
    returned: usize,
    links: &PaginationLinks,
) -> Option<PageCursor> {
    if returned == 0 || returned < cursor.per_page as usize {
        return None;
    }
    if let Some(next) = &links.next {
        return Some(PageCursor {
            page: next.page.unwrap_or(cursor.page + 1),
            per_page: cursor.per_page,
            next_url: Some(next.url.clone()),
        });
    }
    match style {
        PaginationStyle::Link => None,
        PaginationStyle::PageNumber => Some(PageCursor {
            page: cursor.page + 1,
            per_page: cursor.per_page,
            next_url: None,
        }),
    }
}

fn list_items(body: Value, field: Option<&str>) -> Option<Vec<Value>> {
    match (body, field) {
        (Value::Null, _) => Some(Vec::new()),
        (Value::Object(mut map), Some(f)) => match map.remove(f) {
            Some(Value::Array(items)) => Some(items),
            Some(Value::Null) | None => Some(Vec::new()),
            Some(_) => None,
        },
        (Value::Array(items), None) => Some(items),
        // search endpoints wrap results in `items`
        (Value::Object(mut map), None) => match map.remove("items") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

impl RestClient {
    pub fn first_cursor(&self, spec: &RequestSpec) -> PageCursor {
        PageCursor::first(self.config().clamp_per_page(spec.per_page))
    }

    /// Fetch the page `cursor` points at (the first page when `None`).
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        cursor: Option<&PageCursor>,
        cancel: &CancelToken,
    ) -> Result<Page<T>, ApiError> {
        let mut cursor = cursor.cloned().unwrap_or_else(|| self.first_cursor(spec));
        cursor.per_page = self.config().clamp_per_page(Some(cursor.per_page));

        let page_spec = spec.for_page(&cursor);
        let envelope = self.execute(&page_spec, cancel).await?;

        let raw = list_items(envelope.body, spec.items_field.as_deref()).ok_or_else(|| {
            ApiError::local(
                ErrorKind::Unknown,
                &page_spec.path,
                "response body is not a list",
            )
        })?;
        let returned = raw.len();
        let items = raw
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| {
                ApiError::local(
                    ErrorKind::Unknown,
                    &page_spec.path,
                    format!("unexpected item shape: {}", e),
                )
            })?;

        let next = next_cursor(spec.pagination, &cursor, returned, &envelope.links);
        debug!(
            "{} page {}: {} item(s), more={}",
            spec.path,
            cursor.page,
            returned,
            next.is_some()
        );
        self.observer.on_page(cursor.page, returned);
        Ok(Page {
            items,
            cursor,
            next,
            links: envelope.links,
            quota: envelope.quota,
        })
    }

    /// Lazy sequence over every item of the collection, starting from the
    /// first page. Dropping the stream abandons the sequence; resuming needs
    /// a persisted cursor and [`RestClient::fetch_page`].
    pub fn sequence<'a, T>(
        &'a self,
        spec: &'a RequestSpec,
        cancel: &'a CancelToken,
    ) -> impl Stream<Item = Result<T, ApiError>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        let init = SequenceState {
            buffer: VecDeque::new(),
            step: Step::Start,
        };
        stream::try_unfold(init, move |mut state| async move {
            loop {
                if let Some(item) = state.buffer.pop_front() {
                    return Ok(Some((item, state)));
                }
                let cursor = match std::mem::replace(&mut state.step, Step::Done) {
                    Step::Done => return Ok(None),
                    Step::Start => None,
                    Step::HasNext(c) => Some(c),
                };
                let page = match self.fetch_page::<T>(spec, cursor.as_ref(), cancel).await {
                    Ok(page) => page,
                    Err(e) => return Err(e),
                };
                if let Some(next) = page.next {
                    state.step = Step::HasNext(next);
                }
                state.buffer.extend(page.items);
            }
        })
    }

    /// Drain the sequence into memory, stopping once `max_items` is reached
    /// without fetching further pages.
    pub async fn collect_all<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        max_items: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<T>, ApiError> {
        let mut out = Vec::new();
        if max_items == Some(0) {
            return Ok(out);
        }
        let mut items = std::pin::pin!(self.sequence::<T>(spec, cancel));
        while let Some(item) = items.try_next().await? {
            out.push(item);
            if max_items.is_some_and(|max| out.len() >= max) {
                break;
            }
        }
        Ok(out)
    }
}
