//! Cursor-driven listing.
//!
//! Every listing endpoint returns a JSON object holding an array of rows and
//! an optional continuation cursor. [`Paginator`] walks those pages lazily:
//! a page is only requested when the caller asks for a row the previous page
//! did not hold.

use futures::Stream;
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

use crate::classify::{check, Outcome, Surface};
use crate::error::{Error, Result};
use crate::http::{Credential, HttpClient, Query};

pub(crate) type RowDecoder<T> = Box<dyn Fn(Value) -> Result<T> + Send + Sync>;

/// Field names of one paged endpoint
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageFields {
    /// Array of rows in the response body
    pub rows: &'static str,
    /// Query parameter carrying the cursor on follow-up requests
    pub cursor_param: &'static str,
    /// Response field holding the next cursor
    pub next_cursor: &'static str,
}

/// The fixed part of every page request of one walk
#[derive(Debug, Clone)]
pub(crate) struct PageRequest {
    pub path: String,
    pub query: Query,
    pub credential: Credential,
    /// What a 404 refers to
    pub subject: String,
}

/// A forward-only, single-consumer walk over a paged listing.
///
/// Each listing call returns a fresh paginator with its own cursor. Rows are
/// yielded in the order the service returns them. Once `limit` rows have been
/// yielded nothing more is fetched, and rows left over in the last page are
/// dropped. Rows are decoded as they are handed out, so a malformed row fails
/// at its own position. Any failure ends the walk; rows already yielded stay
/// valid.
pub struct Paginator<T> {
    http: HttpClient,
    request: PageRequest,
    fields: PageFields,
    decode: RowDecoder<T>,
    limit: Option<usize>,
    yielded: usize,
    rows: VecDeque<Value>,
    cursor: Option<String>,
    finished: bool,
}

impl<T> Paginator<T> {
    pub(crate) fn new(
        http: HttpClient,
        request: PageRequest,
        fields: PageFields,
        limit: Option<usize>,
        decode: RowDecoder<T>,
    ) -> Self {
        Self {
            http,
            request,
            fields,
            decode,
            limit,
            yielded: 0,
            rows: VecDeque::new(),
            cursor: None,
            finished: false,
        }
    }

    /// Number of rows handed out so far
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Pull the next row, fetching another page if needed.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                self.finish();
                return Ok(None);
            }
            if let Some(raw) = self.rows.pop_front() {
                let row = match (self.decode)(raw) {
                    Ok(row) => row,
                    Err(err) => {
                        self.finish();
                        return Err(err);
                    }
                };
                self.yielded += 1;
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }
            if let Err(err) = self.fetch_page().await {
                self.finish();
                return Err(err);
            }
        }
    }

    /// Drain the walk into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut all_rows = Vec::new();
        while let Some(row) = self.next().await? {
            all_rows.push(row);
        }
        Ok(all_rows)
    }

    /// Adapt the walk into a [`Stream`] of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::try_unfold(self, |mut pager| async move {
            let row = pager.next().await?;
            Ok::<_, Error>(row.map(|row| (row, pager)))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.rows.clear();
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let mut request = self
            .http
            .request(Method::GET, &self.request.path, Some(&self.request.credential))
            .query(self.request.query.pairs());
        if let Some(cursor) = &self.cursor {
            request = request.query(&[(self.fields.cursor_param, cursor.as_str())]);
        }

        let response = self.http.execute(request).await?;
        let mut page: Map<String, Value> =
            match check(response, Surface::Storage, &self.request.subject).await? {
                Outcome::Content(response) => response.json().await?,
                Outcome::NoContent => Map::new(),
            };

        let rows = match page.remove(self.fields.rows) {
            Some(Value::Array(rows)) => rows,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(Error::Decode(format!(
                    "expected '{}' to be an array, got {other}",
                    self.fields.rows
                )))
            }
        };
        let next_cursor = match page.remove(self.fields.next_cursor) {
            Some(Value::String(cursor)) if !cursor.is_empty() => Some(cursor),
            _ => None,
        };

        let remaining = self
            .limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.yielded));
        debug!(
            path = %self.request.path,
            rows = rows.len(),
            has_more = next_cursor.is_some(),
            "fetched page"
        );
        self.rows.extend(rows.into_iter().take(remaining));

        self.finished = next_cursor.is_none();
        self.cursor = next_cursor;
        Ok(())
    }
}

impl<T> fmt::Debug for Paginator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("path", &self.request.path)
            .field("limit", &self.limit)
            .field("yielded", &self.yielded)
            .field("buffered", &self.rows.len())
            .field("cursor", &self.cursor)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
