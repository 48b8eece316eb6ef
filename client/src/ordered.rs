use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use shared_types::{SortOrder, SortedEntry};
use std::fmt;
use tracing::instrument;

use crate::classify::{check, Outcome, Surface};
use crate::error::{Error, Result, UsageError};
use crate::http::{Credential, HttpClient, Query};
use crate::keys;
use crate::pagination::{PageFields, PageRequest, Paginator};

/// Largest page the service hands out
const MAX_PAGE_SIZE: usize = 100;

const ENTRY_PAGES: PageFields = PageFields {
    rows: "entries",
    cursor_param: "page_token",
    next_cursor: "lastEvaluatedKey",
};

#[derive(Debug, Deserialize)]
struct RawSortedEntry {
    target: String,
    value: Value,
}

/// An ordered data store: integer values that the service can sort.
#[derive(Debug, Clone)]
pub struct OrderedDataStore {
    name: String,
    universe_id: u64,
    scope: Option<String>,
    credential: Credential,
    http: HttpClient,
}

impl OrderedDataStore {
    pub(crate) fn new(
        name: impl Into<String>,
        universe_id: u64,
        scope: Option<String>,
        credential: Credential,
        http: HttpClient,
    ) -> Self {
        Self {
            name: name.into(),
            universe_id,
            scope,
            credential,
            http,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn universe_id(&self) -> u64 {
        self.universe_id
    }

    fn entries_path(&self, scope: &str) -> String {
        format!(
            "/datastores/v2/universes/{}/orderedDatastores/{}/scopes/{}/entries",
            self.universe_id,
            encode_segment(&self.name),
            encode_segment(scope)
        )
    }

    fn entry_request(&self, method: Method, key: &str) -> Result<(RequestBuilder, String)> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;
        let path = format!("{}/{}", self.entries_path(scope), encode_segment(key));
        let request = self.http.request(method, &path, Some(&self.credential));
        Ok((request, format!("key '{key}'")))
    }

    /// Iterate over the entries of this store's scope in value order.
    ///
    /// Needs a store bound to a scope.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub fn sort_keys(
        &self,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Paginator<SortedEntry>> {
        let scope = self.scope.clone().ok_or(UsageError::ScopeRequired)?;

        let page_size = limit
            .filter(|limit| *limit > 0)
            .map_or(MAX_PAGE_SIZE, |limit| limit.min(MAX_PAGE_SIZE));
        let mut query = Query::new();
        query
            .push("max_page_size", page_size)
            .push_opt("order_by", order.is_descending().then_some("desc"));

        let request = PageRequest {
            path: self.entries_path(&scope),
            query,
            credential: self.credential.clone(),
            subject: format!("ordered data store '{}'", self.name),
        };
        Ok(Paginator::new(
            self.http.clone(),
            request,
            ENTRY_PAGES,
            limit,
            Box::new(move |row: Value| -> Result<SortedEntry> {
                let raw: RawSortedEntry = serde_json::from_value(row)?;
                let value = parse_value(&raw.value)?;
                Ok(SortedEntry::new(raw.target, value).with_scope(scope.as_str()))
            }),
        ))
    }

    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn get(&self, key: &str) -> Result<i64> {
        let (request, subject) = self.entry_request(Method::GET, key)?;
        read_value(self.http.execute(request).await?, &subject).await
    }

    /// Create an entry. Fails if the key already holds a value.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn create(&self, key: &str, value: i64) -> Result<i64> {
        let (request, subject) = self.entry_request(Method::POST, key)?;
        let request = request
            .header(CONTENT_TYPE, "application/json")
            .body(value.to_string());
        read_value(self.http.execute(request).await?, &subject).await
    }

    /// Update an entry.
    ///
    /// Without `previous_value` the write is unconditional and creates the
    /// entry if it is missing. With it, the service only applies the write if
    /// the stored value still equals `previous_value`.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn update(&self, key: &str, value: i64, previous_value: Option<i64>) -> Result<i64> {
        let (request, subject) = self.entry_request(Method::PATCH, key)?;

        let mut query = Query::new();
        query
            .push_opt("eTag", previous_value)
            .push("allow_missing", previous_value.is_none());

        let request = request
            .query(query.pairs())
            .header(CONTENT_TYPE, "application/json")
            .body(value.to_string());
        read_value(self.http.execute(request).await?, &subject).await
    }

    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn remove(&self, key: &str) -> Result<()> {
        let (request, subject) = self.entry_request(Method::DELETE, key)?;
        check(self.http.execute(request).await?, Surface::Storage, &subject).await?;
        Ok(())
    }
}

impl fmt::Display for OrderedDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Path segments are opaque to the service and must be URL-safe.
fn encode_segment(raw: &str) -> String {
    URL_SAFE.encode(raw.as_bytes())
}

async fn read_value(response: Response, subject: &str) -> Result<i64> {
    match check(response, Surface::Storage, subject).await? {
        Outcome::Content(response) => {
            let body: Value = response.json().await?;
            let value = body
                .get("value")
                .ok_or_else(|| Error::Decode("entry response has no value".to_string()))?;
            parse_value(value)
        }
        Outcome::NoContent => Err(Error::Decode("entry response was empty".to_string())),
    }
}

/// Values arrive either as JSON numbers or as numeric strings.
fn parse_value(value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Decode(format!("'{value}' is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_segment_is_url_safe() {
        assert_eq!(encode_segment("global"), "Z2xvYmFs");
        assert_eq!(encode_segment(">>?"), "Pj4_");
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(&json!(42)).unwrap(), 42);
        assert_eq!(parse_value(&json!("-7")).unwrap(), -7);
        assert!(parse_value(&json!(1.5)).is_err());
        assert!(parse_value(&json!("seven")).is_err());
        assert!(parse_value(&json!(null)).is_err());
    }
}
