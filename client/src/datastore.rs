use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{
    timestamp, Entry, EntryInfo, EntryVersion, ListedEntry, SortOrder, VersionOrigin,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{instrument, warn};

use crate::classify::{check, Outcome, Surface};
use crate::error::{Error, PreconditionFailed, PreconditionReason, Result, UsageError};
use crate::http::{Credential, HttpClient, Query};
use crate::keys;
use crate::pagination::{PageFields, PageRequest, Paginator};

const VERSION_HEADER: &str = "roblox-entry-version";
const CREATED_HEADER: &str = "roblox-entry-created-time";
const UPDATED_HEADER: &str = "roblox-entry-version-created-time";
const USER_IDS_HEADER: &str = "roblox-entry-userids";
const ATTRIBUTES_HEADER: &str = "roblox-entry-attributes";
const CONTENT_MD5_HEADER: &str = "content-md5";

const KEY_PAGES: PageFields = PageFields {
    rows: "keys",
    cursor_param: "cursor",
    next_cursor: "nextPageCursor",
};

const VERSION_PAGES: PageFields = PageFields {
    rows: "versions",
    cursor_param: "cursor",
    next_cursor: "nextPageCursor",
};

/// Options for [`DataStore::set`]
///
/// `exclusive_create` and `previous_version` are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub users: Vec<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub exclusive_create: bool,
    pub previous_version: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(mut self, users: Vec<u64>) -> Self {
        self.users = users;
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Only write if the key does not exist yet
    pub fn exclusive_create(mut self) -> Self {
        self.exclusive_create = true;
        self
    }

    /// Only write if the current version is `version`
    pub fn previous_version(mut self, version: impl Into<String>) -> Self {
        self.previous_version = Some(version.into());
        self
    }

    fn conflict_reason(&self) -> PreconditionReason {
        match (&self.previous_version, self.exclusive_create) {
            (_, true) => PreconditionReason::AlreadyExists,
            (Some(expected), false) => PreconditionReason::VersionMismatch {
                expected: expected.clone(),
            },
            (None, false) => PreconditionReason::Unspecified,
        }
    }
}

/// Options for [`DataStore::increment`]
#[derive(Debug, Clone, Default)]
pub struct IncrementOptions {
    pub users: Vec<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Options for [`DataStore::list_versions`]
#[derive(Debug, Clone, Default)]
pub struct ListVersionsOptions {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub order: SortOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    version: String,
    deleted: bool,
    content_length: u64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    created_time: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    object_created_time: DateTime<Utc>,
}

impl RawVersion {
    fn into_version(self, origin: VersionOrigin) -> EntryVersion {
        EntryVersion::new(
            self.version,
            self.deleted,
            self.content_length,
            self.created_time,
            self.object_created_time,
            origin,
        )
    }
}

/// A standard data store: versioned JSON values addressed by scope and key.
///
/// A store created without a scope addresses entries with `scope/key` strings.
#[derive(Debug, Clone)]
pub struct DataStore {
    name: String,
    universe_id: u64,
    scope: Option<String>,
    created: Option<DateTime<Utc>>,
    credential: Credential,
    http: HttpClient,
}

impl DataStore {
    pub(crate) fn new(
        name: impl Into<String>,
        universe_id: u64,
        scope: Option<String>,
        created: Option<DateTime<Utc>>,
        credential: Credential,
        http: HttpClient,
    ) -> Self {
        Self {
            name: name.into(),
            universe_id,
            scope,
            created,
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

    /// Creation time, known only for stores obtained from a listing
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    fn path(&self, suffix: &str) -> String {
        format!(
            "/datastores/v1/universes/{}/standard-datastores/datastore/entries{suffix}",
            self.universe_id
        )
    }

    fn entry_query(&self, scope: &str, key: &str) -> Query {
        let mut query = Query::new();
        query
            .push("datastoreName", &self.name)
            .push("scope", scope)
            .push("entryKey", key);
        query
    }

    fn request(&self, method: Method, suffix: &str, query: &Query) -> RequestBuilder {
        self.http
            .request(method, &self.path(suffix), Some(&self.credential))
            .query(query.pairs())
    }

    fn origin(&self, scope: &str, key: &str) -> VersionOrigin {
        VersionOrigin {
            datastore: self.name.clone(),
            scope: scope.to_string(),
            key: key.to_string(),
        }
    }

    /// Iterate over the keys of this store's scope, or of every scope if it has none.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub fn list_keys(&self, prefix: Option<&str>, limit: Option<usize>) -> Paginator<ListedEntry> {
        let mut query = Query::new();
        query
            .push("datastoreName", &self.name)
            .push_opt("scope", self.scope.as_deref())
            .push_opt("AllScopes", self.scope.is_none().then_some(true))
            .push_opt("prefix", prefix.filter(|p| !p.is_empty()));

        let request = PageRequest {
            path: self.path(""),
            query,
            credential: self.credential.clone(),
            subject: format!("data store '{}'", self.name),
        };
        Paginator::new(
            self.http.clone(),
            request,
            KEY_PAGES,
            limit,
            Box::new(|row: serde_json::Value| -> Result<ListedEntry> {
                Ok(serde_json::from_value(row)?)
            }),
        )
    }

    /// Read the current value of a key. `None` means the key holds no value.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;
        let request = self.request(Method::GET, "/entry", &self.entry_query(scope, key));
        read_entry(self.http.execute(request).await?, key).await
    }

    /// Read the current value of a key, decoded into `T`.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, EntryInfo)>> {
        match self.get(key).await? {
            Some(entry) => Ok(Some((serde_json::from_value(entry.value)?, entry.info))),
            None => Ok(None),
        }
    }

    /// Write a value, optionally guarded by a precondition.
    ///
    /// A refused precondition surfaces as [`Error::PreconditionFailed`] carrying
    /// the value and info the entry holds now.
    #[instrument(skip(self, value, options), fields(datastore = %self.name))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<EntryVersion> {
        if options.exclusive_create && options.previous_version.is_some() {
            return Err(UsageError::ConflictingPreconditions.into());
        }
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;

        let body = serde_json::to_vec(value)?;
        let content_md5 = STANDARD.encode(Md5::digest(&body));

        let mut query = self.entry_query(scope, key);
        query
            .push("exclusiveCreate", options.exclusive_create)
            .push_opt("matchVersion", options.previous_version.as_deref());

        let request = self
            .request(Method::POST, "/entry", &query)
            .header(USER_IDS_HEADER, serde_json::to_string(&options.users)?)
            .header(ATTRIBUTES_HEADER, serde_json::to_string(&options.metadata)?)
            .header(CONTENT_MD5_HEADER, content_md5)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = self.http.execute(request).await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            let conflict = precondition_failed(response, options.conflict_reason()).await;
            warn!(key, reason = %conflict.reason, "conditional write refused");
            return Err(conflict.into());
        }

        match check(response, Surface::Storage, &format!("key '{key}'")).await? {
            Outcome::Content(response) => {
                let raw: RawVersion = response.json().await?;
                Ok(raw.into_version(self.origin(scope, key)))
            }
            Outcome::NoContent => Err(Error::Decode(
                "write succeeded without returning a version".to_string(),
            )),
        }
    }

    /// Atomically add `delta` to a numeric entry and return the result.
    #[instrument(skip(self, options), fields(datastore = %self.name))]
    pub async fn increment(
        &self,
        key: &str,
        delta: f64,
        options: IncrementOptions,
    ) -> Result<Entry> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;

        let mut query = self.entry_query(scope, key);
        query.push("incrementBy", delta);

        let request = self
            .request(Method::POST, "/entry/increment", &query)
            .header(USER_IDS_HEADER, serde_json::to_string(&options.users)?)
            .header(ATTRIBUTES_HEADER, serde_json::to_string(&options.metadata)?);

        read_entry(self.http.execute(request).await?, key)
            .await?
            .ok_or_else(|| Error::Decode("increment returned no value".to_string()))
    }

    /// Delete a key. A missing key is reported as [`Error::NotFound`].
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn remove(&self, key: &str) -> Result<()> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;
        let request = self.request(Method::DELETE, "/entry", &self.entry_query(scope, key));
        let response = self.http.execute(request).await?;
        check(response, Surface::Storage, &format!("key '{key}'")).await?;
        Ok(())
    }

    /// Iterate over the versions of a key, newest first unless asked otherwise.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub fn list_versions(
        &self,
        key: &str,
        options: ListVersionsOptions,
    ) -> Result<Paginator<EntryVersion>> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;

        let mut query = self.entry_query(scope, key);
        query
            .push(
                "sortOrder",
                if options.order.is_descending() {
                    "Descending"
                } else {
                    "Ascending"
                },
            )
            .push_opt("startTime", options.after.map(format_time))
            .push_opt("endTime", options.before.map(format_time));

        let request = PageRequest {
            path: self.path("/entry/versions"),
            query,
            credential: self.credential.clone(),
            subject: format!("key '{key}'"),
        };
        let origin = self.origin(scope, key);
        Ok(Paginator::new(
            self.http.clone(),
            request,
            VERSION_PAGES,
            options.limit,
            Box::new(move |row: serde_json::Value| -> Result<EntryVersion> {
                let raw: RawVersion = serde_json::from_value(row)?;
                Ok(raw.into_version(origin.clone()))
            }),
        ))
    }

    /// Read the value a key held at `version`.
    #[instrument(skip(self), fields(datastore = %self.name))]
    pub async fn get_version(&self, key: &str, version: &str) -> Result<Option<Entry>> {
        let (scope, key) = keys::resolve(self.scope.as_deref(), key)?;
        self.read_version(scope, key, version).await
    }

    /// Read the value of a version obtained from [`DataStore::list_versions`].
    #[instrument(skip_all, fields(datastore = %self.name, version = %version.version))]
    pub async fn fetch_version(&self, version: &EntryVersion) -> Result<Option<Entry>> {
        let origin = version.origin();
        if origin.datastore != self.name {
            return Err(UsageError::ForeignVersion {
                datastore: origin.datastore.clone(),
            }
            .into());
        }
        self.read_version(&origin.scope, &origin.key, &version.version)
            .await
    }

    async fn read_version(&self, scope: &str, key: &str, version: &str) -> Result<Option<Entry>> {
        let mut query = self.entry_query(scope, key);
        query.push("versionId", version);
        let request = self.request(Method::GET, "/entry/versions/version", &query);
        read_entry(self.http.execute(request).await?, key).await
    }
}

impl fmt::Display for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

async fn read_entry(response: Response, key: &str) -> Result<Option<Entry>> {
    match check(response, Surface::Storage, &format!("key '{key}'")).await? {
        Outcome::NoContent => Ok(None),
        Outcome::Content(response) => {
            let info = entry_info(response.headers())?;
            let value = response.json().await?;
            Ok(Some(Entry { value, info }))
        }
    }
}

async fn precondition_failed(response: Response, reason: PreconditionReason) -> PreconditionFailed {
    let info = entry_info(response.headers()).ok();
    let body = response.bytes().await.unwrap_or_default();
    PreconditionFailed {
        value: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        info,
        reason,
    }
}

fn entry_info(headers: &HeaderMap) -> Result<EntryInfo> {
    let version = required_header(headers, VERSION_HEADER)?;
    let created = timestamp_header(headers, CREATED_HEADER)?;
    let updated = timestamp_header(headers, UPDATED_HEADER)?;
    let users = json_header(headers, USER_IDS_HEADER)?;
    let metadata = json_header(headers, ATTRIBUTES_HEADER)?;
    Ok(EntryInfo::new(version, created, updated, users, metadata))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| Error::Decode(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| Error::Decode(format!("{name} header is not valid text")))
}

fn timestamp_header(headers: &HeaderMap, name: &str) -> Result<DateTime<Utc>> {
    let raw = required_header(headers, name)?;
    timestamp::parse(raw).map_err(|e| Error::Decode(format!("{name} header '{raw}': {e}")))
}

/// Decode a JSON header, falling back to an empty value when it is absent.
fn json_header<T: DeserializeOwned + Default>(headers: &HeaderMap, name: &str) -> Result<T> {
    match headers.get(name) {
        None => Ok(T::default()),
        Some(_) => Ok(serde_json::from_str(required_header(headers, name)?)?),
    }
}
