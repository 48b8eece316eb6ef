#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod timestamp;

/// Scope used by ordered entries when none is given.
pub const GLOBAL_SCOPE: &str = "global";

/// Metadata attached to the current revision of a data store entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryInfo {
    pub version: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub users: Vec<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EntryInfo {
    pub fn new(
        version: impl Into<String>,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
        users: Vec<u64>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            version: version.into(),
            created,
            updated,
            users,
            metadata,
        }
    }
}

/// The value of an entry together with its revision metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub value: serde_json::Value,
    pub info: EntryInfo,
}

impl Entry {
    /// Decode the stored JSON into a concrete type
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// Where an [`EntryVersion`] was read from.
///
/// Captured by value so a version can be re-fetched later without holding on
/// to the store handle that listed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VersionOrigin {
    pub datastore: String,
    pub scope: String,
    pub key: String,
}

/// One revision of a data store entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryVersion {
    pub version: String,
    pub deleted: bool,
    pub content_length: u64,
    pub created: DateTime<Utc>,
    pub key_created: DateTime<Utc>,
    origin: VersionOrigin,
}

impl EntryVersion {
    pub fn new(
        version: impl Into<String>,
        deleted: bool,
        content_length: u64,
        created: DateTime<Utc>,
        key_created: DateTime<Utc>,
        origin: VersionOrigin,
    ) -> Self {
        Self {
            version: version.into(),
            deleted,
            content_length,
            created,
            key_created,
            origin,
        }
    }

    pub fn origin(&self) -> &VersionOrigin {
        &self.origin
    }

    pub fn key(&self) -> &str {
        &self.origin.key
    }

    pub fn scope(&self) -> &str {
        &self.origin.scope
    }
}

impl PartialEq for EntryVersion {
    fn eq(&self, other: &Self) -> bool {
        self.origin.key == other.origin.key
            && self.origin.scope == other.origin.scope
            && self.version == other.version
    }
}

impl Eq for EntryVersion {}

/// A key returned by a key listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ListedEntry {
    pub key: String,
    pub scope: String,
}

impl ListedEntry {
    pub fn new(key: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scope: scope.into(),
        }
    }

    /// The `scope/key` form accepted by scope-less stores
    pub fn to_path(&self) -> String {
        format!("{}/{}", self.scope, self.key)
    }
}

impl fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path())
    }
}

/// A row of an ordered data store listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SortedEntry {
    pub key: String,
    pub scope: String,
    pub value: i64,
}

impl SortedEntry {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            scope: GLOBAL_SCOPE.to_string(),
            value,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// Ordering requested from a listing endpoint. The service does the sorting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn is_descending(self) -> bool {
        matches!(self, Self::Descending)
    }
}

/// Claims returned by the OAuth2 userinfo endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Account creation time as a unix timestamp
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Who owns a resource an access token was granted for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceOwner {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Universes an access token may act on, grouped by owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantedResource {
    pub owner: ResourceOwner,
    pub universe_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn origin(scope: &str, key: &str) -> VersionOrigin {
        VersionOrigin {
            datastore: "players".to_string(),
            scope: scope.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_entry_version_equality_ignores_metadata() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let a = EntryVersion::new("v1", false, 10, t1, t1, origin("global", "k"));
        let b = EntryVersion::new("v1", true, 99, t2, t2, origin("global", "k"));
        let c = EntryVersion::new("v1", false, 10, t1, t1, origin("other", "k"));
        let d = EntryVersion::new("v2", false, 10, t1, t1, origin("global", "k"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_sorted_entry_defaults_to_global_scope() {
        let entry = SortedEntry::new("player_1", 42);
        assert_eq!(entry.scope, GLOBAL_SCOPE);
        assert_eq!(entry, SortedEntry::new("player_1", 42).with_scope("global"));
        assert_ne!(entry, SortedEntry::new("player_1", 43));
        assert_ne!(entry, SortedEntry::new("player_1", 42).with_scope("season-2"));
    }

    #[test]
    fn test_listed_entry_path() {
        let entry = ListedEntry::new("coins", "user_1");
        assert_eq!(entry.to_path(), "user_1/coins");
        assert_eq!(entry.to_string(), "user_1/coins");
        assert_eq!(entry, ListedEntry::new("coins", "user_1"));
        assert_ne!(entry, ListedEntry::new("coins", "user_2"));
    }

    #[test]
    fn test_user_info_optional_claims() {
        let info: UserInfo = serde_json::from_str(r#"{"sub": "123"}"#).unwrap();
        assert_eq!(info.sub, "123");
        assert!(info.name.is_none());
        assert!(info.created_at.is_none());
    }

    #[test]
    fn test_sort_order_default() {
        assert!(SortOrder::default().is_descending());
        assert!(!SortOrder::Ascending.is_descending());
    }
}
