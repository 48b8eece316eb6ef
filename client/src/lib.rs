//! Async client for Roblox Open Cloud data stores and OAuth2.
//!
//! Start from a [`Universe`] for API-key access, or from an [`OAuth2App`] to
//! obtain a token and then call [`BearerToken::universe`].
//!
//! ```no_run
//! # async fn demo() -> opencloud_client::Result<()> {
//! use opencloud_client::{SetOptions, Universe};
//!
//! let universe = Universe::new(1234, "my-api-key")?;
//! let store = universe.data_store("players", Some("global"));
//! store.set("coins", &100, SetOptions::new()).await?;
//! let keys = store.list_keys(None, Some(10)).collect_all().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod classify;
pub mod config;
mod datastore;
pub mod error;
mod http;
mod keys;
pub mod oauth2;
mod ordered;
mod pagination;
mod universe;

pub use config::ClientConfig;
pub use datastore::{DataStore, IncrementOptions, ListVersionsOptions, SetOptions};
pub use error::{Error, PreconditionFailed, PreconditionReason, Result, UsageError};
pub use http::Credential;
pub use oauth2::{AccessToken, BearerToken, OAuth2App, TokenGrant};
pub use ordered::OrderedDataStore;
pub use pagination::Paginator;
pub use universe::Universe;

pub use shared_types::{
    Entry, EntryInfo, EntryVersion, GrantedResource, ListedEntry, ResourceOwner, SortOrder,
    SortedEntry, UserInfo, VersionOrigin, GLOBAL_SCOPE,
};
