use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared_types::timestamp;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::datastore::DataStore;
use crate::error::{Error, Result};
use crate::http::{Credential, HttpClient, Query};
use crate::ordered::OrderedDataStore;
use crate::pagination::{PageFields, PageRequest, Paginator};

const DATASTORE_PAGES: PageFields = PageFields {
    rows: "datastores",
    cursor_param: "cursor",
    next_cursor: "nextPageCursor",
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataStore {
    name: String,
    #[serde(default)]
    created_time: Option<String>,
}

/// An experience's universe: the collection every data store belongs to.
#[derive(Debug, Clone)]
pub struct Universe {
    id: u64,
    credential: Credential,
    http: HttpClient,
}

impl Universe {
    /// Bind to a universe with an API key and the default config.
    pub fn new(id: u64, api_key: impl Into<String>) -> Result<Self> {
        Self::with_credential(id, Credential::api_key(api_key), &ClientConfig::default())
    }

    pub fn with_credential(id: u64, credential: Credential, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            id,
            credential,
            http: HttpClient::new(config)?,
        })
    }

    pub(crate) fn from_parts(id: u64, credential: Credential, http: HttpClient) -> Self {
        Self {
            id,
            credential,
            http,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// A handle to a standard data store. No request is made.
    pub fn data_store(&self, name: impl Into<String>, scope: Option<&str>) -> DataStore {
        DataStore::new(
            name,
            self.id,
            scope.map(str::to_owned),
            None,
            self.credential.clone(),
            self.http.clone(),
        )
    }

    /// A handle to an ordered data store. No request is made.
    pub fn ordered_data_store(
        &self,
        name: impl Into<String>,
        scope: Option<&str>,
    ) -> OrderedDataStore {
        OrderedDataStore::new(
            name,
            self.id,
            scope.map(str::to_owned),
            self.credential.clone(),
            self.http.clone(),
        )
    }

    /// Iterate over the standard data stores of this universe.
    ///
    /// Every yielded handle is bound to `scope`.
    #[instrument(skip(self), fields(universe_id = self.id))]
    pub fn list_data_stores(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
        scope: Option<&str>,
    ) -> Paginator<DataStore> {
        let mut query = Query::new();
        query.push_opt("prefix", prefix.filter(|p| !p.is_empty()));

        let request = PageRequest {
            path: format!("/datastores/v1/universes/{}/standard-datastores", self.id),
            query,
            credential: self.credential.clone(),
            subject: format!("universe {}", self.id),
        };

        let universe = self.clone();
        let scope = scope.map(str::to_owned);
        Paginator::new(
            self.http.clone(),
            request,
            DATASTORE_PAGES,
            limit,
            Box::new(move |row: serde_json::Value| -> Result<DataStore> {
                let raw: RawDataStore = serde_json::from_value(row)?;
                let created = raw.created_time.as_deref().map(parse_created).transpose()?;
                Ok(DataStore::new(
                    raw.name,
                    universe.id,
                    scope.clone(),
                    created,
                    universe.credential.clone(),
                    universe.http.clone(),
                ))
            }),
        )
    }
}

fn parse_created(raw: &str) -> Result<DateTime<Utc>> {
    timestamp::parse(raw)
        .map_err(|e| Error::Decode(format!("createdTime '{raw}': {e}")))
}
