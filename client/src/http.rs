use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;

const API_KEY_HEADER: &str = "x-api-key";

/// What a request is authenticated with
#[derive(Clone)]
pub enum Credential {
    /// An Open Cloud API key, sent as `x-api-key`
    ApiKey(Arc<SecretString>),
    /// An OAuth2 access token, sent as `authorization: Bearer ...`
    Bearer(Arc<SecretString>),
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(Arc::new(SecretString::new(key.into())))
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(Arc::new(SecretString::new(token.into())))
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => request.header(API_KEY_HEADER, key.expose_secret().as_str()),
            Self::Bearer(token) => request.bearer_auth(token.expose_secret()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credential::ApiKey([REDACTED])"),
            Self::Bearer(_) => f.write_str("Credential::Bearer([REDACTED])"),
        }
    }
}

/// Shared transport for all handles built from one config
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: ReqwestClient,
    base_url: Arc<str>,
}

impl HttpClient {
    pub(crate) fn new(config: &ClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').into(),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match credential {
            Some(credential) => credential.apply(request),
            None => request,
        }
    }

    /// Send one exchange. Status codes are left to the classifier.
    pub(crate) async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_owned();

        let response = self.client.execute(request).await?;
        debug!(%method, path = %path, status = response.status().as_u16(), "exchange completed");
        Ok(response)
    }
}

/// Query parameters in send order. Absent values are never added.
#[derive(Debug, Clone, Default)]
pub(crate) struct Query(Vec<(&'static str, String)>);

impl Query {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: &'static str, value: impl ToString) -> &mut Self {
        self.0.push((name, value.to_string()));
        self
    }

    pub(crate) fn push_opt<V: ToString>(
        &mut self,
        name: &'static str,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.push(name, value);
        }
        self
    }

    pub(crate) fn pairs(&self) -> &[(&'static str, String)] {
        &self.0
    }
}
