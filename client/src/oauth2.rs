//! OAuth2 authorization-code flow.
//!
//! [`OAuth2App`] mints, refreshes and revokes tokens. A token is used through
//! [`BearerToken`], the capability every token has. [`AccessToken`] adds the
//! grant that comes with a code exchange or refresh. Nothing here refreshes a
//! token on its own; expiry is exposed as data.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use shared_types::{GrantedResource, ResourceOwner, UserInfo};
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

use crate::classify::{check, Outcome, Surface};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::{Credential, HttpClient};
use crate::universe::Universe;

const AUTHORIZE_PATH: &str = "/oauth/v1/authorize";
const TOKEN_PATH: &str = "/oauth/v1/token";
const REVOKE_PATH: &str = "/oauth/v1/token/revoke";
const USERINFO_PATH: &str = "/oauth/v1/userinfo";
const RESOURCES_PATH: &str = "/oauth/v1/token/resources";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    scope: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resource_infos: Vec<RawResourceInfo>,
}

#[derive(Debug, Deserialize)]
struct RawResourceInfo {
    owner: ResourceOwner,
    #[serde(default)]
    resources: RawResources,
}

#[derive(Debug, Default, Deserialize)]
struct RawResources {
    #[serde(default)]
    universe: Option<RawIds>,
}

#[derive(Debug, Deserialize)]
struct RawIds {
    #[serde(default)]
    ids: Vec<Value>,
}

/// A registered OAuth2 application
#[derive(Debug, Clone)]
pub struct OAuth2App {
    id: u64,
    secret: Arc<SecretString>,
    redirect_uri: String,
    http: HttpClient,
}

impl OAuth2App {
    pub fn new(
        id: u64,
        secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(id, secret, redirect_uri, &ClientConfig::default())
    }

    pub fn with_config(
        id: u64,
        secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Self> {
        Ok(Self {
            id,
            secret: Arc::new(SecretString::new(secret.into())),
            redirect_uri: redirect_uri.into(),
            http: HttpClient::new(config)?,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Build the URL a user is sent to for consent. No request is made.
    ///
    /// With `generate_code` false the service is asked not to issue a code.
    pub fn generate_uri<S: AsRef<str>>(
        &self,
        scopes: &[S],
        state: Option<&str>,
        generate_code: bool,
    ) -> Result<String> {
        let mut url = Url::parse(&format!("{}{AUTHORIZE_PATH}", self.http.base_url()))
            .map_err(|e| Error::Config(format!("invalid base url: {e}")))?;

        let scope = scopes
            .iter()
            .map(|scope| scope.as_ref())
            .collect::<Vec<&str>>()
            .join(" ");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.id.to_string());
            query.append_pair("scope", &scope);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
            query.append_pair("redirect_uri", &self.redirect_uri);
            query.append_pair("response_type", if generate_code { "code" } else { "none" });
        }

        Ok(url.into())
    }

    /// Wrap a token string obtained elsewhere.
    pub fn token_from_string(&self, token: impl Into<String>) -> BearerToken {
        BearerToken {
            app: self.clone(),
            token: Arc::new(SecretString::new(token.into())),
        }
    }

    /// Trade an authorization code for an access token.
    #[instrument(skip_all, fields(client_id = self.id))]
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken> {
        let id = self.id.to_string();
        let form = [
            ("client_id", id.as_str()),
            ("client_secret", self.secret()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
        ];
        let token = self.request_token(&form).await?;
        info!(scopes = ?token.grant.scopes, "authorization code exchanged");
        Ok(token)
    }

    /// Trade a refresh token for a new access token.
    #[instrument(skip_all, fields(client_id = self.id))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AccessToken> {
        let id = self.id.to_string();
        let form = [
            ("client_id", id.as_str()),
            ("client_secret", self.secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let token = self.request_token(&form).await?;
        info!(expires_at = %token.grant.expires_at, "access token refreshed");
        Ok(token)
    }

    /// Revoke an access or refresh token.
    ///
    /// Every call is one request; whether revoking twice succeeds is up to
    /// the service.
    #[instrument(skip_all, fields(client_id = self.id))]
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let id = self.id.to_string();
        let form = [
            ("token", token),
            ("client_id", id.as_str()),
            ("client_secret", self.secret()),
        ];
        let response = self.post_form(REVOKE_PATH, &form).await?;
        check(response, Surface::OAuth, "token").await?;
        info!("token revoked");
        Ok(())
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<AccessToken> {
        let response = self.post_form(TOKEN_PATH, form).await?;
        let payload: TokenResponse = match check(response, Surface::Grant, "token").await? {
            Outcome::Content(response) => response.json().await?,
            Outcome::NoContent => {
                return Err(Error::Decode("token endpoint returned no content".to_string()))
            }
        };
        AccessToken::from_response(self.clone(), payload)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Response> {
        let request = self.http.request(Method::POST, path, None).form(form);
        self.http.execute(request).await
    }
}

/// What any access token can do, whether or not its grant is known
#[derive(Debug, Clone)]
pub struct BearerToken {
    app: OAuth2App,
    token: Arc<SecretString>,
}

impl BearerToken {
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn credential(&self) -> Credential {
        Credential::Bearer(Arc::clone(&self.token))
    }

    /// A universe handle that authenticates with this token.
    pub fn universe(&self, id: u64) -> Universe {
        Universe::from_parts(id, self.credential(), self.app.http.clone())
    }

    /// Read the claims of the user who granted this token.
    #[instrument(skip_all)]
    pub async fn fetch_userinfo(&self) -> Result<UserInfo> {
        let request = self
            .app
            .http
            .request(Method::GET, USERINFO_PATH, Some(&self.credential()));
        let response = self.app.http.execute(request).await?;
        match check(response, Surface::OAuth, "user info").await? {
            Outcome::Content(response) => Ok(response.json().await?),
            Outcome::NoContent => Err(Error::Decode("userinfo returned no content".to_string())),
        }
    }

    /// List the universes this token was granted access to.
    #[instrument(skip_all)]
    pub async fn fetch_resources(&self) -> Result<Vec<GrantedResource>> {
        let id = self.app.id.to_string();
        let form = [
            ("token", self.token()),
            ("client_id", id.as_str()),
            ("client_secret", self.app.secret()),
        ];
        let response = self.app.post_form(RESOURCES_PATH, &form).await?;
        let payload: ResourcesResponse =
            match check(response, Surface::OAuth, "token resources").await? {
                Outcome::Content(response) => response.json().await?,
                Outcome::NoContent => ResourcesResponse {
                    resource_infos: Vec::new(),
                },
            };

        payload
            .resource_infos
            .into_iter()
            .map(|info| {
                let ids = info.resources.universe.map(|u| u.ids).unwrap_or_default();
                Ok(GrantedResource {
                    owner: info.owner,
                    universe_ids: ids.iter().map(parse_id).collect::<Result<_>>()?,
                })
            })
            .collect()
    }

    /// Revoke this token. The handle is consumed.
    #[instrument(skip_all)]
    pub async fn revoke(self) -> Result<()> {
        self.app.revoke_token(self.token()).await
    }
}

/// The grant that accompanies a freshly issued access token
#[derive(Debug, Clone)]
pub struct TokenGrant {
    refresh_token: SecretString,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }
}

/// An access token together with its grant
#[derive(Debug, Clone)]
pub struct AccessToken {
    bearer: BearerToken,
    grant: TokenGrant,
}

impl AccessToken {
    fn from_response(app: OAuth2App, payload: TokenResponse) -> Result<Self> {
        let expires_at = Duration::try_seconds(payload.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Decode(format!("expires_in {} out of range", payload.expires_in))
            })?;
        let scopes = payload
            .scope
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        Ok(Self {
            bearer: BearerToken {
                app,
                token: Arc::new(SecretString::new(payload.access_token)),
            },
            grant: TokenGrant {
                refresh_token: SecretString::new(payload.refresh_token),
                scopes,
                expires_at,
            },
        })
    }

    pub fn bearer(&self) -> &BearerToken {
        &self.bearer
    }

    pub fn into_bearer(self) -> BearerToken {
        self.bearer
    }

    pub fn grant(&self) -> &TokenGrant {
        &self.grant
    }

    pub fn token(&self) -> &str {
        self.bearer.token()
    }

    pub fn refresh_token(&self) -> &str {
        self.grant.refresh_token()
    }

    pub fn scopes(&self) -> &[String] {
        &self.grant.scopes
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.grant.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.grant.expires_at
    }

    /// Use the refresh token to obtain a new access token.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<AccessToken> {
        self.bearer.app.refresh_token(self.refresh_token()).await
    }

    /// Revoke the access token.
    #[instrument(skip_all)]
    pub async fn revoke(self) -> Result<()> {
        self.bearer.revoke().await
    }

    /// Revoke the refresh token, ending the whole grant.
    #[instrument(skip_all)]
    pub async fn revoke_refresh_token(self) -> Result<()> {
        self.bearer
            .app
            .revoke_token(self.grant.refresh_token())
            .await
    }
}

/// Universe ids arrive as strings, occasionally as numbers.
fn parse_id(raw: &Value) -> Result<u64> {
    let parsed = match raw {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Decode(format!("'{raw}' is not a universe id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> OAuth2App {
        OAuth2App::new(1234, "shh", "https://example.com/callback").unwrap()
    }

    fn query_of(uri: &str) -> Vec<(String, String)> {
        Url::parse(uri)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_generate_uri() {
        let uri = app()
            .generate_uri(&["openid", "profile"], Some("xyz"), true)
            .unwrap();

        assert!(uri.starts_with("https://apis.roblox.com/oauth/v1/authorize?"));
        let query = query_of(&uri);
        assert_eq!(
            query,
            vec![
                ("client_id".to_string(), "1234".to_string()),
                ("scope".to_string(), "openid profile".to_string()),
                ("state".to_string(), "xyz".to_string()),
                (
                    "redirect_uri".to_string(),
                    "https://example.com/callback".to_string()
                ),
                ("response_type".to_string(), "code".to_string()),
            ]
        );
    }

    #[test]
    fn test_generate_uri_omits_missing_state() {
        let uri = app().generate_uri(&["openid"], None, false).unwrap();
        let query = query_of(&uri);

        assert!(query.iter().all(|(k, _)| k != "state"));
        assert!(query.contains(&("response_type".to_string(), "none".to_string())));
    }

    #[test]
    fn test_access_token_from_response() {
        let before = Utc::now();
        let token = AccessToken::from_response(
            app(),
            TokenResponse {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                scope: "openid profile".to_string(),
                expires_in: 3600,
            },
        )
        .unwrap();

        assert_eq!(token.token(), "at");
        assert_eq!(token.refresh_token(), "rt");
        assert_eq!(token.scopes(), &["openid".to_string(), "profile".to_string()]);
        assert!(token.expires_at() >= before + Duration::seconds(3600));
        assert!(token.expires_at() <= Utc::now() + Duration::seconds(3600));
        assert!(!token.is_expired());
    }

    #[test]
    fn test_access_token_rejects_unrepresentable_lifetime() {
        for expires_in in [i64::MAX, i64::MIN] {
            let result = AccessToken::from_response(
                app(),
                TokenResponse {
                    access_token: "at".to_string(),
                    refresh_token: "rt".to_string(),
                    scope: String::new(),
                    expires_in,
                },
            );
            assert!(matches!(result, Err(Error::Decode(ref msg)) if msg.contains("out of range")));
        }
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(&json!("4242")).unwrap(), 4242);
        assert_eq!(parse_id(&json!(7)).unwrap(), 7);
        assert!(parse_id(&json!("U")).is_err());
    }

    #[test]
    fn test_secrets_not_in_debug_output() {
        let token = app().token_from_string("very-secret-token");
        let printed = format!("{token:?}");
        assert!(!printed.contains("very-secret-token"));
        assert!(!printed.contains("shh"));
    }
}
