//! Maps HTTP status codes to the error taxonomy.
//!
//! The table is the same for every endpoint. The only variation is the
//! OAuth2 surface, where 400 means rejected credentials and 401 may name a
//! missing scope. Conditional writes look at 412 themselves before calling in here.

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

const INVALID_KEY: &str =
    "your key may have expired, or may not have permission to access this resource";
const INVALID_GRANT: &str = "the code, client id, client secret, or redirect uri is invalid";
const INVALID_TOKEN: &str = "the token, client id, or client secret is invalid";
const INSUFFICIENT_SCOPE: &str = "insufficient_scope";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Surface {
    Storage,
    /// The token endpoint, which is handed a code or refresh token
    Grant,
    /// Calls made with an already issued token
    OAuth,
}

impl Surface {
    fn is_oauth(self) -> bool {
        matches!(self, Self::Grant | Self::OAuth)
    }
}

/// A response that passed classification
#[derive(Debug)]
pub(crate) enum Outcome {
    Content(Response),
    NoContent,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Turn a non-success status into an error. `subject` names what a 404 was about.
pub(crate) fn classify(status: StatusCode, body: &str, surface: Surface, subject: &str) -> Error {
    match status.as_u16() {
        400 if surface == Surface::Grant => Error::InvalidCredential(INVALID_GRANT.to_string()),
        400 if surface == Surface::OAuth => Error::InvalidCredential(INVALID_TOKEN.to_string()),
        401 if surface.is_oauth() => {
            let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();
            match parsed {
                OAuthErrorBody {
                    error: Some(error),
                    scope: Some(scope),
                } if error == INSUFFICIENT_SCOPE => {
                    warn!(scope = %scope, "access token is missing a scope");
                    Error::InsufficientScope { scope }
                }
                _ => Error::InvalidCredential(INVALID_KEY.to_string()),
            }
        }
        401 | 403 => Error::InvalidCredential(INVALID_KEY.to_string()),
        404 => Error::NotFound(subject.to_string()),
        429 => Error::RateLimited,
        code if code >= 500 => Error::ServiceUnavailable { status: code },
        code => Error::Service {
            status: code,
            body: body.to_string(),
        },
    }
}

/// Classify a completed exchange: content, the 204 sentinel, or an error.
pub(crate) async fn check(response: Response, surface: Surface, subject: &str) -> Result<Outcome> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Outcome::NoContent);
    }
    if status.is_success() {
        return Ok(Outcome::Content(response));
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body, surface, subject))
}
