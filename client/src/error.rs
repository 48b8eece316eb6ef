use shared_types::EntryInfo;
use std::fmt;
use thiserror::Error;

/// Errors returned by every client operation
#[derive(Error, Debug)]
pub enum Error {
    /// The call was rejected locally, before any request was sent
    #[error("invalid usage: {0}")]
    Usage(#[from] UsageError),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("the access token does not have the required scope: '{scope}'")]
    InsufficientScope { scope: String },

    /// Either the store or the key does not exist; the service does not say which
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by the service")]
    RateLimited,

    #[error("service unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16 },

    #[error(transparent)]
    PreconditionFailed(Box<PreconditionFailed>),

    #[error("unexpected HTTP {status}")]
    Service { status: u16, body: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed(_))
    }

    /// The conflict details of a failed conditional write
    pub fn precondition(&self) -> Option<&PreconditionFailed> {
        match self {
            Self::PreconditionFailed(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<PreconditionFailed> for Error {
    fn from(conflict: PreconditionFailed) -> Self {
        Self::PreconditionFailed(Box::new(conflict))
    }
}

/// Caller mistakes detected before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("key '{key}' must be formatted as 'scope/key' for a store without a scope")]
    MissingScope { key: String },

    #[error("previous_version and exclusive_create can not both be set")]
    ConflictingPreconditions,

    #[error("this operation requires a store with a fixed scope")]
    ScopeRequired,

    #[error("version belongs to data store '{datastore}', not this one")]
    ForeignVersion { datastore: String },
}

/// Why a conditional write was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionReason {
    AlreadyExists,
    VersionMismatch { expected: String },
    Unspecified,
}

impl fmt::Display for PreconditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => {
                write!(f, "an entry already exists with the provided key and scope")
            }
            Self::VersionMismatch { expected } => {
                write!(f, "the current version is not '{expected}'")
            }
            Self::Unspecified => write!(f, "a precondition failed"),
        }
    }
}

/// A conditional write lost against the current state of the entry.
///
/// Carries what the entry holds now so a compare-and-swap loop can retry
/// without another read.
#[derive(Error, Debug, Clone)]
#[error("precondition failed: {reason}")]
pub struct PreconditionFailed {
    pub value: serde_json::Value,
    pub info: Option<EntryInfo>,
    pub reason: PreconditionReason,
}

pub type Result<T> = std::result::Result<T, Error>;
