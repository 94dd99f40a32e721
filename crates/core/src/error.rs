//! Error taxonomy. Configuration and snapshot errors abort the run; every
//! other kind is fatal only to the actor or resource that raised it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config entry {entry} is missing field {field}")]
    MissingField { entry: String, field: &'static str },
    #[error("duplicate webId in config: {0}")]
    DuplicateActor(String),
    #[error("no cssclientcredentials entries in config")]
    NoActors,
}

/// Transport-level failure of an authenticated request. Timeouts surface
/// here like any other failure.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);

#[derive(Debug, Error)]
#[error("query failed: {0}")]
pub struct QueryError(pub String);

/// Discovery failure attributed to one actor. Sibling actors are unaffected.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery aborted for {web_id}: {source}")]
    Auth {
        web_id: String,
        #[source]
        source: AuthError,
    },
    #[error("discovery aborted for {web_id}: {source}")]
    Query {
        web_id: String,
        #[source]
        source: QueryError,
    },
}

impl DiscoveryError {
    pub fn web_id(&self) -> &str {
        match self {
            DiscoveryError::Auth { web_id, .. } | DiscoveryError::Query { web_id, .. } => web_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot access snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode snapshot: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
#[error("GET {url} failed: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("PUT {url} failed: {reason}")]
pub struct PutError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("DELETE {url} failed: {reason}")]
pub struct DeleteError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("issuing signed representation failed: {0}")]
pub struct IssueError(pub String);

#[derive(Debug, Error)]
#[error("verification call failed: {0}")]
pub struct VerifyError(pub String);

#[derive(Debug, Error)]
#[error("pod setup failed for {web_id}: {reason}")]
pub struct PodSetupError {
    pub web_id: String,
    pub reason: String,
}
