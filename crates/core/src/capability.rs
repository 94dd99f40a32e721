//! Boundary capabilities the engine consumes. Token acquisition, query
//! execution and credential signing stay behind these traits; the HTTP-backed
//! implementations live in the CLI crate, test doubles in the test suites.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, IssueError, PodSetupError, QueryError, TransportError, VerifyError};
use crate::model::ActorProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn put(url: &str, content_type: &str, body: String) -> Self {
        Self {
            method: Method::Put,
            url: url.to_string(),
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: Some(body),
        }
    }

    pub fn delete(url: &str) -> Self {
        Self {
            method: Method::Delete,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An authenticated request primitive with baked-in credentials. A value,
/// not a closure, so it can cross task boundaries without capturing mutable
/// outer state.
#[async_trait]
pub trait AuthCapability: Send + Sync {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Bearer token for delegation to a remote capability that fetches
    /// sources on this actor's behalf. None when the capability cannot or
    /// will not delegate.
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

pub type SharedAuth = Arc<dyn AuthCapability>;

/// Authenticated capability plus the token resource backing it, so the
/// credential can be revoked as soon as the actor's work is done.
#[derive(Clone)]
pub struct Session {
    pub auth: SharedAuth,
    pub token_resource: Option<String>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authenticate(&self, actor: &ActorProfile) -> Result<Session, AuthError>;

    /// Revokes the credential material behind the session. Idempotent.
    async fn release(&self, actor: &ActorProfile, session: &Session) -> Result<(), AuthError>;
}

/// Context for one query execution.
pub struct QuerySpec<'a> {
    pub sources: &'a [String],
    pub auth: Option<&'a SharedAuth>,
    /// Skip unreachable sources instead of aborting the whole query.
    pub lenient: bool,
}

#[async_trait]
pub trait GraphQueryEngine: Send + Sync {
    /// Executes a query against the given sources and returns the flattened
    /// term values of all result bindings.
    async fn query_terms(&self, query: &str, spec: QuerySpec<'_>) -> Result<Vec<String>, QueryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub content_type: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Structurally valid.
    pub valid: bool,
    /// Cryptographically verified.
    pub verified: bool,
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(
        &self,
        actor: &ActorProfile,
        content_type: &str,
        body: &str,
    ) -> Result<SignedDocument, IssueError>;

    async fn verify(&self, body: &str) -> Result<VerifyReport, VerifyError>;
}

#[async_trait]
pub trait ProfilePreparer: Send + Sync {
    /// Prepares the actor's profile for signed-credential support. Idempotent.
    async fn ensure_ready(&self, actor: &ActorProfile, auth: &SharedAuth)
        -> Result<(), PodSetupError>;
}
