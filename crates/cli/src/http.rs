//! HTTP-backed implementations of the core capability traits: a bearer-token
//! request capability, an OIDC client-credentials provider, a remote graph
//! query service and a remote credential (VC) service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use podsync_core::capability::{
    AuthCapability, CredentialIssuer, CredentialProvider, GraphQueryEngine, HttpRequest,
    HttpResponse, Method, ProfilePreparer, QuerySpec, Session, SharedAuth, SignedDocument,
    VerifyReport,
};
use podsync_core::error::{
    AuthError, IssueError, PodSetupError, QueryError, TransportError, VerifyError,
};
use podsync_core::model::ActorProfile;

/// Accept preference for fetching query sources, biased toward RDF
/// serializations the query service can parse.
const RDF_ACCEPT: &str = "application/n-quads,application/trig;q=0.9,text/turtle;q=0.8,\
                          application/n-triples;q=0.7,*/*;q=0.1";

/// Profile cards advertising this predicate already carry a VC keypair.
const ASSERTION_METHOD_MARKER: &str = "https://w3id.org/security#assertionMethod";

pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(Into::into)
}

/// Authenticated request capability carrying a bearer token.
pub struct BearerAuth {
    client: reqwest::Client,
    token: String,
}

#[async_trait]
impl AuthCapability for BearerAuth {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Put => self.client.put(&req.url),
            Method::Delete => self.client.delete(&req.url),
        };
        builder = builder.bearer_auth(&self.token);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Client-credentials provider against each actor's OIDC issuer. Registers a
/// short-lived credential, exchanges it for an access token, and deletes the
/// credential resource on release so the exposure window stays small.
pub struct OidcCredentialProvider {
    client: reqwest::Client,
}

impl OidcCredentialProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialGrant {
    id: String,
    secret: String,
    resource: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
}

#[async_trait]
impl CredentialProvider for OidcCredentialProvider {
    async fn authenticate(&self, actor: &ActorProfile) -> Result<Session, AuthError> {
        let base = actor.oidc_issuer.trim_end_matches('/');
        let auth_err = |e: reqwest::Error| AuthError(e.to_string());

        let grant: CredentialGrant = self
            .client
            .post(format!("{base}/idp/credentials/"))
            .json(&serde_json::json!({
                "email": actor.email,
                "password": actor.password,
                "name": "podsync",
            }))
            .send()
            .await
            .map_err(auth_err)?
            .error_for_status()
            .map_err(auth_err)?
            .json()
            .await
            .map_err(auth_err)?;

        let token: TokenGrant = self
            .client
            .post(format!("{base}/.oidc/token"))
            .basic_auth(&grant.id, Some(&grant.secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "webid")])
            .send()
            .await
            .map_err(auth_err)?
            .error_for_status()
            .map_err(auth_err)?
            .json()
            .await
            .map_err(auth_err)?;

        debug!(web_id = %actor.web_id, "access token obtained");
        let auth: SharedAuth = Arc::new(BearerAuth {
            client: self.client.clone(),
            token: token.access_token,
        });
        Ok(Session {
            auth,
            token_resource: grant.resource,
        })
    }

    async fn release(&self, actor: &ActorProfile, session: &Session) -> Result<(), AuthError> {
        let Some(resource) = session.token_resource.as_deref() else {
            return Ok(());
        };
        let base = actor.oidc_issuer.trim_end_matches('/');
        let auth_err = |e: reqwest::Error| AuthError(e.to_string());

        self.client
            .post(format!("{base}/idp/credentials/"))
            .json(&serde_json::json!({
                "email": actor.email,
                "password": actor.password,
                "delete": resource,
            }))
            .send()
            .await
            .map_err(auth_err)?
            .error_for_status()
            .map_err(auth_err)?;
        debug!(web_id = %actor.web_id, "token resource deleted");
        Ok(())
    }
}

/// Remote graph-query capability. The service executes the query against the
/// given sources and answers in the SPARQL JSON results format.
pub struct QueryServiceEngine {
    client: reqwest::Client,
    base: String,
}

impl QueryServiceEngine {
    pub fn new(client: reqwest::Client, base: String) -> Self {
        Self { client, base }
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    sources: &'a [String],
    lenient: bool,
    accept: &'a str,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    results: SparqlBindings,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    bindings: Vec<std::collections::BTreeMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

#[async_trait]
impl GraphQueryEngine for QueryServiceEngine {
    async fn query_terms(
        &self,
        query: &str,
        spec: QuerySpec<'_>,
    ) -> Result<Vec<String>, QueryError> {
        let url = format!("{}/query", self.base.trim_end_matches('/'));
        let query_err = |e: reqwest::Error| QueryError(e.to_string());

        let mut builder = self.client.post(url).json(&QueryRequest {
            query,
            sources: spec.sources,
            lenient: spec.lenient,
            accept: RDF_ACCEPT,
        });
        if let Some(token) = spec.auth.and_then(|auth| auth.bearer_token()) {
            builder = builder.bearer_auth(token);
        }

        let results: SparqlResults = builder
            .send()
            .await
            .map_err(query_err)?
            .error_for_status()
            .map_err(query_err)?
            .json()
            .await
            .map_err(query_err)?;

        // Flatten to term values; variable names are irrelevant here.
        Ok(results
            .results
            .bindings
            .into_iter()
            .flat_map(|binding| binding.into_values().map(|term| term.value))
            .collect())
    }
}

/// Remote credential service exposing `/setup`, `/issue` and `/verify`.
pub struct VcService {
    client: reqwest::Client,
    base: String,
}

impl VcService {
    pub fn new(client: reqwest::Client, base: String) -> Self {
        Self { client, base }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueRequest<'a> {
    web_id: &'a str,
    email: &'a str,
    password: &'a str,
    css: &'a str,
    content_type: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueResponse {
    content_type: String,
    credential: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
    verified: bool,
}

#[async_trait]
impl CredentialIssuer for VcService {
    async fn issue(
        &self,
        actor: &ActorProfile,
        content_type: &str,
        body: &str,
    ) -> Result<SignedDocument, IssueError> {
        let issue_err = |e: reqwest::Error| IssueError(e.to_string());

        let response: IssueResponse = self
            .client
            .post(self.endpoint("issue"))
            .json(&IssueRequest {
                web_id: &actor.web_id,
                email: &actor.email,
                password: &actor.password,
                css: &actor.oidc_issuer,
                content_type,
                content: body,
            })
            .send()
            .await
            .map_err(issue_err)?
            .error_for_status()
            .map_err(issue_err)?
            .json()
            .await
            .map_err(issue_err)?;

        Ok(SignedDocument {
            content_type: response.content_type,
            body: response.credential,
        })
    }

    async fn verify(&self, body: &str) -> Result<VerifyReport, VerifyError> {
        let verify_err = |e: reqwest::Error| VerifyError(e.to_string());

        let response: VerifyResponse = self
            .client
            .post(self.endpoint("verify"))
            .json(&serde_json::json!({ "credential": body }))
            .send()
            .await
            .map_err(verify_err)?
            .error_for_status()
            .map_err(verify_err)?
            .json()
            .await
            .map_err(verify_err)?;

        Ok(VerifyReport {
            valid: response.valid,
            verified: response.verified,
        })
    }
}

#[async_trait]
impl ProfilePreparer for VcService {
    async fn ensure_ready(
        &self,
        actor: &ActorProfile,
        _auth: &SharedAuth,
    ) -> Result<(), PodSetupError> {
        let setup_err = |reason: String| PodSetupError {
            web_id: actor.web_id.clone(),
            reason,
        };

        // The profile card is a public document.
        let card = self
            .client
            .get(&actor.web_id)
            .send()
            .await
            .map_err(|e| setup_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| setup_err(e.to_string()))?
            .text()
            .await
            .map_err(|e| setup_err(e.to_string()))?;
        if card.contains(ASSERTION_METHOD_MARKER) {
            debug!(web_id = %actor.web_id, "pod already prepared");
            return Ok(());
        }

        let result = self
            .client
            .post(self.endpoint("setup"))
            .json(&serde_json::json!({
                "email": actor.email,
                "password": actor.password,
                "css": actor.oidc_issuer,
                "webId": actor.web_id,
            }))
            .send()
            .await
            .map_err(|e| setup_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| setup_err(e.to_string()))?
            .text()
            .await
            .map_err(|e| setup_err(e.to_string()))?;
        if result.trim() != "true" {
            return Err(setup_err(format!("setup endpoint answered {result:?}")));
        }
        debug!(web_id = %actor.web_id, "VC keypair added");
        Ok(())
    }
}
