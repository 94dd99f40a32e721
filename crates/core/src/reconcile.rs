//! Two-snapshot diff and repair. Every resource in an actor's new set gets a
//! signed representation written in place; every owned resource that
//! disappeared between the passes gets deleted. Ownership is the sole
//! authorization boundary: a resource merely discovered via traversal is
//! never written or deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capability::{AuthCapability, CredentialIssuer, HttpRequest, SharedAuth};
use crate::error::{DeleteError, FetchError, IssueError, PutError};
use crate::model::{
    ActorProfile, DiscoveredResources, Operation, Outcome, OutcomeKind, RunSummary, Snapshot,
    VerificationSummary,
};
use crate::ownership::OwnershipClassifier;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Actors reconciled in parallel.
    pub actor_concurrency: usize,
    /// Resources processed in parallel within one actor. Each URI appears in
    /// exactly one of the add/delete groups, so no resource is touched twice.
    pub resource_concurrency: usize,
    /// When false, the add sub-pass is skipped entirely; obsolete resources
    /// are still deleted.
    pub write_resources: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            actor_concurrency: 4,
            resource_concurrency: 4,
            write_resources: true,
        }
    }
}

#[derive(Debug, Error)]
enum ResourceOpError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Issue(#[from] IssueError),
    #[error(transparent)]
    Put(#[from] PutError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Passed,
    Failed,
    Invalid,
    ExecutionError,
}

/// One actor's unit of reconciliation work: the actor plus its phase-1 and
/// phase-2 discovery sets.
#[derive(Debug, Clone)]
pub struct ActorPlan {
    pub actor: ActorProfile,
    pub original: DiscoveredResources,
    pub new: DiscoveredResources,
}

pub struct Reconciler {
    classifier: Arc<OwnershipClassifier>,
    issuer: Arc<dyn CredentialIssuer>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        classifier: Arc<OwnershipClassifier>,
        issuer: Arc<dyn CredentialIssuer>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            classifier,
            issuer,
            options,
        }
    }

    /// Selects the actors eligible for reconciliation: those the caller can
    /// authenticate for and that have a phase-2 discovery result. Actors
    /// whose re-discovery failed are excluded outright: without a
    /// trustworthy new set, their diff would read as "everything
    /// disappeared". The single selection policy for both [`Self::reconcile`]
    /// and callers driving [`Self::reconcile_actor`] themselves.
    pub fn plan(snapshot: &Snapshot, authorized: impl Fn(&str) -> bool) -> Vec<ActorPlan> {
        let Some(new_sets) = snapshot.new_data_sources.as_ref() else {
            warn!("snapshot has no newDataSources; nothing to reconcile");
            return Vec::new();
        };

        let mut plans = Vec::new();
        for actor in snapshot.actors.values() {
            if !authorized(&actor.web_id) {
                warn!(web_id = %actor.web_id, "no auth capability; actor skipped");
                continue;
            }
            let Some(new) = new_sets.get(&actor.web_id) else {
                warn!(web_id = %actor.web_id, "no phase-2 discovery result; actor skipped");
                continue;
            };
            let original = snapshot
                .original_data_sources
                .get(&actor.web_id)
                .cloned()
                .unwrap_or_default();
            plans.push(ActorPlan {
                actor: actor.clone(),
                original,
                new: new.clone(),
            });
        }
        plans
    }

    /// Reconciles every actor [`Self::plan`] selects.
    pub async fn reconcile(
        &self,
        snapshot: &Snapshot,
        auth: &BTreeMap<String, SharedAuth>,
    ) -> Vec<Outcome> {
        let plans = Self::plan(snapshot, |web_id| auth.contains_key(web_id));

        let per_actor: Vec<Vec<Outcome>> = stream::iter(plans.iter().filter_map(|plan| {
            let auth = auth.get(&plan.actor.web_id)?.clone();
            Some(async move {
                self.reconcile_actor(&plan.actor, &auth, &plan.original, &plan.new)
                    .await
            })
        }))
        .buffer_unordered(self.options.actor_concurrency)
        .collect()
        .await;

        per_actor.into_iter().flatten().collect()
    }

    /// Runs the full add/delete pass for one actor. All of the actor's
    /// resources complete, success or failure, before the outcomes are
    /// returned.
    pub async fn reconcile_actor(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
        original: &DiscoveredResources,
        new: &DiscoveredResources,
    ) -> Vec<Outcome> {
        let mut tasks: Vec<(Operation, String)> = Vec::new();
        if self.options.write_resources {
            tasks.extend(new.iter().map(|r| (Operation::Add, r.to_string())));
        }
        for resource in original.iter() {
            if !new.contains(resource) {
                tasks.push((Operation::Delete, resource.to_string()));
            }
        }

        let outcomes: Vec<Outcome> = stream::iter(tasks.into_iter().map(|(op, resource)| {
            async move {
                match op {
                    Operation::Add => self.add_one(actor, auth, resource).await,
                    Operation::Delete => self.delete_one(actor, auth, resource).await,
                }
            }
        }))
        .buffer_unordered(self.options.resource_concurrency)
        .collect()
        .await;

        info!(web_id = %actor.web_id, "{}", RunSummary::tally(&outcomes));
        outcomes
    }

    async fn add_one(&self, actor: &ActorProfile, auth: &SharedAuth, resource: String) -> Outcome {
        if !self.classifier.is_owned_by(&resource, &actor.web_id).await {
            return Outcome::skipped(&actor.web_id, resource, Operation::Add);
        }
        match self.add_owned(actor, auth, &resource).await {
            Ok(kind) => Outcome::ok(&actor.web_id, resource, Operation::Add, kind),
            Err(e) => {
                warn!(web_id = %actor.web_id, resource = %resource, err = %e, "add failed");
                Outcome::failed(&actor.web_id, resource, Operation::Add, e)
            }
        }
    }

    async fn add_owned(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
        resource: &str,
    ) -> Result<OutcomeKind, ResourceOpError> {
        let (content_type, body) = fetch_resource(auth.as_ref(), resource).await?;
        let signed = self.issuer.issue(actor, &content_type, &body).await?;
        if signed.body == body {
            debug!(web_id = %actor.web_id, resource = %resource, "already signed; unchanged");
            return Ok(OutcomeKind::Unchanged);
        }
        put_resource(auth.as_ref(), resource, &signed.content_type, signed.body).await?;
        info!(web_id = %actor.web_id, resource = %resource, "signed representation written");
        Ok(OutcomeKind::Added)
    }

    async fn delete_one(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
        resource: String,
    ) -> Outcome {
        if !self.classifier.is_owned_by(&resource, &actor.web_id).await {
            return Outcome::skipped(&actor.web_id, resource, Operation::Delete);
        }
        match delete_resource(auth.as_ref(), &resource).await {
            Ok(()) => {
                info!(web_id = %actor.web_id, resource = %resource, "obsolete resource deleted");
                Outcome::ok(&actor.web_id, resource, Operation::Delete, OutcomeKind::Deleted)
            }
            Err(e) => {
                warn!(web_id = %actor.web_id, resource = %resource, err = %e, "delete failed");
                Outcome::failed(&actor.web_id, resource, Operation::Delete, e)
            }
        }
    }

    /// Observational verification sub-pass over every owned resource of every
    /// actor's new set. Never mutates state.
    pub async fn verify(
        &self,
        snapshot: &Snapshot,
        auth: &BTreeMap<String, SharedAuth>,
    ) -> VerificationSummary {
        let Some(new_sets) = snapshot.new_data_sources.as_ref() else {
            return VerificationSummary::default();
        };

        let mut summary = VerificationSummary::default();
        for actor in snapshot.actors.values() {
            let (Some(auth), Some(set)) = (auth.get(&actor.web_id), new_sets.get(&actor.web_id))
            else {
                continue;
            };
            summary.merge(self.verify_actor(actor, auth, set).await);
        }
        summary
    }

    pub async fn verify_actor(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
        resources: &DiscoveredResources,
    ) -> VerificationSummary {
        let verdicts: Vec<Option<Verdict>> =
            stream::iter(resources.iter().map(|resource| {
                let resource = resource.to_string();
                async move { self.verify_one(actor, auth, &resource).await }
            }))
            .buffer_unordered(self.options.resource_concurrency)
            .collect()
            .await;

        let mut summary = VerificationSummary::default();
        for verdict in verdicts.into_iter().flatten() {
            match verdict {
                Verdict::Passed => summary.passed += 1,
                Verdict::Failed => summary.failed += 1,
                Verdict::Invalid => summary.invalid += 1,
                Verdict::ExecutionError => summary.errors += 1,
            }
        }
        info!(web_id = %actor.web_id, "verification: {summary}");
        summary
    }

    async fn verify_one(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
        resource: &str,
    ) -> Option<Verdict> {
        if !self.classifier.is_owned_by(resource, &actor.web_id).await {
            return None;
        }
        let body = match fetch_resource(auth.as_ref(), resource).await {
            Ok((_, body)) => body,
            Err(e) => {
                warn!(web_id = %actor.web_id, resource = %resource, err = %e, "verification fetch failed");
                return Some(Verdict::ExecutionError);
            }
        };
        match self.issuer.verify(&body).await {
            Ok(report) if report.valid && report.verified => Some(Verdict::Passed),
            Ok(report) if report.valid => Some(Verdict::Failed),
            Ok(_) => Some(Verdict::Invalid),
            Err(e) => {
                warn!(web_id = %actor.web_id, resource = %resource, err = %e, "verification errored");
                Some(Verdict::ExecutionError)
            }
        }
    }
}

async fn fetch_resource(
    auth: &dyn AuthCapability,
    url: &str,
) -> Result<(String, String), FetchError> {
    let response = auth
        .request(HttpRequest::get(url))
        .await
        .map_err(|e| FetchError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.is_success() {
        return Err(FetchError {
            url: url.to_string(),
            reason: format!("status {}", response.status),
        });
    }
    let content_type = response
        .content_type
        .unwrap_or_else(|| "text/turtle".to_string());
    Ok((content_type, response.body))
}

async fn put_resource(
    auth: &dyn AuthCapability,
    url: &str,
    content_type: &str,
    body: String,
) -> Result<(), PutError> {
    let response = auth
        .request(HttpRequest::put(url, content_type, body))
        .await
        .map_err(|e| PutError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.is_success() {
        return Err(PutError {
            url: url.to_string(),
            reason: format!("status {}", response.status),
        });
    }
    Ok(())
}

async fn delete_resource(auth: &dyn AuthCapability, url: &str) -> Result<(), DeleteError> {
    let response = auth
        .request(HttpRequest::delete(url))
        .await
        .map_err(|e| DeleteError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.is_success() {
        return Err(DeleteError {
            url: url.to_string(),
            reason: format!("status {}", response.status),
        });
    }
    Ok(())
}
