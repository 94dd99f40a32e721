//! podsyncctl: discover linked-data resources across configured pods, then
//! reconcile their signed representations against a later re-discovery pass.
//!
//! Two subcommands mirror the two phases. `discover` writes the snapshot that
//! `reconcile` consumes; the snapshot file is the only state crossing the
//! process boundary. Per-actor and per-resource failures are reported, never
//! fatal; the exit code is non-zero only when input cannot be read or output
//! cannot be written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use podsync_core::capability::{CredentialProvider, ProfilePreparer, Session};
use podsync_core::config;
use podsync_core::crawler::{CrawlOptions, Crawler};
use podsync_core::error::DiscoveryError;
use podsync_core::model::{
    ActorProfile, ActorRegistry, Outcome, RunSummary, Snapshot, VerificationSummary,
};
use podsync_core::ownership::OwnershipClassifier;
use podsync_core::reconcile::{ReconcileOptions, Reconciler};
use podsync_core::snapshot::SnapshotStore;

mod http;

#[derive(Debug, Parser)]
#[command(
    name = "podsyncctl",
    version,
    about = "Discover pod resources and reconcile their signed representations"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Phase 1: crawl every actor's index and save the discovered sets.
    Discover {
        /// Actor configuration (YAML).
        #[arg(long)]
        config: PathBuf,
        /// Snapshot file to write.
        #[arg(long)]
        snapshot: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Phase 2: re-crawl, then add/delete signed representations per the diff.
    Reconcile {
        /// Snapshot file written by `discover`; updated in place.
        #[arg(long)]
        snapshot: PathBuf,
        /// Do not write signed resources (obsolete resources are still deleted).
        #[arg(long)]
        no_write: bool,
        /// Verify signed representations afterwards and report counts.
        #[arg(long)]
        verify: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Traversal hops beyond the seed; 0 runs to fixpoint.
    #[arg(long, default_value_t = 1)]
    max_depth: u32,

    /// Actors processed in parallel.
    #[arg(long, default_value_t = 4)]
    actor_concurrency: usize,

    /// Resources processed in parallel within one actor.
    #[arg(long, default_value_t = 4)]
    resource_concurrency: usize,

    /// Base URL of the graph query service.
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    query_service: String,

    /// Base URL of the credential (VC) service.
    #[arg(long, default_value = "http://127.0.0.1:3002")]
    vc_service: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

struct Services {
    provider: Arc<http::OidcCredentialProvider>,
    engine: Arc<http::QueryServiceEngine>,
    vc: Arc<http::VcService>,
}

fn build_services(common: &CommonArgs) -> anyhow::Result<Services> {
    let client = http::client(common.timeout_secs).context("building HTTP client")?;
    Ok(Services {
        provider: Arc::new(http::OidcCredentialProvider::new(client.clone())),
        engine: Arc::new(http::QueryServiceEngine::new(
            client.clone(),
            common.query_service.clone(),
        )),
        vc: Arc::new(http::VcService::new(client, common.vc_service.clone())),
    })
}

fn crawl_options(common: &CommonArgs) -> CrawlOptions {
    CrawlOptions {
        max_depth: common.max_depth,
        actor_concurrency: common.actor_concurrency,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Discover {
            config,
            snapshot,
            common,
        } => discover(config, snapshot, common).await,
        Cmd::Reconcile {
            snapshot,
            no_write,
            verify,
            common,
        } => reconcile(snapshot, no_write, verify, common).await,
    }
}

async fn discover(
    config_path: PathBuf,
    snapshot_path: PathBuf,
    common: CommonArgs,
) -> anyhow::Result<()> {
    let registry = config::load_registry(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(actors = registry.len(), "configuration loaded");

    let services = build_services(&common)?;
    let sessions = authenticate_all(services.provider.as_ref(), &registry, &common).await;

    let crawler = Crawler::new(services.engine.clone(), crawl_options(&common));
    let (sets, failures) = crawler.discover_all(&registry, &sessions).await;
    for failure in &failures {
        warn!(web_id = %failure.web_id(), err = %failure, "actor excluded from snapshot");
    }

    let snapshot = Snapshot {
        actors: registry.clone(),
        original_data_sources: sets,
        new_data_sources: None,
    };
    SnapshotStore::save(&snapshot, &snapshot_path).context("writing snapshot")?;

    release_all(services.provider.as_ref(), &registry, sessions).await;
    info!(path = %snapshot_path.display(), "discovery phase finished");
    Ok(())
}

async fn reconcile(
    snapshot_path: PathBuf,
    no_write: bool,
    verify: bool,
    common: CommonArgs,
) -> anyhow::Result<()> {
    let mut snapshot = SnapshotStore::load(&snapshot_path)
        .with_context(|| format!("loading {}", snapshot_path.display()))?;
    let registry = snapshot.actors.clone();
    info!(actors = registry.len(), "snapshot loaded");

    let services = build_services(&common)?;
    let sessions = authenticate_all(services.provider.as_ref(), &registry, &common).await;

    let crawler = Crawler::new(services.engine.clone(), crawl_options(&common));
    let (new_sets, failures) = crawler.discover_all(&registry, &sessions).await;
    for failure in &failures {
        warn!(web_id = %failure.web_id(), err = %failure, "actor excluded from reconciliation");
    }
    snapshot.new_data_sources = Some(new_sets);

    // Persisted before reconciliation so a crash cannot lose the discovery result.
    SnapshotStore::save(&snapshot, &snapshot_path).context("writing snapshot")?;

    let classifier = Arc::new(OwnershipClassifier::new(services.engine.clone()));
    let write_options = ReconcileOptions {
        actor_concurrency: common.actor_concurrency,
        resource_concurrency: common.resource_concurrency,
        write_resources: !no_write,
    };
    let reconciler = Reconciler::new(classifier.clone(), services.vc.clone(), write_options);
    // Used for actors whose pod could not be prepared for signing.
    let delete_only = Reconciler::new(
        classifier,
        services.vc.clone(),
        ReconcileOptions {
            write_resources: false,
            ..write_options
        },
    );
    if no_write {
        info!("not writing signed resources, on request");
    }

    let mut leftover_sessions = sessions.clone();
    let mut jobs = Vec::new();
    for plan in Reconciler::plan(&snapshot, |web_id| sessions.contains_key(web_id)) {
        let Some(session) = sessions.get(&plan.actor.web_id) else {
            continue;
        };
        leftover_sessions.remove(&plan.actor.web_id);
        jobs.push((plan, session.clone()));
    }

    let provider = services.provider.clone();
    let preparer: Arc<http::VcService> = services.vc.clone();
    let reconciler = &reconciler;
    let delete_only = &delete_only;

    let results: Vec<(Vec<Outcome>, VerificationSummary)> =
        stream::iter(jobs.into_iter().map(|(plan, session)| {
            let provider = provider.clone();
            let preparer = preparer.clone();
            async move {
                let actor = &plan.actor;
                let worker = if no_write {
                    delete_only
                } else {
                    match preparer.ensure_ready(actor, &session.auth).await {
                        Ok(()) => reconciler,
                        Err(e) => {
                            warn!(web_id = %actor.web_id, err = %e, "pod not prepared; writes disabled for actor");
                            delete_only
                        }
                    }
                };
                let outcomes = worker
                    .reconcile_actor(actor, &session.auth, &plan.original, &plan.new)
                    .await;
                let verification = if verify {
                    worker.verify_actor(actor, &session.auth, &plan.new).await
                } else {
                    VerificationSummary::default()
                };
                // Credentials released as soon as this actor is done.
                release_session(provider.as_ref(), actor, &session).await;
                (outcomes, verification)
            }
        }))
        .buffer_unordered(common.actor_concurrency)
        .collect()
        .await;

    let mut outcomes = Vec::new();
    let mut verification = VerificationSummary::default();
    for (actor_outcomes, actor_verification) in results {
        outcomes.extend(actor_outcomes);
        verification.merge(actor_verification);
    }
    info!("run summary: {}", RunSummary::tally(&outcomes));
    if verify {
        info!("verification summary: {verification}");
    }

    // Actors that never reached reconciliation still hold live tokens.
    release_all(services.provider.as_ref(), &registry, leftover_sessions).await;

    SnapshotStore::save(&snapshot, &snapshot_path).context("writing snapshot")?;
    info!(path = %snapshot_path.display(), "reconcile phase finished");
    Ok(())
}

async fn authenticate_all(
    provider: &dyn CredentialProvider,
    registry: &ActorRegistry,
    common: &CommonArgs,
) -> BTreeMap<String, Session> {
    let results: Vec<(String, Result<Session, DiscoveryError>)> =
        stream::iter(registry.values().map(|actor| async move {
            let result =
                provider
                    .authenticate(actor)
                    .await
                    .map_err(|source| DiscoveryError::Auth {
                        web_id: actor.web_id.clone(),
                        source,
                    });
            (actor.web_id.clone(), result)
        }))
        .buffer_unordered(common.actor_concurrency)
        .collect()
        .await;

    let mut sessions = BTreeMap::new();
    for (web_id, result) in results {
        match result {
            Ok(session) => {
                sessions.insert(web_id, session);
            }
            Err(e) => warn!(web_id = %e.web_id(), err = %e, "authentication failed; actor skipped"),
        }
    }
    sessions
}

async fn release_session(provider: &dyn CredentialProvider, actor: &ActorProfile, session: &Session) {
    if let Err(e) = provider.release(actor, session).await {
        warn!(web_id = %actor.web_id, err = %e, "token release failed");
    }
}

async fn release_all(
    provider: &dyn CredentialProvider,
    registry: &ActorRegistry,
    sessions: BTreeMap<String, Session>,
) {
    for (web_id, session) in sessions {
        let Some(actor) = registry.get(&web_id) else {
            continue;
        };
        release_session(provider, actor, &session).await;
    }
}
