//! Graph-crawl traversal. Each round queries the current frontier for linked
//! resources and feeds only the genuinely new URIs into the next frontier, so
//! discovery terminates on any finite graph even when sources link in cycles.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::capability::{GraphQueryEngine, QuerySpec, Session, SharedAuth};
use crate::error::DiscoveryError;
use crate::model::{ActorProfile, ActorRegistry, DiscoveredResources};

/// Default traversal query: every `rdfs:seeAlso` object of any subject found
/// in the current frontier's sources.
pub const DEFAULT_INDEX_QUERY: &str = "\
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>

SELECT ?dataResource
WHERE {
  ?s rdfs:seeAlso ?dataResource .
}
";

#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    /// Hops beyond the seed; 0 runs to fixpoint.
    pub max_depth: u32,
    /// Actors crawled in parallel.
    pub actor_concurrency: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            actor_concurrency: 4,
        }
    }
}

pub struct Crawler {
    engine: Arc<dyn GraphQueryEngine>,
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(engine: Arc<dyn GraphQueryEngine>, options: CrawlOptions) -> Self {
        Self { engine, options }
    }

    /// Discovers the resource set reachable from one actor's index. A query
    /// failure aborts discovery for this actor only; a round with zero
    /// results is ordinary termination.
    pub async fn discover(
        &self,
        actor: &ActorProfile,
        auth: &SharedAuth,
    ) -> Result<DiscoveredResources, DiscoveryError> {
        let query = actor.index_query.as_deref().unwrap_or(DEFAULT_INDEX_QUERY);
        let mut discovered = DiscoveredResources::from_seed(&actor.index);
        let mut frontier = vec![actor.index.clone()];
        let mut hops_left = self.options.max_depth;
        let mut rounds = 0u32;

        loop {
            let spec = QuerySpec {
                sources: &frontier,
                auth: Some(auth),
                lenient: true,
            };
            let terms = self
                .engine
                .query_terms(query, spec)
                .await
                .map_err(|source| DiscoveryError::Query {
                    web_id: actor.web_id.clone(),
                    source,
                })?;
            rounds += 1;

            // Already-discovered URIs never re-enter the frontier.
            let mut newly_found = Vec::new();
            for term in terms {
                if discovered.insert(term.clone()) {
                    newly_found.push(term);
                }
            }
            debug!(
                web_id = %actor.web_id,
                round = rounds,
                found = newly_found.len(),
                "discovery round"
            );

            if newly_found.is_empty() {
                break;
            }
            if self.options.max_depth > 0 {
                hops_left -= 1;
                if hops_left == 0 {
                    break;
                }
            }
            frontier = newly_found;
        }

        info!(
            web_id = %actor.web_id,
            resources = discovered.len(),
            rounds,
            "discovery finished"
        );
        Ok(discovered)
    }

    /// Crawls every actor with an established session, in parallel with
    /// bounded concurrency. One actor's failure never blocks the others.
    pub async fn discover_all(
        &self,
        registry: &ActorRegistry,
        sessions: &BTreeMap<String, Session>,
    ) -> (BTreeMap<String, DiscoveredResources>, Vec<DiscoveryError>) {
        let jobs = registry
            .values()
            .filter_map(|actor| sessions.get(&actor.web_id).map(|s| (actor, s.auth.clone())));

        let results: Vec<(String, Result<DiscoveredResources, DiscoveryError>)> =
            stream::iter(jobs.map(|(actor, auth)| async move {
                (actor.web_id.clone(), self.discover(actor, &auth).await)
            }))
            .buffer_unordered(self.options.actor_concurrency)
            .collect()
            .await;

        let mut sets = BTreeMap::new();
        let mut failures = Vec::new();
        for (web_id, result) in results {
            match result {
                Ok(set) => {
                    sets.insert(web_id, set);
                }
                Err(e) => {
                    warn!(err = %e, "discovery failed");
                    failures.push(e);
                }
            }
        }
        (sets, failures)
    }
}
