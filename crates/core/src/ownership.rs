//! Ownership classification: is a discovered resource inside an actor's own
//! storage space? A closed-world boolean, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::capability::{GraphQueryEngine, QuerySpec};

/// Storage-root query against the actor's profile document; `WEBID` is
/// substituted with the actor's webId.
const STORAGE_QUERY: &str = "\
PREFIX pim: <http://www.w3.org/ns/pim/space#>

SELECT ?pod
WHERE {
  <WEBID> pim:storage ?pod .
}
";

/// Conventional profile document path segment; truncating the webId at it
/// yields the implied storage root when no pim:storage triple exists.
const PROFILE_CARD_MARKER: &str = "profile/card";

pub struct OwnershipClassifier {
    engine: Arc<dyn GraphQueryEngine>,
    /// Storage roots memoized per actor for the duration of one run.
    roots: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl OwnershipClassifier {
    pub fn new(engine: Arc<dyn GraphQueryEngine>) -> Self {
        Self {
            engine,
            roots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_owned_by(&self, resource: &str, web_id: &str) -> bool {
        let roots = self.storage_roots(web_id).await;
        if roots.iter().any(|root| resource.starts_with(root.as_str())) {
            return true;
        }
        // Fallback only when no storage declaration was found at all.
        if roots.is_empty() {
            if let Some(pos) = web_id.rfind(PROFILE_CARD_MARKER) {
                return resource.starts_with(&web_id[..pos]);
            }
        }
        false
    }

    async fn storage_roots(&self, web_id: &str) -> Arc<Vec<String>> {
        if let Some(roots) = self.roots.lock().await.get(web_id) {
            return roots.clone();
        }

        // The lock is not held across the query; concurrent misses for the
        // same actor may query twice and cache the same answer.
        let query = STORAGE_QUERY.replace("WEBID", web_id);
        let sources = vec![web_id.to_string()];
        let spec = QuerySpec {
            sources: &sources,
            auth: None,
            lenient: false,
        };
        let roots = match self.engine.query_terms(&query, spec).await {
            Ok(roots) => roots,
            Err(e) => {
                warn!(
                    web_id = %web_id,
                    err = %e,
                    "storage root query failed; falling back to profile path prefix"
                );
                Vec::new()
            }
        };

        let mut cache = self.roots.lock().await;
        cache
            .entry(web_id.to_string())
            .or_insert_with(|| Arc::new(roots))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use crate::error::QueryError;

    struct CountingEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphQueryEngine for CountingEngine {
        async fn query_terms(
            &self,
            _query: &str,
            _spec: QuerySpec<'_>,
        ) -> Result<Vec<String>, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["https://alice.example/".to_string()])
        }
    }

    #[tokio::test]
    async fn storage_roots_are_memoized_per_actor() {
        let engine = Arc::new(CountingEngine {
            calls: AtomicUsize::new(0),
        });
        let classifier = OwnershipClassifier::new(engine.clone());
        let web_id = "https://alice.example/profile/card#me";

        assert!(classifier.is_owned_by("https://alice.example/data/x", web_id).await);
        assert!(!classifier.is_owned_by("https://bob.example/data/y", web_id).await);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    /// Answers only once both lookups are in flight. A cache lock held
    /// across the query would strand the second party and trip the timeout.
    struct RendezvousEngine {
        barrier: Barrier,
    }

    #[async_trait]
    impl GraphQueryEngine for RendezvousEngine {
        async fn query_terms(
            &self,
            _query: &str,
            spec: QuerySpec<'_>,
        ) -> Result<Vec<String>, QueryError> {
            self.barrier.wait().await;
            let web_id = spec.sources[0].as_str();
            Ok(vec![format!(
                "{}/",
                web_id.trim_end_matches("/profile/card#me")
            )])
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_for_different_actors_do_not_serialize() {
        let engine = Arc::new(RendezvousEngine {
            barrier: Barrier::new(2),
        });
        let classifier = Arc::new(OwnershipClassifier::new(engine));

        let alice = {
            let classifier = classifier.clone();
            tokio::spawn(async move {
                classifier
                    .is_owned_by(
                        "https://alice.example/data/x",
                        "https://alice.example/profile/card#me",
                    )
                    .await
            })
        };
        let bob = {
            let classifier = classifier.clone();
            tokio::spawn(async move {
                classifier
                    .is_owned_by(
                        "https://bob.example/data/y",
                        "https://bob.example/profile/card#me",
                    )
                    .await
            })
        };

        let (alice, bob) = tokio::time::timeout(Duration::from_secs(5), async {
            (alice.await.unwrap(), bob.await.unwrap())
        })
        .await
        .expect("ownership lookups deadlocked");
        assert!(alice);
        assert!(bob);
    }
}
