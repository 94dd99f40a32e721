//! Crawler traversal behavior: containment, termination, depth bounds and
//! per-actor failure isolation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use podsync_core::capability::{
    AuthCapability, GraphQueryEngine, HttpRequest, HttpResponse, QuerySpec, Session, SharedAuth,
};
use podsync_core::crawler::{CrawlOptions, Crawler};
use podsync_core::error::{QueryError, TransportError};
use podsync_core::model::{ActorProfile, ActorRegistry};

struct NoopAuth;

#[async_trait]
impl AuthCapability for NoopAuth {
    async fn request(&self, _req: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            content_type: None,
            body: String::new(),
        })
    }
}

/// Scripted engine: maps a frontier (source list) to the terms it returns.
/// Unknown frontiers yield no results. Every call is recorded.
struct ScriptedEngine {
    responses: BTreeMap<Vec<String>, Vec<String>>,
    calls: Mutex<Vec<Vec<String>>>,
    fail_on_source: Option<String>,
}

impl ScriptedEngine {
    fn new(responses: Vec<(Vec<&str>, Vec<&str>)>) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|(sources, terms)| {
                    (
                        sources.into_iter().map(String::from).collect(),
                        terms.into_iter().map(String::from).collect(),
                    )
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
            fail_on_source: None,
        }
    }

    fn failing_on(mut self, source: &str) -> Self {
        self.fail_on_source = Some(source.to_string());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GraphQueryEngine for ScriptedEngine {
    async fn query_terms(
        &self,
        _query: &str,
        spec: QuerySpec<'_>,
    ) -> Result<Vec<String>, QueryError> {
        let sources = spec.sources.to_vec();
        self.calls.lock().unwrap().push(sources.clone());
        if let Some(bad) = &self.fail_on_source {
            if sources.iter().any(|s| s == bad) {
                return Err(QueryError("engine unavailable".into()));
            }
        }
        Ok(self.responses.get(&sources).cloned().unwrap_or_default())
    }
}

fn actor(web_id: &str, index: &str) -> ActorProfile {
    ActorProfile {
        web_id: web_id.to_string(),
        email: "someone@example.org".to_string(),
        password: "pw".to_string(),
        oidc_issuer: "https://idp.example/".to_string(),
        index: index.to_string(),
        index_query: None,
    }
}

fn session() -> Session {
    Session {
        auth: Arc::new(NoopAuth),
        token_resource: None,
    }
}

fn auth() -> SharedAuth {
    Arc::new(NoopAuth)
}

#[tokio::test]
async fn fixpoint_discovers_seed_and_linked_resource_in_two_rounds() {
    let engine = Arc::new(ScriptedEngine::new(vec![
        (
            vec!["https://alice.example/index"],
            vec!["https://alice.example/data1"],
        ),
        (vec!["https://alice.example/data1"], vec![]),
    ]));
    let crawler = Crawler::new(
        engine.clone(),
        CrawlOptions {
            max_depth: 0,
            ..Default::default()
        },
    );

    let set = crawler
        .discover(
            &actor("https://alice.example/profile/card#me", "https://alice.example/index"),
            &auth(),
        )
        .await
        .unwrap();

    let uris: Vec<&str> = set.iter().collect();
    assert_eq!(
        uris,
        vec!["https://alice.example/index", "https://alice.example/data1"]
    );
    assert_eq!(engine.call_count(), 2);
}

#[tokio::test]
async fn default_depth_stops_after_one_hop() {
    let engine = Arc::new(ScriptedEngine::new(vec![
        (
            vec!["https://alice.example/index"],
            vec!["https://alice.example/data1"],
        ),
        (
            vec!["https://alice.example/data1"],
            vec!["https://alice.example/data2"],
        ),
    ]));
    let crawler = Crawler::new(engine.clone(), CrawlOptions::default());

    let set = crawler
        .discover(
            &actor("https://alice.example/profile/card#me", "https://alice.example/index"),
            &auth(),
        )
        .await
        .unwrap();

    assert!(set.contains("https://alice.example/index"));
    assert!(set.contains("https://alice.example/data1"));
    assert!(!set.contains("https://alice.example/data2"));
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn cycles_do_not_loop_forever() {
    // data1 links back to the seed and to itself; only data2 is genuinely new.
    let engine = Arc::new(ScriptedEngine::new(vec![
        (
            vec!["https://alice.example/index"],
            vec!["https://alice.example/data1"],
        ),
        (
            vec!["https://alice.example/data1"],
            vec![
                "https://alice.example/index",
                "https://alice.example/data1",
                "https://alice.example/data2",
            ],
        ),
        (vec!["https://alice.example/data2"], vec![]),
    ]));
    let crawler = Crawler::new(
        engine.clone(),
        CrawlOptions {
            max_depth: 0,
            ..Default::default()
        },
    );

    let set = crawler
        .discover(
            &actor("https://alice.example/profile/card#me", "https://alice.example/index"),
            &auth(),
        )
        .await
        .unwrap();

    assert_eq!(set.len(), 3);
    assert_eq!(engine.call_count(), 3);
    // The third frontier contains only the unseen URI.
    assert_eq!(
        engine.calls.lock().unwrap()[2],
        vec!["https://alice.example/data2".to_string()]
    );
}

#[tokio::test]
async fn empty_query_result_is_not_an_error() {
    let engine = Arc::new(ScriptedEngine::new(vec![(
        vec!["https://alice.example/index"],
        vec![],
    )]));
    let crawler = Crawler::new(
        engine,
        CrawlOptions {
            max_depth: 0,
            ..Default::default()
        },
    );

    let set = crawler
        .discover(
            &actor("https://alice.example/profile/card#me", "https://alice.example/index"),
            &auth(),
        )
        .await
        .unwrap();

    // The seed is always a member, even when nothing links from it.
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["https://alice.example/index"]);
}

#[tokio::test]
async fn one_failing_actor_does_not_block_the_others() {
    let engine = Arc::new(
        ScriptedEngine::new(vec![
            (
                vec!["https://alice.example/index"],
                vec!["https://alice.example/data1"],
            ),
            (vec!["https://alice.example/data1"], vec![]),
        ])
        .failing_on("https://bob.example/index"),
    );
    let crawler = Crawler::new(
        engine,
        CrawlOptions {
            max_depth: 0,
            ..Default::default()
        },
    );

    let alice = actor("https://alice.example/profile/card#me", "https://alice.example/index");
    let bob = actor("https://bob.example/profile/card#me", "https://bob.example/index");
    let mut registry = ActorRegistry::new();
    registry.insert(alice.web_id.clone(), alice.clone());
    registry.insert(bob.web_id.clone(), bob.clone());
    let mut sessions = BTreeMap::new();
    sessions.insert(alice.web_id.clone(), session());
    sessions.insert(bob.web_id.clone(), session());

    let (sets, failures) = crawler.discover_all(&registry, &sessions).await;

    assert_eq!(sets.len(), 1);
    assert_eq!(sets[&alice.web_id].len(), 2);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].web_id(), bob.web_id);
}

#[tokio::test]
async fn actor_specific_query_overrides_the_default() {
    struct QueryRecorder {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GraphQueryEngine for QueryRecorder {
        async fn query_terms(
            &self,
            query: &str,
            _spec: QuerySpec<'_>,
        ) -> Result<Vec<String>, QueryError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(vec![])
        }
    }

    let engine = Arc::new(QueryRecorder {
        queries: Mutex::new(Vec::new()),
    });
    let crawler = Crawler::new(engine.clone(), CrawlOptions::default());

    let mut custom = actor("https://alice.example/profile/card#me", "https://alice.example/index");
    custom.index_query = Some("SELECT ?r WHERE { ?s <urn:custom> ?r . }".to_string());
    crawler.discover(&custom, &auth()).await.unwrap();

    let plain = actor("https://bob.example/profile/card#me", "https://bob.example/index");
    crawler.discover(&plain, &auth()).await.unwrap();

    let queries = engine.queries.lock().unwrap();
    assert!(queries[0].contains("urn:custom"));
    assert!(queries[1].contains("rdfs:seeAlso"));
}
