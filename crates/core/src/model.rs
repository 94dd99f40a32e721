use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// One participating identity: a webId plus the credentials and the
/// discovery seed configured for it. Field names match the persisted status
/// document, so phase 2 can re-read phase-1 output without the original
/// config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorProfile {
    pub web_id: String,
    pub email: String,
    pub password: String,
    pub oidc_issuer: String,
    /// Seed URI of the actor's discovery index.
    pub index: String,
    /// Actor-specific override of the default traversal query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_query: Option<String>,
}

/// Actors keyed by webId, the join key for every downstream map.
pub type ActorRegistry = BTreeMap<String, ActorProfile>;

/// Deduplicated resource URIs from one discovery pass. Unordered for
/// consumers; first-seen order is preserved internally so runs are
/// deterministic to test. Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", from = "Vec<String>")]
pub struct DiscoveredResources {
    ordered: Vec<String>,
    seen: HashSet<String>,
}

impl DiscoveredResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set seeded with the discovery index, which is itself a discoverable
    /// resource.
    pub fn from_seed(seed: &str) -> Self {
        let mut set = Self::new();
        set.insert(seed.to_string());
        set
    }

    /// Returns true if the URI was not present before.
    pub fn insert(&mut self, uri: String) -> bool {
        if self.seen.insert(uri.clone()) {
            self.ordered.push(uri);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.seen.contains(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl From<Vec<String>> for DiscoveredResources {
    fn from(uris: Vec<String>) -> Self {
        let mut set = Self::new();
        for uri in uris {
            set.insert(uri);
        }
        set
    }
}

impl From<DiscoveredResources> for Vec<String> {
    fn from(set: DiscoveredResources) -> Self {
        set.ordered
    }
}

impl FromIterator<String> for DiscoveredResources {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::new();
        for uri in iter {
            set.insert(uri);
        }
        set
    }
}

/// The persisted unit of state connecting the two phases. Owned exclusively
/// by [`crate::snapshot::SnapshotStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub actors: ActorRegistry,
    #[serde(default)]
    pub original_data_sources: BTreeMap<String, DiscoveredResources>,
    /// Absent until phase 2 completes its discovery sub-step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_data_sources: Option<BTreeMap<String, DiscoveredResources>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "add"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Added,
    Deleted,
    Unchanged,
    SkippedNotOwned,
    Failed,
}

/// Result of one reconciliation unit of work. Never persisted; aggregated
/// into a [`RunSummary`] for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub web_id: String,
    pub resource: String,
    pub operation: Operation,
    pub kind: OutcomeKind,
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok(web_id: &str, resource: String, operation: Operation, kind: OutcomeKind) -> Self {
        Self {
            web_id: web_id.to_string(),
            resource,
            operation,
            kind,
            error: None,
        }
    }

    pub fn skipped(web_id: &str, resource: String, operation: Operation) -> Self {
        Self::ok(web_id, resource, operation, OutcomeKind::SkippedNotOwned)
    }

    pub fn failed(
        web_id: &str,
        resource: String,
        operation: Operation,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            web_id: web_id.to_string(),
            resource,
            operation,
            kind: OutcomeKind::Failed,
            error: Some(error.to_string()),
        }
    }
}

/// Counts per outcome kind, reported even when every operation failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub added: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped_not_owned: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn tally(outcomes: &[Outcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.kind {
                OutcomeKind::Added => summary.added += 1,
                OutcomeKind::Deleted => summary.deleted += 1,
                OutcomeKind::Unchanged => summary.unchanged += 1,
                OutcomeKind::SkippedNotOwned => summary.skipped_not_owned += 1,
                OutcomeKind::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} deleted, {} unchanged, {} skipped (not owned), {} failed",
            self.added, self.deleted, self.unchanged, self.skipped_not_owned, self.failed
        )
    }
}

/// Aggregate counts of the observational verification sub-pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    pub passed: usize,
    pub failed: usize,
    pub invalid: usize,
    pub errors: usize,
}

impl VerificationSummary {
    pub fn merge(&mut self, other: VerificationSummary) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.invalid += other.invalid;
        self.errors += other.errors;
    }
}

impl fmt::Display for VerificationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} invalid, {} execution errors",
            self.passed, self.failed, self.invalid, self.errors
        )
    }
}
