#![forbid(unsafe_code)]

//! Discovery-and-reconciliation engine for signed resources in personal data
//! stores. The surrounding CLI and the HTTP-backed capability implementations
//! live in the `podsyncctl` crate.

pub mod capability;
pub mod config;
pub mod crawler;
pub mod error;
pub mod model;
pub mod ownership;
pub mod reconcile;
pub mod snapshot;

pub use crawler::{CrawlOptions, Crawler, DEFAULT_INDEX_QUERY};
pub use model::{
    ActorProfile, ActorRegistry, DiscoveredResources, Operation, Outcome, OutcomeKind, RunSummary,
    Snapshot, VerificationSummary,
};
pub use ownership::OwnershipClassifier;
pub use reconcile::{ActorPlan, ReconcileOptions, Reconciler};
pub use snapshot::SnapshotStore;
