//! Prop ingestion & canonicalization pipeline.
//!
//! Ingests player- and team-prop offerings from heterogeneous providers,
//! normalizes them into one canonical schema keyed by a content-addressed
//! line hash, deduplicates into a tiered cache plus durable store, and
//! serves paginated, position-aware views to downstream consumers.

pub mod api;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod providers;
pub mod store;

pub use cache::{CacheManager, PropQuery, UpsertOutcome};
pub use config::Config;
pub use models::{CanonicalProp, LineHash, PropType, RawProp, Sport};
pub use normalize::{PayoutNormalizer, PropMapper, TaxonomyService};
pub use pipeline::{Orchestrator, Upserter};
pub use providers::ProviderClient;
