//! An executor-agnostic incremental delivery engine for GraphQL's `@defer`
//! and `@stream` directives.
//!
//! The executor is responsible for building an operation's selection sets,
//! deciding which fields carry which `@defer`/`@stream` usages, and
//! resolving field values. This crate takes it from there: it partitions a
//! grouped field set into delivery-ready and deferred slices
//! ([`field_plan`]), tracks the resulting forest of deferred fragments and
//! streams as they complete out of order ([`graph`]), and turns completions
//! into the initial/subsequent response payloads a transport sends to the
//! client ([`publisher`]).

pub mod cancel;
pub mod config;
pub mod defer_usage;
pub mod error;
pub mod field_plan;
pub mod graph;
pub mod lazy;
pub mod path;
pub mod publisher;

pub use cancel::AbortReason;
pub use cancel::CancellableSequence;
pub use cancel::CancellationRegistry;
pub use cancel::IncrementalSequence;
pub use config::IncrementalDeliveryConfig;
pub use defer_usage::DeferUsageArena;
pub use defer_usage::DeferUsageId;
pub use error::GraphqlError;
pub use field_plan::FieldDetails;
pub use field_plan::FieldPlan;
pub use field_plan::build_field_plan;
pub use graph::IncrementalGraph;
pub use lazy::Lazy;
pub use path::Path;
pub use path::PathElement;
pub use publisher::IncrementalPublisher;
