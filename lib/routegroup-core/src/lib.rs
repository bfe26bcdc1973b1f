//! Route group reconciliation engine
//!
//! This library provides:
//! - Route ordering, deduplication and virtual server synthesis
//! - LTM policy rule compilation
//! - Extended spec store with global/local override reconciliation
//! - Rate-limited work queue and the worker dispatching it

pub mod error;
pub mod extended_spec;
pub mod index;
pub mod members;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod routes;
pub mod store;
pub mod tls;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{CoreError, Result};
pub use extended_spec::{ExtendedSpecStore, ParsedSpec, SpecDiff};
pub use index::{MemoryIndex, ResourceIndex};
pub use metrics::ControllerMetrics;
pub use queue::{QueueKey, RateLimiter, Resource, WorkItem, WorkQueue};
pub use reconciler::{Reconciler, ReconcilerSettings, SynthesisReport};
pub use registry::{InformerFactory, InformerHandle, NamespaceRegistry};
pub use resource::{PoolMemberType, VirtualServerConfig};
pub use store::{ConfigRequest, ResourceStore};
pub use tls::{RouteTlsProfiles, TlsProfileResolver};
pub use worker::{ConfigAgent, Worker, WorkerSettings};
