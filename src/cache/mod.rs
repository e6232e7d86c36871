//! Build cache invalidation
//!
//! - [`fingerprint`]: deterministic summary of a build context
//! - [`invalidator`]: the reuse/discard decision table
//! - [`store`]: per-service state persisted between runs

pub mod fingerprint;
pub mod invalidator;
pub mod store;

pub use fingerprint::{fingerprint_context, fingerprint_context_excluding};
pub use invalidator::{decide, CacheDecision, CacheInvalidator, DecisionReason};
pub use store::{BuildCacheState, BuildCacheStore};
