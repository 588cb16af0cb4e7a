//! Step output cache.
//!
//! A content-addressed memo of a step's effect. The key combines the step
//! id, a fingerprint of the step's normalized configuration and a fingerprint
//! of the pending input nodes sorted by id. Values hold just enough of each
//! output node to rebuild it without running the step again.
//!
//! Entries are insert-only. The cache is consulted only on fresh step
//! invocations, never on restart continuations.

mod key;
mod store;

pub use key::{canonical_json, CacheKey, ContentHash};
pub use store::{CacheError, CacheInfo, CachedNode, StepCache};
