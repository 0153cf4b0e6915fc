//! API key pool for the generation backend
//!
//! Holds the operator-supplied API keys and hands them out round-robin,
//! skipping keys that recently hit a rate limit. There are no timers: a
//! rate-limited key stays out of rotation until every key is out, at which
//! point the whole pool is reset and rotation starts over from the first key.
//!
//! Key lifecycle:
//! 1. Operator supplies keys → `KeyPool::add`, all keys available
//! 2. Orchestrator asks for a key → `next` returns the next available one
//! 3. Backend error mentions 429 / RESOURCE_EXHAUSTED / quota → key unavailable
//! 4. All keys unavailable → `next` clears the unavailable set and returns key 0
//! 5. Successful extraction → use counter incremented

pub mod pool;
pub mod quota;

pub use pool::{KeyPool, KeyStats, SelectedKey};
pub use quota::is_rate_limited;
