//! Counter storage for cross-process admission state.
//!
//! The engine owns no authoritative state: every counter, ban record, and
//! bypass tally is a query or mutation against a [`CounterStore`]. Swapping
//! the store swaps the deployment model ([`memory::MemoryStore`] for a
//! single process, a Redis/etcd-backed implementation for a fleet) without
//! touching engine logic.

use async_trait::async_trait;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryStore;

/// Error produced by store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The operation did not complete in time.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// The backend reached but reported a failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Outcome of one atomic token acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenGrant {
    /// Whether a token was consumed.
    pub allowed: bool,
    /// Tokens left in the bucket after this call (0 when denied).
    pub remaining: i64,
    /// Time until the bucket's window expires and refills.
    pub reset_after: Duration,
}

/// Atomic key-value operations the admission engine needs.
///
/// The one hard requirement is [`take_token`](CounterStore::take_token):
/// initialize-or-decrement must be a single atomic step across every process
/// sharing the store. Two concurrent first-requests for the same key must
/// not both observe "absent" and both receive a full bucket. Redis scripts
/// or a compare-and-swap loop both satisfy this.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Consume one token from the bucket at `key`.
    ///
    /// Absent key: create it holding `capacity - 1` tokens with TTL =
    /// `window` and allow. Present and positive: decrement and allow.
    /// Present and zero or below: deny, reporting the remaining TTL.
    async fn take_token(
        &self,
        key: &str,
        capacity: i64,
        window: Duration,
    ) -> Result<TokenGrant, StoreError>;

    /// Increment a counter and refresh its TTL to `ttl` from now (sliding
    /// window). Returns the post-increment value.
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Increment a counter, setting TTL only when the key is created (fixed
    /// window). Returns the post-increment value.
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Read an integer counter.
    async fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Write a string value, optionally with a TTL (`None` = no expiry).
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Read a string value.
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a key exists (and has not expired).
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining TTL of a key. `Ok(None)` when the key is absent or has no
    /// expiry.
    async fn ttl_of(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Count live keys whose name starts with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}
