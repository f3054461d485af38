#![forbid(unsafe_code)]

//! # Turnstile
//!
//! Distributed admission control for async Rust: multi-window token-bucket
//! rate limiting per IP, user, endpoint, and system, with whitelists,
//! time-bounded bans, automatic banning of repeat offenders, and load-based
//! graceful degradation.
//!
//! ## Features
//!
//! - **Multi-window token buckets** (second/minute/hour/day) with burst
//!   headroom, evaluated shortest window first
//! - **Whitelists** (exact IP/user and CIDR blocks) that short-circuit
//!   every other check
//! - **Bans** with TTL expiry, plus auto-ban escalation when an identifier
//!   keeps hammering a closed door
//! - **Graceful degradation** that shrinks limits as load rises, with
//!   priority-endpoint exemptions
//! - **Pluggable storage**: all cross-process state lives behind
//!   [`CounterStore`]; use [`MemoryStore`] for one process or a shared
//!   store for a fleet
//! - **Tower middleware** for dropping the engine in front of a service
//!
//! ## Quick Start
//!
//! ```rust
//! use turnstile::{AdmissionEngine, AdmissionError, LimitKind, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AdmissionError> {
//!     let engine = AdmissionEngine::new(Arc::new(MemoryStore::new()));
//!
//!     let result = engine.allow("203.0.113.7", LimitKind::Ip).await?;
//!     assert!(result.allowed);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod policy;
pub mod prelude;
pub mod store;

mod banlist;
mod bypass;
mod degradation;

// Re-exports
pub use banlist::BanRecord;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use engine::{AdmissionEngine, RateLimitResult};
pub use error::AdmissionError;
pub use metrics::{KindCounts, MetricsSnapshot};
pub use middleware::{AdmissionKey, AdmissionLayer, AdmissionService, GateError};
pub use monitor::{Alert, Monitor, MonitorConfig};
pub use policy::{
    BypassDetectionConfig, DegradationConfig, LimitKind, LimitRules, LoadThreshold, PolicyConfig,
    Window,
};
pub use store::{CounterStore, MemoryStore, StoreError, TokenGrant};
