//! One-stop imports for the common surface.
//!
//! ```rust
//! use turnstile::prelude::*;
//! ```

pub use crate::banlist::BanRecord;
pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::engine::{AdmissionEngine, RateLimitResult};
pub use crate::error::AdmissionError;
pub use crate::metrics::{KindCounts, MetricsSnapshot};
pub use crate::middleware::{AdmissionKey, AdmissionLayer, AdmissionService, GateError};
pub use crate::monitor::{Alert, Monitor, MonitorConfig};
pub use crate::policy::{
    BypassDetectionConfig, DegradationConfig, LimitKind, LimitRules, LoadThreshold, PolicyConfig,
    Window,
};
pub use crate::store::{CounterStore, MemoryStore, StoreError, TokenGrant};
