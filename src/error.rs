//! Error types for admission control
use crate::store::StoreError;
use std::fmt;

/// Unified error type for engine operations.
///
/// Only the primary admission path surfaces store errors; auxiliary signals
/// (ban pre-checks, bypass recording, metrics) degrade gracefully and are
/// logged instead.
#[derive(Debug, Clone)]
pub enum AdmissionError {
    /// The counter store failed during token-bucket evaluation. The caller
    /// decides the safe default; the engine never silently allows once
    /// counter evaluation has begun.
    Store(StoreError),
    /// A config rejected by validation.
    InvalidConfig {
        /// What failed validation.
        reason: String,
    },
    /// A stored record could not be decoded.
    Codec {
        /// Decode failure detail.
        detail: String,
    },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "counter store failure: {}", e),
            Self::InvalidConfig { reason } => write!(f, "invalid policy config: {}", reason),
            Self::Codec { detail } => write!(f, "corrupt stored record: {}", detail),
        }
    }
}

impl std::error::Error for AdmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for AdmissionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl AdmissionError {
    /// Check if this error came from the counter store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if this error is a config validation failure.
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Borrow the underlying store error if present.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}
