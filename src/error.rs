//! Error taxonomy for the decision pipeline.
//!
//! Perception failures are absorbed where they happen (synthetic fallback),
//! so `MarketError` never leaves the market unit. Scoring and arbitration
//! failures are surfaced as typed values.

use thiserror::Error;

/// Failure of a single text-generation call, classified at the call boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Provider signalled rate exhaustion. Retried with backoff.
    #[error("throttled by text service: {0}")]
    Throttled(String),
    /// Any other provider failure. Not retried.
    #[error("text service error: {0}")]
    Provider(String),
}

impl GatewayError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, GatewayError::Throttled(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("insufficient data: no closed trades to profile")]
    InsufficientData,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TiltError {
    #[error("tilt escalation failed: {0}")]
    Escalation(#[from] GatewayError),
}

/// Errors surfaced by the cognitive loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Tilt(#[from] TiltError),
    #[error("trader profile not initialized")]
    ProfileNotInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_classification_is_structural() {
        assert!(GatewayError::Throttled("quota".into()).is_throttled());
        // Message text mentioning 429 does not make a provider error retryable
        assert!(!GatewayError::Provider("HTTP 429 in body".into()).is_throttled());
    }

    #[test]
    fn test_tilt_error_wraps_gateway() {
        let err: MirrorError = TiltError::from(GatewayError::Provider("boom".into())).into();
        assert_eq!(err.to_string(), "tilt escalation failed: text service error: boom");
    }
}
