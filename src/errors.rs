//! Typed error taxonomies for the I/O boundary and the trade executor

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors crossing the snapshot-fetcher boundary.
///
/// Callers decide fallback policy from the variant: `Network` and
/// `RateLimited` mean "use the cache now", `InvalidResponse` is a data
/// problem worth surfacing after repeated failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure or timeout; retryable, fall back to cache
    #[error("network error: {0}")]
    Network(String),

    /// Upstream returned 429; fall back and back off before the next attempt
    #[error("rate limited by upstream")]
    RateLimited,

    /// Body did not parse into the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Whether the caller should immediately serve from the fallback cache
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::RateLimited)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts are treated identically to transport failures.
        if err.is_decode() {
            FetchError::InvalidResponse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Trade-executor precondition failures.
///
/// These are the only errors a consumer must handle synchronously; none
/// of them mutates any state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    /// No reconciled price is known for the token yet
    #[error("no price available for token")]
    PriceUnavailable,

    /// Trade amount must be strictly positive
    #[error("trade amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    /// Seller holds less than the requested amount
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: Decimal, need: Decimal },

    /// Liquidity pool holds less than the requested buy amount
    #[error("insufficient liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity {
        available: Decimal,
        requested: Decimal,
    },
}
