//! Core types used throughout TokenSync
//!
//! Defines the data model shared by the feed, snapshot fetcher,
//! reconciliation store and trade executor.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token identifier (mint address / listing id)
pub type TokenId = String;

/// Address label for the synthetic liquidity-pool holder entry
pub const LIQUIDITY_POOL_ADDRESS: &str = "liquidity-pool";

/// Current time in milliseconds since epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Supported history intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Hour1,
    Day1,
    Day7,
    Day30,
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Day1
    }
}

impl Interval {
    /// Interval length in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Interval::Hour1 => 60 * 60,
            Interval::Day1 => 24 * 60 * 60,
            Interval::Day7 => 7 * 24 * 60 * 60,
            Interval::Day30 => 30 * 24 * 60 * 60,
        }
    }

    /// Query-string label used by the snapshot API
    pub fn api_label(&self) -> &'static str {
        match self {
            Interval::Hour1 => "1h",
            Interval::Day1 => "1d",
            Interval::Day7 => "7d",
            Interval::Day30 => "30d",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1h" | "hour1" | "h1" => Some(Interval::Hour1),
            "1d" | "day1" | "d1" | "24h" => Some(Interval::Day1),
            "7d" | "day7" | "d7" | "1w" => Some(Interval::Day7),
            "30d" | "day30" | "d30" | "1m" => Some(Interval::Day30),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_label())
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    Buy,
    Sell,
}

impl TradeKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(TradeKind::Buy),
            "sell" => Some(TradeKind::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Buy => write!(f, "buy"),
            TradeKind::Sell => write!(f, "sell"),
        }
    }
}

/// Where a trade record originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSource {
    /// Executed locally through the trade executor
    Executed,
    /// Observed on the streaming feed (another actor's trade)
    Observed,
}

impl fmt::Display for TradeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSource::Executed => write!(f, "exec"),
            TradeSource::Observed => write!(f, "feed"),
        }
    }
}

/// A single immutable point on a token's price curve.
///
/// Timestamps are unique per token; on a source conflict the latest
/// arrival wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub token_id: TokenId,
    /// Milliseconds since epoch
    pub ts_ms: i64,
    /// Price in the platform's native quote asset
    pub price: Decimal,
    /// Price denominated in the reference asset (USD)
    pub price_usd: Decimal,
}

/// An executed or feed-observed trade. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Opaque id: `<source>-<ts>-<random suffix>`
    pub id: String,
    pub token_id: TokenId,
    pub kind: TradeKind,
    pub amount: Decimal,
    /// Price at execution
    pub price: Decimal,
    /// `amount * price`
    pub total_value: Decimal,
    pub ts_ms: i64,
    pub actor_address: String,
    pub actor_label: String,
    pub source: TradeSource,
}

impl Trade {
    /// Generate a trade id: `<source>-<ts>-<random suffix>`
    pub fn make_id(source: TradeSource, ts_ms: i64) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", source, ts_ms, &suffix[..8])
    }
}

/// Trading party identity as supplied by callers or the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub address: String,
    pub label: String,
}

impl Actor {
    pub fn new(address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: label.into(),
        }
    }
}

/// Derived holder-ledger row, valued at the current reconciled price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderEntry {
    pub address: String,
    pub quantity: Decimal,
    pub pct_of_supply: Decimal,
    pub value_at_price: Decimal,
    /// True for the synthetic liquidity-pool entry
    pub is_pool: bool,
}

/// Streaming feed connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
        }
    }
}

/// Which source currently backs a token's reconciled view.
///
/// Ordering matters: a token only moves "up" as better sources arrive
/// and drops from `Live` to `SnapshotBacked` when the feed disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceState {
    /// No data yet
    Cold,
    /// Served from the durable fallback cache
    CacheOnly,
    /// At least one successful snapshot fetch
    SnapshotBacked,
    /// Feed connected and ticking for this token
    Live,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Cold => write!(f, "cold"),
            SourceState::CacheOnly => write!(f, "cache_only"),
            SourceState::SnapshotBacked => write!(f, "snapshot_backed"),
            SourceState::Live => write!(f, "live"),
        }
    }
}

/// Read-API answer for the current price, annotated with the backing
/// source state so consumers can render a staleness affordance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub point: PricePoint,
    pub state: SourceState,
    pub market_cap: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
}

/// Current-state payload returned by the snapshot API for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub token_id: TokenId,
    pub ts_ms: i64,
    pub price: Decimal,
    pub price_usd: Decimal,
    pub market_cap: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    /// Bonding-curve pool reserve, if the API reports it
    pub pool_quantity: Option<Decimal>,
    /// Total supply under management, if the API reports it
    pub total_supply: Option<Decimal>,
}
