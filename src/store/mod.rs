//! Reconciliation store
//!
//! The core state machine: merges feed events, snapshot results and
//! fallback-cache reads into one canonical, de-duplicated, time-ordered
//! view per token. Per-token state sits behind its own mutex (single
//! writer per token, independent tokens independent); reads never block
//! on I/O and always answer from whatever state the token is in.

mod ledger;
mod series;

pub(crate) use ledger::Ledger;
pub use series::merge_series;

use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::FallbackCache;
use crate::config::StoreConfig;
use crate::feed::ObservedTrade;
use crate::types::{
    HolderEntry, Interval, PricePoint, PriceSnapshot, SourceState, TokenId, TokenStats, Trade,
    TradeSource,
};

/// Per-token reconciled state. Mutated only under its mutex.
pub(crate) struct TokenState {
    pub(crate) token_id: TokenId,
    pub(crate) state: SourceState,
    pub(crate) current: Option<PricePoint>,
    pub(crate) market_cap: Option<Decimal>,
    pub(crate) volume_24h: Option<Decimal>,
    snapshot_series: HashMap<Interval, Vec<PricePoint>>,
    live: VecDeque<PricePoint>,
    trades: VecDeque<Trade>,
    pub(crate) ledger: Ledger,
}

impl TokenState {
    fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            state: SourceState::Cold,
            current: None,
            market_cap: None,
            volume_24h: None,
            snapshot_series: HashMap::new(),
            live: VecDeque::new(),
            trades: VecDeque::new(),
            ledger: Ledger::default(),
        }
    }

    /// Cold tokens lazily adopt the last-known cached value on access,
    /// so a read after restart answers without waiting on the network.
    pub(crate) fn promote_from_cache(&mut self, cache: &FallbackCache) {
        if self.state != SourceState::Cold {
            return;
        }
        if let Some(stats) = cache.get_stats(&self.token_id) {
            self.market_cap = stats.market_cap;
            self.volume_24h = stats.volume_24h;
            if let (Some(supply), Some(pool)) = (stats.total_supply, stats.pool_quantity) {
                self.ledger.seed(supply, pool);
            }
        }
        if let Some(point) = cache.get_price(&self.token_id) {
            debug!(token_id = %self.token_id, "Serving from fallback cache");
            self.current = Some(point);
            self.state = SourceState::CacheOnly;
        }
    }

    pub(crate) fn price_snapshot(&self) -> Option<PriceSnapshot> {
        self.current.as_ref().map(|point| PriceSnapshot {
            point: point.clone(),
            state: self.state,
            market_cap: self.market_cap,
            volume_24h: self.volume_24h,
        })
    }

    /// Push into the newest-first ring buffer
    pub(crate) fn record_trade(&mut self, trade: Trade, cap: usize) {
        self.trades.push_front(trade);
        self.trades.truncate(cap);
    }
}

/// The reconciliation store. Cheap to share via `Arc`.
pub struct ReconciliationStore {
    cache: Arc<FallbackCache>,
    live_buffer_cap: usize,
    trade_ring_cap: usize,
    tokens: RwLock<HashMap<TokenId, Arc<Mutex<TokenState>>>>,
}

impl ReconciliationStore {
    pub fn new(cache: Arc<FallbackCache>, config: &StoreConfig) -> Self {
        Self {
            cache,
            live_buffer_cap: config.live_buffer_cap,
            trade_ring_cap: config.trade_ring_cap,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn cache(&self) -> &FallbackCache {
        &self.cache
    }

    pub(crate) fn trade_ring_cap(&self) -> usize {
        self.trade_ring_cap
    }

    fn token_entry(&self, token_id: &str) -> Arc<Mutex<TokenState>> {
        if let Some(entry) = self
            .tokens
            .read()
            .expect("token map lock poisoned")
            .get(token_id)
        {
            return entry.clone();
        }

        let mut map = self.tokens.write().expect("token map lock poisoned");
        map.entry(token_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenState::new(token_id.to_string()))))
            .clone()
    }

    /// Run a closure inside a token's single-writer critical section
    pub(crate) fn with_token<R>(&self, token_id: &str, f: impl FnOnce(&mut TokenState) -> R) -> R {
        let entry = self.token_entry(token_id);
        let mut state = entry.lock().expect("token state lock poisoned");
        f(&mut state)
    }

    // ── Write paths ─────────────────────────────────────────────────

    /// Apply a live tick from the streaming feed
    pub fn apply_tick(&self, point: PricePoint) {
        // Written through to the cache before it becomes "current".
        self.cache.set_price(&point);

        self.with_token(&point.token_id.clone(), |state| {
            series::push_live(&mut state.live, point.clone(), self.live_buffer_cap);
            state.current = Some(point);
            if state.state != SourceState::Live {
                info!(token_id = %state.token_id, from = %state.state, "Token is now live");
                state.state = SourceState::Live;
            }
        });
    }

    /// Apply a successful snapshot fetch of current token stats
    pub fn apply_stats(&self, stats: TokenStats) {
        let point = PricePoint {
            token_id: stats.token_id.clone(),
            ts_ms: stats.ts_ms,
            price: stats.price,
            price_usd: stats.price_usd,
        };
        self.cache.set_stats(&stats);
        self.cache.set_price(&point);

        self.with_token(&stats.token_id, |state| {
            state.market_cap = stats.market_cap;
            state.volume_24h = stats.volume_24h;
            if let (Some(supply), Some(pool)) = (stats.total_supply, stats.pool_quantity) {
                state.ledger.seed(supply, pool);
            }

            // While live, the feed owns the current price; snapshots only
            // refresh the slower-moving stats.
            if state.state != SourceState::Live {
                state.current = Some(point);
                state.state = SourceState::SnapshotBacked;
            }
        });
    }

    /// Replace the snapshot-sourced series for one interval
    pub fn apply_history(&self, token_id: &str, interval: Interval, points: Vec<PricePoint>) {
        self.with_token(token_id, |state| {
            state.snapshot_series.insert(interval, points);
        });
    }

    /// Apply a trade observed on the feed, using the same ledger
    /// transition as locally-executed trades
    pub fn apply_observed_trade(&self, observed: ObservedTrade) {
        self.with_token(&observed.token_id.clone(), |state| {
            let moved =
                state
                    .ledger
                    .apply_trade(observed.kind, &observed.actor_address, observed.amount);
            if moved.is_zero() && !observed.amount.is_zero() {
                // Ledger had nothing to move; record the trade anyway so
                // the tape matches the feed.
                debug!(token_id = %state.token_id, "Observed trade applied with no ledger effect");
            }

            let trade = Trade {
                id: Trade::make_id(TradeSource::Observed, observed.ts_ms),
                token_id: observed.token_id.clone(),
                kind: observed.kind,
                amount: observed.amount,
                price: observed.price,
                total_value: observed.amount * observed.price,
                ts_ms: observed.ts_ms,
                actor_address: observed.actor_address.clone(),
                actor_label: observed.actor_label.clone(),
                source: TradeSource::Observed,
            };
            state.record_trade(trade, self.trade_ring_cap);
        });
    }

    /// Settlement correction from the external ledger
    pub fn apply_correction(&self, token_id: &str, address: &str, quantity: Decimal) {
        self.with_token(token_id, |state| {
            info!(token_id = %state.token_id, address = %address, quantity = %quantity,
                "Applying settlement correction");
            state.ledger.apply_correction(address, quantity);
            debug!(
                token_id = %state.token_id,
                total = %state.ledger.total_under_management(),
                "Ledger after correction"
            );
        });
    }

    /// Feed connectivity changed. Losing the connection demotes every
    /// live token to snapshot-backed; promotion back happens per token
    /// on its first tick after reconnecting.
    pub fn connection_changed(&self, connected: bool) {
        if connected {
            return;
        }
        let tokens: Vec<Arc<Mutex<TokenState>>> = self
            .tokens
            .read()
            .expect("token map lock poisoned")
            .values()
            .cloned()
            .collect();

        for entry in tokens {
            let mut state = entry.lock().expect("token state lock poisoned");
            if state.state == SourceState::Live {
                warn!(token_id = %state.token_id, "Feed lost; demoting to snapshot-backed");
                state.state = SourceState::SnapshotBacked;
            }
        }
    }

    /// Seed a token's ledger directly (tests, backfills)
    pub fn set_liquidity(&self, token_id: &str, total_supply: Decimal, pool_quantity: Decimal) {
        self.with_token(token_id, |state| {
            state.ledger.seed(total_supply, pool_quantity);
        });
    }

    // ── Read paths (non-blocking) ───────────────────────────────────

    /// Best-available current price, annotated with the backing state.
    /// Cold tokens fall back to the durable cache.
    pub fn current_price(&self, token_id: &str) -> Option<PriceSnapshot> {
        self.with_token(token_id, |state| {
            state.promote_from_cache(&self.cache);
            state.price_snapshot()
        })
    }

    /// Merged price series: snapshot history up to the live window, then
    /// the live buffer
    pub fn history(&self, token_id: &str, interval: Interval) -> Vec<PricePoint> {
        self.with_token(token_id, |state| {
            let snapshot = state
                .snapshot_series
                .get(&interval)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            series::merge_series(snapshot, &state.live)
        })
    }

    /// Holder ledger valued at the newest known price, largest first
    pub fn holders(&self, token_id: &str) -> Vec<HolderEntry> {
        self.with_token(token_id, |state| {
            state.promote_from_cache(&self.cache);
            let price = state
                .current
                .as_ref()
                .map(|p| p.price)
                .unwrap_or(Decimal::ZERO);
            state.ledger.entries(price)
        })
    }

    /// Most recent trades, newest first
    pub fn recent_trades(&self, token_id: &str) -> Vec<Trade> {
        self.with_token(token_id, |state| state.trades.iter().cloned().collect())
    }

    /// Current backing state for a token
    pub fn source_state(&self, token_id: &str) -> SourceState {
        self.with_token(token_id, |state| state.state)
    }
}
