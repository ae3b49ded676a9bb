//! Engine lifecycle and task wiring
//!
//! One explicitly constructed `Engine` owns the whole pipeline: the feed
//! client and its event pump, the periodic snapshot refresh loops, the
//! reconciliation store and the trade executor. Consumers hold the
//! engine (or clone its `Arc` internals) instead of reaching for any
//! shared global.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::FallbackCache;
use crate::config::EngineConfig;
use crate::errors::{FetchError, TradeError};
use crate::executor::TradeExecutor;
use crate::feed::{FeedEvent, FeedHandle, PriceFeedClient};
use crate::registry::SubscriptionRegistry;
use crate::snapshot::SnapshotFetcher;
use crate::store::ReconciliationStore;
use crate::types::{
    Actor, ConnectionState, HolderEntry, Interval, PriceSnapshot, PricePoint, Trade, TradeKind,
};

/// Route one feed event into the store
fn apply_feed_event(store: &ReconciliationStore, event: FeedEvent) {
    match event {
        FeedEvent::PriceTick(point) => store.apply_tick(point),
        FeedEvent::TradeObserved(trade) => store.apply_observed_trade(trade),
        FeedEvent::ConnectionChanged(state) => {
            info!(state = %state, "Feed connection state changed");
            store.connection_changed(state == ConnectionState::Connected);
        }
    }
}

async fn refresh_token(
    fetcher: &SnapshotFetcher,
    store: &ReconciliationStore,
    token_id: &str,
    with_history: bool,
) {
    match fetcher.fetch_current(token_id).await {
        Ok(stats) => store.apply_stats(stats),
        Err(e) if e.is_transient() => {
            // Cache and existing reconciled state carry us through.
            warn!(token_id = %token_id, error = %e, "Snapshot fetch failed; serving fallback");
        }
        Err(e) => {
            warn!(token_id = %token_id, error = %e, "Snapshot returned bad data");
        }
    }

    if with_history {
        match fetcher.fetch_history(token_id, Interval::Day1).await {
            Ok(points) => store.apply_history(token_id, Interval::Day1, points),
            Err(e) => {
                warn!(token_id = %token_id, error = %e, "History fetch failed");
            }
        }
    }
}

/// The price oracle & trade-synchronization engine
pub struct Engine {
    store: Arc<ReconciliationStore>,
    executor: TradeExecutor,
    registry: Arc<SubscriptionRegistry>,
    fetcher: SnapshotFetcher,
    feed_handle: FeedHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build the pipeline and spawn its background tasks.
    /// Must be called within a tokio runtime.
    pub fn start(config: EngineConfig) -> Result<Self> {
        let cache = Arc::new(
            FallbackCache::open(&config.cache.path).context("Failed to open fallback cache")?,
        );
        let store = Arc::new(ReconciliationStore::new(cache, &config.store));
        let executor = TradeExecutor::new(store.clone());
        let fetcher = SnapshotFetcher::new(
            &config.snapshot.base_url,
            Duration::from_secs(config.snapshot.timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!("failed to build snapshot client: {e}"))?;

        let (client, feed_handle, mut events) = PriceFeedClient::new(&config.feed);
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(feed_handle.clone())));

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(async move {
            if let Err(e) = client.run().await {
                warn!(error = %e, "Price feed client exited");
            }
        }));

        let pump_store = store.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                apply_feed_event(&pump_store, event);
            }
            info!("Feed event stream closed");
        }));

        // Full refresh: stats + history for every watched token.
        let full_store = store.clone();
        let full_fetcher = fetcher.clone();
        let full_registry = registry.clone();
        let full_period = Duration::from_secs(config.snapshot.refresh_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(full_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                for token_id in full_registry.watched_tokens() {
                    refresh_token(&full_fetcher, &full_store, &token_id, true).await;
                }
            }
        }));

        // Faster price-only refresh.
        let price_store = store.clone();
        let price_fetcher = fetcher.clone();
        let price_registry = registry.clone();
        let price_period = Duration::from_secs(config.snapshot.price_refresh_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(price_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                for token_id in price_registry.watched_tokens() {
                    refresh_token(&price_fetcher, &price_store, &token_id, false).await;
                }
            }
        }));

        Ok(Self {
            store,
            executor,
            registry,
            fetcher,
            feed_handle,
            tasks,
        })
    }

    /// Stop the refresh loops and disconnect the feed
    pub async fn shutdown(mut self) {
        info!("Shutting down engine");
        self.feed_handle.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    // ── Watch API ───────────────────────────────────────────────────

    pub async fn watch_token(&self, token_id: &str) -> Result<()> {
        self.registry.watch(token_id).await?;
        // Prime the token immediately rather than waiting a full period.
        refresh_token(&self.fetcher, &self.store, token_id, true).await;
        Ok(())
    }

    pub async fn unwatch_token(&self, token_id: &str) -> Result<()> {
        self.registry.unwatch(token_id).await
    }

    // ── Read API (non-blocking) ─────────────────────────────────────

    pub fn current_price(&self, token_id: &str) -> Option<PriceSnapshot> {
        self.store.current_price(token_id)
    }

    pub fn history(&self, token_id: &str, interval: Interval) -> Vec<PricePoint> {
        self.store.history(token_id, interval)
    }

    pub fn holders(&self, token_id: &str) -> Vec<HolderEntry> {
        self.store.holders(token_id)
    }

    pub fn recent_trades(&self, token_id: &str) -> Vec<Trade> {
        self.store.recent_trades(token_id)
    }

    /// Fetch and install history for a non-default interval on demand
    pub async fn refresh_history(
        &self,
        token_id: &str,
        interval: Interval,
    ) -> Result<(), FetchError> {
        let points = self.fetcher.fetch_history(token_id, interval).await?;
        self.store.apply_history(token_id, interval, points);
        Ok(())
    }

    // ── Write API ───────────────────────────────────────────────────

    pub fn execute_trade(
        &self,
        token_id: &str,
        kind: TradeKind,
        amount: Decimal,
        actor: &Actor,
    ) -> Result<Trade, TradeError> {
        self.executor.execute(token_id, kind, amount, actor)
    }

    /// Settlement correction observed from the external ledger
    pub fn apply_settlement(&self, token_id: &str, address: &str, quantity: Decimal) {
        self.store.apply_correction(token_id, address, quantity);
    }

    /// Direct handle on the reconciliation store
    pub fn store(&self) -> Arc<ReconciliationStore> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::types::SourceState;
    use rust_decimal_macros::dec;

    fn store() -> ReconciliationStore {
        let path =
            std::env::temp_dir().join(format!("tokensync_engine_{}.json", uuid::Uuid::new_v4()));
        let cache = Arc::new(FallbackCache::open(path).expect("cache open"));
        ReconciliationStore::new(cache, &StoreConfig::default())
    }

    #[test]
    fn tick_events_route_into_the_store() {
        let store = store();
        apply_feed_event(
            &store,
            FeedEvent::PriceTick(PricePoint {
                token_id: "tok-1".to_string(),
                ts_ms: 5,
                price: dec!(0.002),
                price_usd: dec!(0.3),
            }),
        );
        let snap = store.current_price("tok-1").expect("price present");
        assert_eq!(snap.state, SourceState::Live);
        assert_eq!(snap.point.price, dec!(0.002));
    }

    #[test]
    fn backoff_event_demotes_live_tokens() {
        let store = store();
        apply_feed_event(
            &store,
            FeedEvent::PriceTick(PricePoint {
                token_id: "tok-1".to_string(),
                ts_ms: 5,
                price: dec!(0.002),
                price_usd: dec!(0.3),
            }),
        );
        apply_feed_event(
            &store,
            FeedEvent::ConnectionChanged(ConnectionState::Backoff),
        );
        assert_eq!(store.source_state("tok-1"), SourceState::SnapshotBacked);
    }
}
