//! Trade executor
//!
//! Validates a trade intent against the reconciled price and the holder
//! ledger, then applies it optimistically inside the token's
//! single-writer critical section. Settlement happens elsewhere; a later
//! correction event may adjust the ledger (see
//! [`ReconciliationStore::apply_correction`]).

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::errors::TradeError;
use crate::store::ReconciliationStore;
use crate::types::{now_ms, Actor, SourceState, Trade, TradeKind, TradeSource};

pub struct TradeExecutor {
    store: Arc<ReconciliationStore>,
}

impl TradeExecutor {
    pub fn new(store: Arc<ReconciliationStore>) -> Self {
        Self { store }
    }

    /// Execute a trade at the current reconciled price.
    ///
    /// Execution price is always "now" — earlier quotes are indicative
    /// only. All preconditions are checked before any mutation; a failed
    /// call leaves the ledger untouched. Calls for the same token are
    /// serialized; different tokens proceed independently.
    pub fn execute(
        &self,
        token_id: &str,
        kind: TradeKind,
        amount: Decimal,
        actor: &Actor,
    ) -> Result<Trade, TradeError> {
        let ring_cap = self.store.trade_ring_cap();

        self.store.with_token(token_id, |state| {
            if amount <= Decimal::ZERO {
                return Err(TradeError::InvalidAmount(amount));
            }

            // A cold token may still execute off the durable cache.
            state.promote_from_cache(self.store.cache());
            let price = match (&state.current, state.state) {
                (Some(point), s) if s != SourceState::Cold => point.price,
                _ => return Err(TradeError::PriceUnavailable),
            };

            match kind {
                TradeKind::Buy => {
                    let available = state.ledger.pool_quantity();
                    if available < amount {
                        return Err(TradeError::InsufficientLiquidity {
                            available,
                            requested: amount,
                        });
                    }
                }
                TradeKind::Sell => {
                    let have = state.ledger.balance_of(&actor.address);
                    if have < amount {
                        return Err(TradeError::InsufficientBalance { have, need: amount });
                    }
                }
            }

            // Preconditions hold; the full amount moves.
            let moved = state.ledger.apply_trade(kind, &actor.address, amount);
            debug_assert_eq!(moved, amount);

            let ts_ms = now_ms();
            let trade = Trade {
                id: Trade::make_id(TradeSource::Executed, ts_ms),
                token_id: token_id.to_string(),
                kind,
                amount,
                price,
                total_value: amount * price,
                ts_ms,
                actor_address: actor.address.clone(),
                actor_label: actor.label.clone(),
                source: TradeSource::Executed,
            };
            state.record_trade(trade.clone(), ring_cap);

            info!(
                token_id = %token_id,
                kind = %kind,
                amount = %amount,
                price = %price,
                actor = %actor.address,
                "Trade executed"
            );
            Ok(trade)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FallbackCache;
    use crate::config::StoreConfig;
    use crate::types::{PricePoint, TokenStats};
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<ReconciliationStore>, TradeExecutor) {
        let path =
            std::env::temp_dir().join(format!("tokensync_exec_{}.json", uuid::Uuid::new_v4()));
        let cache = Arc::new(FallbackCache::open(path).expect("cache open"));
        let store = Arc::new(ReconciliationStore::new(cache, &StoreConfig::default()));
        let executor = TradeExecutor::new(store.clone());
        (store, executor)
    }

    fn prime(store: &ReconciliationStore, price: Decimal, pool: Decimal) {
        store.apply_stats(TokenStats {
            token_id: "tok-1".to_string(),
            ts_ms: 1,
            price,
            price_usd: price * dec!(150),
            market_cap: None,
            volume_24h: None,
            pool_quantity: Some(pool),
            total_supply: Some(pool),
        });
    }

    #[test]
    fn buy_executes_at_current_price() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(800000000));

        let actor = Actor::new("0xa", "alice");
        let trade = executor
            .execute("tok-1", TradeKind::Buy, dec!(1000), &actor)
            .expect("buy should succeed");

        assert_eq!(trade.price, dec!(0.001));
        assert_eq!(trade.total_value, dec!(1.000));
        assert!(trade.id.starts_with("exec-"));

        let holders = store.holders("tok-1");
        let alice = holders.iter().find(|h| h.address == "0xa").expect("alice");
        assert_eq!(alice.quantity, dec!(1000));
        let pool = holders.iter().find(|h| h.is_pool).expect("pool");
        assert_eq!(pool.quantity, dec!(799999000));
    }

    #[test]
    fn cold_token_fails_with_price_unavailable() {
        let (_store, executor) = setup();
        let err = executor
            .execute("tok-1", TradeKind::Buy, dec!(10), &Actor::new("0xa", ""))
            .expect_err("cold token must fail");
        assert_eq!(err, TradeError::PriceUnavailable);
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(1000));
        for bad in [dec!(0), dec!(-5)] {
            let err = executor
                .execute("tok-1", TradeKind::Buy, bad, &Actor::new("0xa", ""))
                .expect_err("non-positive amount must fail");
            assert!(matches!(err, TradeError::InvalidAmount(_)));
        }
    }

    #[test]
    fn oversell_fails_and_mutates_nothing() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(800000000));
        let actor = Actor::new("0xa", "alice");
        executor
            .execute("tok-1", TradeKind::Buy, dec!(1000), &actor)
            .expect("buy should succeed");

        let before = store.holders("tok-1");
        let err = executor
            .execute("tok-1", TradeKind::Sell, dec!(1500), &actor)
            .expect_err("oversell must fail");
        assert_eq!(
            err,
            TradeError::InsufficientBalance {
                have: dec!(1000),
                need: dec!(1500),
            }
        );
        assert_eq!(store.holders("tok-1"), before);
    }

    #[test]
    fn buy_beyond_pool_fails_with_insufficient_liquidity() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(500));
        let err = executor
            .execute("tok-1", TradeKind::Buy, dec!(501), &Actor::new("0xa", ""))
            .expect_err("buy beyond pool must fail");
        assert!(matches!(err, TradeError::InsufficientLiquidity { .. }));
    }

    #[test]
    fn supply_is_conserved_across_trade_sequences() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(800000000));
        let alice = Actor::new("0xa", "alice");
        let bob = Actor::new("0xb", "bob");

        let _ = executor.execute("tok-1", TradeKind::Buy, dec!(1000), &alice);
        let _ = executor.execute("tok-1", TradeKind::Buy, dec!(2500.5), &bob);
        let _ = executor.execute("tok-1", TradeKind::Sell, dec!(999), &alice);
        let _ = executor.execute("tok-1", TradeKind::Sell, dec!(9999), &bob); // fails
        let _ = executor.execute("tok-1", TradeKind::Sell, dec!(1), &alice);

        let total: Decimal = store.holders("tok-1").iter().map(|h| h.quantity).sum();
        assert_eq!(total, dec!(800000000));
    }

    #[test]
    fn executed_trades_land_in_the_recent_ring() {
        let (store, executor) = setup();
        prime(&store, dec!(0.001), dec!(800000000));
        let actor = Actor::new("0xa", "alice");
        executor
            .execute("tok-1", TradeKind::Buy, dec!(10), &actor)
            .expect("buy should succeed");
        executor
            .execute("tok-1", TradeKind::Sell, dec!(4), &actor)
            .expect("sell should succeed");

        let trades = store.recent_trades("tok-1");
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].kind, TradeKind::Sell);
        assert_eq!(trades[1].kind, TradeKind::Buy);
    }
}
