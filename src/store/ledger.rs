//! Holder ledger
//!
//! Derived address -> quantity mapping per token, including the synthetic
//! liquidity-pool entry that absorbs the inverse side of every trade.
//! Quantities are exact decimals; total supply under management is
//! conserved by construction.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

use crate::types::{HolderEntry, TradeKind, LIQUIDITY_POOL_ADDRESS};

#[derive(Debug, Default)]
pub struct Ledger {
    holders: HashMap<String, Decimal>,
    pool_quantity: Decimal,
    total_supply: Decimal,
    dirty: bool,
}

impl Ledger {
    /// Seed the pool reserve and total supply from snapshot data.
    /// Later seeds only update the figures if no trades depend on them yet.
    pub fn seed(&mut self, total_supply: Decimal, pool_quantity: Decimal) {
        if self.dirty {
            return;
        }
        self.total_supply = total_supply;
        self.pool_quantity = pool_quantity;
    }

    pub fn balance_of(&self, address: &str) -> Decimal {
        self.holders.get(address).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn pool_quantity(&self) -> Decimal {
        self.pool_quantity
    }

    /// Apply one trade's deltas: actor and pool move in lockstep.
    ///
    /// The decreasing side clamps at zero — short ledgers come from
    /// feed-observed trades by actors whose balance we never saw, and
    /// are a data-source inconsistency, not a hard failure. Returns the
    /// quantity actually moved, so conservation holds unconditionally.
    pub fn apply_trade(&mut self, kind: TradeKind, address: &str, amount: Decimal) -> Decimal {
        self.dirty = true;
        match kind {
            TradeKind::Buy => {
                let moved = amount.min(self.pool_quantity);
                if moved < amount {
                    warn!(
                        address = %address,
                        requested = %amount,
                        available = %self.pool_quantity,
                        "Liquidity pool short on buy; clamping at zero"
                    );
                }
                self.pool_quantity -= moved;
                // A fully clamped buy moves nothing; never insert a
                // zero-quantity holder.
                if moved > Decimal::ZERO {
                    *self.holders.entry(address.to_string()).or_default() += moved;
                }
                moved
            }
            TradeKind::Sell => {
                let have = self.balance_of(address);
                let moved = amount.min(have);
                if moved < amount {
                    warn!(
                        address = %address,
                        requested = %amount,
                        available = %have,
                        "Holder balance short on sell; clamping at zero"
                    );
                }
                let remaining = have - moved;
                if remaining.is_zero() {
                    self.holders.remove(address);
                } else {
                    self.holders.insert(address.to_string(), remaining);
                }
                self.pool_quantity += moved;
                moved
            }
        }
    }

    /// Settlement correction from the external ledger: set an absolute
    /// quantity for an address, offsetting the pool so supply stays
    /// conserved.
    pub fn apply_correction(&mut self, address: &str, quantity: Decimal) {
        self.dirty = true;
        let before = self.balance_of(address);
        let delta = quantity - before;
        if quantity.is_zero() {
            self.holders.remove(address);
        } else {
            self.holders.insert(address.to_string(), quantity);
        }

        self.pool_quantity -= delta;
        if self.pool_quantity < Decimal::ZERO {
            warn!(
                address = %address,
                pool = %self.pool_quantity,
                "Settlement correction drove pool negative; clamping at zero"
            );
            self.pool_quantity = Decimal::ZERO;
        }
    }

    /// Sum of all holder quantities plus the pool
    pub fn total_under_management(&self) -> Decimal {
        self.holders.values().copied().sum::<Decimal>() + self.pool_quantity
    }

    /// Materialize holder entries valued at the given price, largest first
    pub fn entries(&self, price: Decimal) -> Vec<HolderEntry> {
        let supply = self.total_supply;
        let pct = |quantity: Decimal| {
            if supply.is_zero() {
                Decimal::ZERO
            } else {
                quantity / supply * Decimal::ONE_HUNDRED
            }
        };

        let mut entries: Vec<HolderEntry> = self
            .holders
            .iter()
            .map(|(address, &quantity)| HolderEntry {
                address: address.clone(),
                quantity,
                pct_of_supply: pct(quantity),
                value_at_price: quantity * price,
                is_pool: false,
            })
            .collect();

        entries.push(HolderEntry {
            address: LIQUIDITY_POOL_ADDRESS.to_string(),
            quantity: self.pool_quantity,
            pct_of_supply: pct(self.pool_quantity),
            value_at_price: self.pool_quantity * price,
            is_pool: true,
        });

        entries.sort_by(|a, b| b.quantity.cmp(&a.quantity));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded() -> Ledger {
        let mut ledger = Ledger::default();
        ledger.seed(dec!(800000000), dec!(800000000));
        ledger
    }

    #[test]
    fn buy_then_sell_conserves_supply() {
        let mut ledger = seeded();
        ledger.apply_trade(TradeKind::Buy, "0xa", dec!(1000));
        ledger.apply_trade(TradeKind::Buy, "0xb", dec!(2500));
        ledger.apply_trade(TradeKind::Sell, "0xa", dec!(400));
        assert_eq!(ledger.total_under_management(), dec!(800000000));
        assert_eq!(ledger.balance_of("0xa"), dec!(600));
    }

    #[test]
    fn sell_to_zero_removes_entry() {
        let mut ledger = seeded();
        ledger.apply_trade(TradeKind::Buy, "0xa", dec!(1000));
        ledger.apply_trade(TradeKind::Sell, "0xa", dec!(1000));
        assert_eq!(ledger.balance_of("0xa"), Decimal::ZERO);
        let entries = ledger.entries(dec!(0.001));
        assert!(entries.iter().all(|e| e.address != "0xa"));
    }

    #[test]
    fn observed_sell_from_unknown_actor_clamps_and_conserves() {
        let mut ledger = seeded();
        let moved = ledger.apply_trade(TradeKind::Sell, "0xghost", dec!(500));
        assert_eq!(moved, Decimal::ZERO);
        assert_eq!(ledger.total_under_management(), dec!(800000000));
    }

    #[test]
    fn fully_clamped_buy_inserts_no_holder_entry() {
        // Observed buy on a token whose pool we never saw: nothing moves,
        // and the actor must not appear as a zero-quantity holder.
        let mut ledger = Ledger::default();
        let moved = ledger.apply_trade(TradeKind::Buy, "0xghost", dec!(500));
        assert_eq!(moved, Decimal::ZERO);
        assert_eq!(ledger.balance_of("0xghost"), Decimal::ZERO);
        let entries = ledger.entries(dec!(0.001));
        assert!(entries.iter().all(|e| e.address != "0xghost"));
        assert!(entries.iter().all(|e| e.is_pool || !e.quantity.is_zero()));
    }

    #[test]
    fn reseed_refreshes_figures_until_a_trade_lands() {
        let mut ledger = Ledger::default();
        ledger.seed(dec!(1000), dec!(1000));
        ledger.seed(dec!(2000), dec!(1800));
        assert_eq!(ledger.pool_quantity(), dec!(1800));

        ledger.apply_trade(TradeKind::Buy, "0xa", dec!(100));
        ledger.seed(dec!(5000), dec!(5000));
        assert_eq!(ledger.pool_quantity(), dec!(1700));
        assert_eq!(ledger.total_under_management(), dec!(1800));
    }

    #[test]
    fn pool_clamps_at_zero_on_oversized_buy() {
        let mut ledger = Ledger::default();
        ledger.seed(dec!(1000), dec!(300));
        let moved = ledger.apply_trade(TradeKind::Buy, "0xa", dec!(500));
        assert_eq!(moved, dec!(300));
        assert_eq!(ledger.pool_quantity(), Decimal::ZERO);
        assert_eq!(ledger.total_under_management(), dec!(300));
    }

    #[test]
    fn entries_are_valued_at_given_price() {
        let mut ledger = seeded();
        ledger.apply_trade(TradeKind::Buy, "0xa", dec!(1000));
        let entries = ledger.entries(dec!(0.001));

        let actor = entries
            .iter()
            .find(|e| e.address == "0xa")
            .expect("actor entry present");
        assert_eq!(actor.value_at_price, dec!(1));

        let pool = entries.iter().find(|e| e.is_pool).expect("pool entry present");
        assert_eq!(pool.quantity, dec!(799999000));
    }

    #[test]
    fn correction_sets_absolute_quantity_against_pool() {
        let mut ledger = seeded();
        ledger.apply_trade(TradeKind::Buy, "0xa", dec!(1000));
        ledger.apply_correction("0xa", dec!(750));
        assert_eq!(ledger.balance_of("0xa"), dec!(750));
        assert_eq!(ledger.total_under_management(), dec!(800000000));
    }
}
