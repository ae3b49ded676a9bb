//! Price-series buffers and the snapshot/live merge

use std::collections::VecDeque;
use tracing::warn;

use crate::types::PricePoint;

/// Append a live tick, keeping the buffer bounded and timestamps unique.
///
/// Equal timestamps replace the previous point (latest arrival wins);
/// a regressing timestamp is dropped — the feed client's arrival guard
/// makes that unreachable in practice, so it signals a source bug.
pub fn push_live(buffer: &mut VecDeque<PricePoint>, point: PricePoint, cap: usize) {
    if let Some(last) = buffer.back_mut() {
        if point.ts_ms == last.ts_ms {
            *last = point;
            return;
        }
        if point.ts_ms < last.ts_ms {
            warn!(
                token_id = %point.token_id,
                ts_ms = point.ts_ms,
                last_ts_ms = last.ts_ms,
                "Dropping out-of-order live tick"
            );
            return;
        }
    }

    buffer.push_back(point);
    while buffer.len() > cap {
        buffer.pop_front();
    }
}

/// Merge a snapshot series with the live buffer.
///
/// Takes the snapshot prefix strictly older than the live buffer's
/// oldest point, then appends the whole live buffer. The snapshot is
/// authoritative for everything older than the live window; the live
/// window is authoritative for its own range. O(len(snapshot) + len(live)),
/// no per-point dedupe scan needed.
pub fn merge_series(snapshot: &[PricePoint], live: &VecDeque<PricePoint>) -> Vec<PricePoint> {
    let Some(live_oldest) = live.front() else {
        return snapshot.to_vec();
    };

    let mut merged: Vec<PricePoint> = snapshot
        .iter()
        .take_while(|p| p.ts_ms < live_oldest.ts_ms)
        .cloned()
        .collect();
    merged.extend(live.iter().cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn point(ts_ms: i64, price: Decimal) -> PricePoint {
        PricePoint {
            token_id: "tok-1".to_string(),
            ts_ms,
            price,
            price_usd: price * dec!(100),
        }
    }

    #[test]
    fn merge_with_empty_live_returns_snapshot_unmodified() {
        let snapshot = vec![point(1, dec!(0.001)), point(2, dec!(0.002))];
        let merged = merge_series(&snapshot, &VecDeque::new());
        assert_eq!(merged, snapshot);
    }

    #[test]
    fn merge_is_exactly_prefix_plus_live() {
        let snapshot = vec![point(1, dec!(1)), point(2, dec!(2)), point(3, dec!(3))];
        let live: VecDeque<_> = [point(3, dec!(30)), point(4, dec!(40))].into_iter().collect();

        let merged = merge_series(&snapshot, &live);

        let timestamps: Vec<i64> = merged.iter().map(|p| p.ts_ms).collect();
        assert_eq!(timestamps, vec![1, 2, 3, 4]);
        // Live wins at the seam.
        assert_eq!(merged[2].price, dec!(30));
    }

    #[test]
    fn merged_timestamps_strictly_increase() {
        let snapshot: Vec<_> = (0..50).map(|i| point(i * 10, dec!(1))).collect();
        let mut live = VecDeque::new();
        for i in 30..80 {
            push_live(&mut live, point(i * 10 + 5, dec!(2)), 100);
        }

        let merged = merge_series(&snapshot, &live);
        for pair in merged.windows(2) {
            assert!(pair[0].ts_ms < pair[1].ts_ms);
        }
    }

    #[test]
    fn push_live_evicts_oldest_at_cap() {
        let mut buffer = VecDeque::new();
        for i in 0..105 {
            push_live(&mut buffer, point(i, dec!(1)), 100);
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.front().map(|p| p.ts_ms), Some(5));
        assert_eq!(buffer.back().map(|p| p.ts_ms), Some(104));
    }

    #[test]
    fn push_live_equal_timestamp_latest_wins() {
        let mut buffer = VecDeque::new();
        push_live(&mut buffer, point(10, dec!(1)), 100);
        push_live(&mut buffer, point(10, dec!(2)), 100);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].price, dec!(2));
    }

    #[test]
    fn push_live_drops_regressing_timestamp() {
        let mut buffer = VecDeque::new();
        push_live(&mut buffer, point(10, dec!(1)), 100);
        push_live(&mut buffer, point(5, dec!(2)), 100);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].ts_ms, 10);
    }
}
