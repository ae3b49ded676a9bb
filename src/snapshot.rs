//! REST snapshot fetcher
//!
//! Pulls current token stats and historical price series from the
//! platform's data API. Stateless: retries and fallback policy belong
//! to the caller.

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::FetchError;
use crate::types::{now_ms, Interval, PricePoint, TokenId, TokenStats};

#[derive(Debug, Deserialize)]
struct StatsResponse {
    price: Decimal,
    price_usd: Decimal,
    #[serde(default)]
    market_cap: Option<Decimal>,
    #[serde(default)]
    volume_24h: Option<Decimal>,
    #[serde(default)]
    pool_quantity: Option<Decimal>,
    #[serde(default)]
    total_supply: Option<Decimal>,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    points: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    ts: i64,
    price: Decimal,
    price_usd: Decimal,
}

/// Snapshot API client
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl SnapshotFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch current price, market cap, volume and pool stats for a token
    pub async fn fetch_current(&self, token_id: &str) -> Result<TokenStats, FetchError> {
        let url = format!("{}/tokens/{}", self.base_url, token_id);
        debug!(token_id = %token_id, "Fetching current token stats");

        let response = self.client.get(&url).send().await?;
        let response = check_status(response)?;

        let body: StatsResponse = response.json().await.map_err(|e| {
            FetchError::InvalidResponse(format!("stats body for {token_id}: {e}"))
        })?;

        Ok(TokenStats {
            token_id: token_id.to_string(),
            ts_ms: body.ts.unwrap_or_else(now_ms),
            price: body.price,
            price_usd: body.price_usd,
            market_cap: body.market_cap,
            volume_24h: body.volume_24h,
            pool_quantity: body.pool_quantity,
            total_supply: body.total_supply,
        })
    }

    /// Fetch the historical price series for one interval
    pub async fn fetch_history(
        &self,
        token_id: &str,
        interval: Interval,
    ) -> Result<Vec<PricePoint>, FetchError> {
        let url = format!(
            "{}/tokens/{}/history?interval={}",
            self.base_url,
            token_id,
            interval.api_label()
        );
        debug!(token_id = %token_id, interval = %interval, "Fetching price history");

        let response = self.client.get(&url).send().await?;
        let response = check_status(response)?;

        let body: HistoryResponse = response.json().await.map_err(|e| {
            FetchError::InvalidResponse(format!("history body for {token_id}: {e}"))
        })?;

        let token_id: TokenId = token_id.to_string();
        let mut points: Vec<PricePoint> = body
            .points
            .into_iter()
            .map(|p| PricePoint {
                token_id: token_id.clone(),
                ts_ms: p.ts,
                price: p.price,
                price_usd: p.price_usd,
            })
            .collect();

        // Upstream is expected to be ordered, but normalize anyway.
        points.sort_by_key(|p| p.ts_ms);
        points.dedup_by_key(|p| p.ts_ms);

        Ok(points)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }
    if !status.is_success() {
        return Err(FetchError::Network(format!("upstream returned {status}")));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stats_response_parses_optional_fields() {
        let body: StatsResponse = serde_json::from_value(serde_json::json!({
            "price": "0.001",
            "price_usd": "0.15",
            "market_cap": "150000",
            "pool_quantity": "800000000",
            "ts": 1700000000000i64
        }))
        .expect("stats body should parse");

        assert_eq!(body.price, dec!(0.001));
        assert_eq!(body.market_cap, Some(dec!(150000)));
        assert_eq!(body.volume_24h, None);
        assert_eq!(body.pool_quantity, Some(dec!(800000000)));
    }

    #[test]
    fn history_response_parses_points() {
        let body: HistoryResponse = serde_json::from_value(serde_json::json!({
            "points": [
                { "ts": 1, "price": "0.001", "price_usd": "0.15" },
                { "ts": 2, "price": "0.002", "price_usd": "0.30" }
            ]
        }))
        .expect("history body should parse");

        assert_eq!(body.points.len(), 2);
        assert_eq!(body.points[1].price, dec!(0.002));
    }

    #[test]
    fn malformed_stats_body_is_invalid_response() {
        let parsed: Result<StatsResponse, _> =
            serde_json::from_value(serde_json::json!({ "price": "0.001" }));
        assert!(parsed.is_err());
    }
}
