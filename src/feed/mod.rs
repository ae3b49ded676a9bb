//! Streaming feed client
//!
//! Persistent push channel for price ticks and observed trades, with
//! automatic reconnection. The reconciliation store treats this as the
//! best-effort live source; every other path is a fallback.

pub mod ws;

pub use ws::PriceFeedClient;

use crate::types::{ConnectionState, PricePoint, TokenId, TradeKind};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::warn;

/// A trade seen on the feed, executed by some other actor
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedTrade {
    pub token_id: TokenId,
    pub kind: TradeKind,
    pub amount: Decimal,
    pub price: Decimal,
    pub ts_ms: i64,
    pub actor_address: String,
    pub actor_label: String,
}

/// Events produced by the streaming feed.
///
/// The sequence never terminates on its own; shutdown closes it.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// New price tick for a watched token
    PriceTick(PricePoint),
    /// Trade executed by another actor, observed on the wire
    TradeObserved(ObservedTrade),
    /// Connectivity transition
    ConnectionChanged(ConnectionState),
}

/// Commands accepted by the feed client in any connection state
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Watch(TokenId),
    Unwatch(TokenId),
    Shutdown,
}

/// Watch/unwatch seam over the streaming feed.
///
/// Implemented by [`FeedHandle`] in production and by scripted doubles
/// in tests.
#[async_trait]
pub trait StreamingFeed: Send + Sync {
    /// Start watching a token. Idempotent.
    async fn watch(&self, token_id: &str) -> Result<()>;

    /// Stop watching a token. Idempotent.
    async fn unwatch(&self, token_id: &str) -> Result<()>;
}

/// Cheap clonable handle driving a running [`PriceFeedClient`]
#[derive(Debug, Clone)]
pub struct FeedHandle {
    cmd_tx: mpsc::Sender<FeedCommand>,
}

impl FeedHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<FeedCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Request a full disconnect and end of the event stream
    pub async fn shutdown(&self) {
        if self.cmd_tx.send(FeedCommand::Shutdown).await.is_err() {
            warn!("feed client already stopped");
        }
    }
}

#[async_trait]
impl StreamingFeed for FeedHandle {
    async fn watch(&self, token_id: &str) -> Result<()> {
        self.cmd_tx
            .send(FeedCommand::Watch(token_id.to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("feed client stopped"))
    }

    async fn unwatch(&self, token_id: &str) -> Result<()> {
        self.cmd_tx
            .send(FeedCommand::Unwatch(token_id.to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("feed client stopped"))
    }
}
