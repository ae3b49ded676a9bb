//! WebSocket price/trade feed client
//!
//! Maintains one persistent connection, replays the watch set across
//! reconnects, and normalizes wire frames into [`FeedEvent`]s. Connection
//! failures are retried forever with full-jitter exponential backoff;
//! malformed frames are dropped and logged, never fatal.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::feed::{FeedCommand, FeedEvent, FeedHandle, ObservedTrade};
use crate::types::{now_ms, ConnectionState, PricePoint, TokenId, TradeKind};

/// Full-jitter exponential backoff: uniform in [0, min(cap, base * 2^attempt)]
fn backoff_with_jitter(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let capped_attempt = attempt.min(16);
    let ceiling = base_ms
        .saturating_mul(1u64 << capped_attempt)
        .min(cap_ms)
        .max(1);
    let ms = rand::thread_rng().gen_range(0..=ceiling);
    Duration::from_millis(ms)
}

/// Pick the timestamp for an inbound point.
///
/// The wire timestamp is trusted only when it is not in the future and
/// not older than the last point accepted for the token; otherwise the
/// local arrival time substitutes.
fn resolve_timestamp(wire_ts: Option<i64>, last_accepted: Option<i64>, arrival_ms: i64) -> i64 {
    match wire_ts {
        Some(ts) if ts <= arrival_ms && last_accepted.map_or(true, |last| ts >= last) => ts,
        _ => arrival_ms,
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Tick {
        token_id: TokenId,
        price: Decimal,
        price_usd: Decimal,
        #[serde(default)]
        ts: Option<i64>,
    },
    Trade {
        token_id: TokenId,
        side: String,
        amount: Decimal,
        price: Decimal,
        #[serde(default)]
        ts: Option<i64>,
        actor: String,
        #[serde(default)]
        actor_label: Option<String>,
    },
    Heartbeat {
        #[serde(default)]
        ts: Option<i64>,
    },
}

/// Streaming feed client. Owns the reconnect loop; driven by a
/// [`FeedHandle`] and consumed as a stream of [`FeedEvent`]s.
pub struct PriceFeedClient {
    ws_url: String,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    event_tx: mpsc::Sender<FeedEvent>,
    cmd_rx: mpsc::Receiver<FeedCommand>,
    watched: HashSet<TokenId>,
    last_accepted: HashMap<TokenId, i64>,
}

impl PriceFeedClient {
    /// Build a client plus its command handle and event stream
    pub fn new(config: &FeedConfig) -> (Self, FeedHandle, ReceiverStream<FeedEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);

        let client = Self {
            ws_url: config.ws_url.clone(),
            backoff_base_ms: config.backoff_base_ms,
            backoff_cap_ms: config.backoff_cap_ms,
            event_tx,
            cmd_rx,
            watched: HashSet::new(),
            last_accepted: HashMap::new(),
        };

        (client, FeedHandle::new(cmd_tx), ReceiverStream::new(event_rx))
    }

    /// Run until shutdown. Retries the connection indefinitely.
    pub async fn run(mut self) -> Result<()> {
        let mut reconnect_attempt: u32 = 0;

        loop {
            self.emit_state(ConnectionState::Connecting).await;
            info!(
                url = %self.ws_url,
                attempt = reconnect_attempt + 1,
                "Connecting to price feed WebSocket"
            );

            let (ws_stream, _) = match connect_async(&self.ws_url).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Failed to connect price feed WebSocket");
                    self.emit_state(ConnectionState::Backoff).await;
                    reconnect_attempt = reconnect_attempt.saturating_add(1);
                    if !self.backoff_sleep(reconnect_attempt).await {
                        self.emit_state(ConnectionState::Disconnected).await;
                        return Ok(());
                    }
                    continue;
                }
            };

            reconnect_attempt = 0;
            let (mut write, mut read) = ws_stream.split();

            // Replay the accumulated watch set before trusting the connection.
            let replay: Vec<TokenId> = self.watched.iter().cloned().collect();
            let mut subscribe_failed = false;
            for token_id in &replay {
                if let Err(e) = send_watch_frame(&mut write, token_id, true).await {
                    warn!(error = %e, token_id = %token_id, "Failed to replay watch after reconnect");
                    subscribe_failed = true;
                    break;
                }
            }
            if subscribe_failed {
                self.emit_state(ConnectionState::Backoff).await;
                reconnect_attempt = reconnect_attempt.saturating_add(1);
                if !self.backoff_sleep(reconnect_attempt).await {
                    self.emit_state(ConnectionState::Disconnected).await;
                    return Ok(());
                }
                continue;
            }

            info!(watched = self.watched.len(), "Price feed connected");
            self.emit_state(ConnectionState::Connected).await;

            let reconnect_reason: &'static str = loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = self.handle_frame(&text).await {
                                    warn!(error = %e, "Dropping malformed feed frame");
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Price feed closed by server");
                                break "remote_close";
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Price feed stream error");
                                break "stream_error";
                            }
                            None => {
                                info!("Price feed stream ended");
                                break "stream_ended";
                            }
                            _ => {}
                        }
                    }

                    cmd = self.cmd_rx.recv() => {
                        match cmd {
                            Some(FeedCommand::Watch(token_id)) => {
                                // Idempotent: only first watch hits the wire.
                                if self.watched.insert(token_id.clone()) {
                                    if let Err(e) = send_watch_frame(&mut write, &token_id, true).await {
                                        warn!(error = %e, token_id = %token_id, "Watch frame send failed");
                                        break "watch_send_failed";
                                    }
                                }
                            }
                            Some(FeedCommand::Unwatch(token_id)) => {
                                if self.watched.remove(&token_id) {
                                    if let Err(e) = send_watch_frame(&mut write, &token_id, false).await {
                                        warn!(error = %e, token_id = %token_id, "Unwatch frame send failed");
                                        break "unwatch_send_failed";
                                    }
                                }
                            }
                            Some(FeedCommand::Shutdown) | None => {
                                info!("Shutting down price feed client");
                                let _ = write.send(Message::Close(None)).await;
                                self.emit_state(ConnectionState::Disconnected).await;
                                return Ok(());
                            }
                        }
                    }
                }
            };

            self.emit_state(ConnectionState::Backoff).await;
            reconnect_attempt = reconnect_attempt.saturating_add(1);
            let delay =
                backoff_with_jitter(reconnect_attempt, self.backoff_base_ms, self.backoff_cap_ms);
            warn!(
                reason = reconnect_reason,
                attempt = reconnect_attempt,
                delay_ms = delay.as_millis() as u64,
                "Price feed reconnect scheduled"
            );
            if !self.sleep_draining_commands(delay).await {
                self.emit_state(ConnectionState::Disconnected).await;
                return Ok(());
            }
        }
    }

    async fn backoff_sleep(&mut self, attempt: u32) -> bool {
        let delay = backoff_with_jitter(attempt, self.backoff_base_ms, self.backoff_cap_ms);
        debug!(delay_ms = delay.as_millis() as u64, "Feed backoff");
        self.sleep_draining_commands(delay).await
    }

    /// Sleep through backoff while still absorbing watch-set mutations,
    /// so they are replayed on the next connect instead of dropped.
    /// Returns false on shutdown.
    async fn sleep_draining_commands(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(FeedCommand::Watch(token_id)) => {
                            self.watched.insert(token_id);
                        }
                        Some(FeedCommand::Unwatch(token_id)) => {
                            self.watched.remove(&token_id);
                        }
                        Some(FeedCommand::Shutdown) | None => return false,
                    }
                }
            }
        }
    }

    async fn emit_state(&self, state: ConnectionState) {
        let _ = self.event_tx.send(FeedEvent::ConnectionChanged(state)).await;
    }

    /// Parse one inbound frame and emit the normalized event
    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let arrival = now_ms();
        let frame: WireFrame = serde_json::from_str(text).context("unparseable feed frame")?;

        match frame {
            WireFrame::Tick {
                token_id,
                price,
                price_usd,
                ts,
            } => {
                let ts_ms =
                    resolve_timestamp(ts, self.last_accepted.get(&token_id).copied(), arrival);
                self.last_accepted.insert(token_id.clone(), ts_ms);

                let point = PricePoint {
                    token_id,
                    ts_ms,
                    price,
                    price_usd,
                };
                let _ = self.event_tx.send(FeedEvent::PriceTick(point)).await;
            }
            WireFrame::Trade {
                token_id,
                side,
                amount,
                price,
                ts,
                actor,
                actor_label,
            } => {
                let kind = TradeKind::from_str(&side)
                    .with_context(|| format!("unknown trade side: {side}"))?;
                let ts_ms =
                    resolve_timestamp(ts, self.last_accepted.get(&token_id).copied(), arrival);

                let trade = ObservedTrade {
                    token_id,
                    kind,
                    amount,
                    price,
                    ts_ms,
                    actor_address: actor,
                    actor_label: actor_label.unwrap_or_default(),
                };
                let _ = self.event_tx.send(FeedEvent::TradeObserved(trade)).await;
            }
            WireFrame::Heartbeat { .. } => {
                debug!("Feed heartbeat");
            }
        }

        Ok(())
    }
}

async fn send_watch_frame<S>(write: &mut S, token_id: &str, watch: bool) -> Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let op = if watch { "watch" } else { "unwatch" };
    let msg = serde_json::json!({ "op": op, "token_id": token_id });
    write
        .send(Message::Text(msg.to_string()))
        .await
        .context("watch frame send failed")?;
    Ok(())
}
