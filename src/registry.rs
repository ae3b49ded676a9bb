//! Subscription registry
//!
//! Reference-counts watchers per token so the underlying feed only sees
//! one watch/unwatch per token no matter how many consumers care about
//! it at once.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::feed::StreamingFeed;
use crate::types::TokenId;

pub struct SubscriptionRegistry {
    feed: Arc<dyn StreamingFeed>,
    counts: Mutex<HashMap<TokenId, usize>>,
}

impl SubscriptionRegistry {
    pub fn new(feed: Arc<dyn StreamingFeed>) -> Self {
        Self {
            feed,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a watcher. The feed is only told on the 0 -> 1 transition.
    pub async fn watch(&self, token_id: &str) -> Result<()> {
        let first = {
            let mut counts = self.counts.lock().expect("registry lock poisoned");
            let count = counts.entry(token_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            debug!(token_id = %token_id, "First watcher; subscribing feed");
            self.feed.watch(token_id).await?;
        }
        Ok(())
    }

    /// Drop a watcher. The feed is only told on the 1 -> 0 transition.
    /// An unmatched unwatch is a no-op; the count never goes negative.
    pub async fn unwatch(&self, token_id: &str) -> Result<()> {
        let last = {
            let mut counts = self.counts.lock().expect("registry lock poisoned");
            match counts.get_mut(token_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    counts.remove(token_id);
                    true
                }
                None => {
                    warn!(token_id = %token_id, "Unwatch without matching watch");
                    false
                }
            }
        };

        if last {
            debug!(token_id = %token_id, "Last watcher gone; unsubscribing feed");
            self.feed.unwatch(token_id).await?;
        }
        Ok(())
    }

    /// Tokens with at least one watcher
    pub fn watched_tokens(&self) -> Vec<TokenId> {
        self.counts
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Records every call that actually reaches the feed
    #[derive(Default)]
    struct RecordingFeed {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamingFeed for RecordingFeed {
        async fn watch(&self, token_id: &str) -> Result<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("watch:{token_id}"));
            Ok(())
        }

        async fn unwatch(&self, token_id: &str) -> Result<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("unwatch:{token_id}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn n_watches_n_unwatches_touch_feed_once_each_way() {
        let feed = Arc::new(RecordingFeed::default());
        let registry = SubscriptionRegistry::new(feed.clone());

        for _ in 0..5 {
            registry.watch("tok-1").await.expect("watch");
        }
        for _ in 0..5 {
            registry.unwatch("tok-1").await.expect("unwatch");
        }

        let calls = feed.calls.lock().expect("calls lock").clone();
        assert_eq!(calls, vec!["watch:tok-1", "unwatch:tok-1"]);
    }

    #[tokio::test]
    async fn unmatched_unwatch_is_a_no_op() {
        let feed = Arc::new(RecordingFeed::default());
        let registry = SubscriptionRegistry::new(feed.clone());

        registry.unwatch("tok-1").await.expect("unwatch");
        assert!(feed.calls.lock().expect("calls lock").is_empty());

        // Count did not go negative: next watch still reaches the feed.
        registry.watch("tok-1").await.expect("watch");
        assert_eq!(
            feed.calls.lock().expect("calls lock").clone(),
            vec!["watch:tok-1"]
        );
    }

    #[tokio::test]
    async fn independent_tokens_are_independent() {
        let feed = Arc::new(RecordingFeed::default());
        let registry = SubscriptionRegistry::new(feed.clone());

        registry.watch("tok-1").await.expect("watch");
        registry.watch("tok-2").await.expect("watch");
        registry.unwatch("tok-1").await.expect("unwatch");

        let mut watched = registry.watched_tokens();
        watched.sort();
        assert_eq!(watched, vec!["tok-2".to_string()]);
    }
}
