//! TokenSync Library
//!
//! Real-time price oracle and trade-synchronization engine: reconciles a
//! streaming feed, periodic REST snapshots and a durable fallback cache
//! into one canonical per-token view, and applies trades optimistically
//! against it.

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod feed;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod types;

pub use engine::Engine;
pub use errors::{FetchError, TradeError};

/// Initialize tracing with env-filter (RUST_LOG) and sane defaults
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
