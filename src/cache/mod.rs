//! Offline resource cache.
//!
//! A cache-first controller over versioned cache generations:
//! - Install fetches a fixed manifest and stores it atomically
//! - Fetch serves from the active generation, falling through to the network
//! - Activate removes every generation but the current one
//! - A `skipWaiting` message forces early activation

mod controller;
mod fetcher;
mod generation;
mod storage;
mod traits;

pub use controller::{Activation, CacheController, MessageOutcome, ServiceWorker, SKIP_WAITING};
pub use fetcher::HttpFetcher;
pub use generation::GenerationState;
pub use storage::{CacheStorage, SqliteStorage};
