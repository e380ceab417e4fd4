//! Use Cases Layer - Application Logic Orchestration
//!
//! Coordinates domain state with port implementations.
//!
//! Use cases:
//! - `stream_session`: Connection state machine, subscription replay, heartbeat
//! - `correlator`: Request/response matching over the duplex channel
//! - `freshness_cache`: Last-known-good values with TTL and staleness tiers
//! - `resolver`: Ordered fallback across sources, cache and emergency table
//! - `market_data`: Consumer facade preferring live pushes

pub mod correlator;
pub mod freshness_cache;
pub mod market_data;
pub mod resolver;
pub mod stream_session;

pub use freshness_cache::{CachePolicy, FreshnessCache};
pub use market_data::MarketDataService;
pub use resolver::LayeredResolver;
pub use stream_session::{SessionAction, SessionConfig, StreamSession};
