//! Value Source Adapters - Live Resolver Tiers
//!
//! - `http`: configurable REST endpoint (alternative and external tiers)
//! - `stream`: correlated indicator requests over the stream (primary tier)

pub mod http;
pub mod stream;

pub use http::{HttpSourceConfig, HttpValueSource};
pub use stream::StreamIndicatorSource;
