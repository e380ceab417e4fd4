//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSocket, HTTP, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `stream`: WebSocket transport actor driving the stream session
//! - `sources`: Live resolver tiers (REST endpoints, stream requests)
//! - `persistence`: Freshness cache backing stores
//! - `metrics`: Prometheus metrics export and health checks

pub mod metrics;
pub mod persistence;
pub mod sources;
pub mod stream;
