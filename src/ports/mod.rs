//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits and wire types) the usecases layer
//! requires from the outside world. Adapters implement these.
//!
//! Port categories:
//! - `stream`: Duplex channel frames and published events
//! - `value_source`: A live tier of the layered resolver
//! - `cache_store`: Keyed durable storage for the freshness cache

pub mod cache_store;
pub mod stream;
pub mod value_source;
