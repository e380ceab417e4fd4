//! Stream Adapter - WebSocket Transport for the Market-Data Channel

pub mod client;

pub use client::{StreamClient, StreamClientConfig, StreamHandle};
