//! Domain layer - Market data types and pure state.
//!
//! Connection state machine, subscription bookkeeping, circuit breakers,
//! the emergency table and the tagged resolution types. Nothing here does
//! I/O (hexagonal architecture inner ring).

pub mod circuit_breaker;
pub mod connection;
pub mod emergency;
pub mod market;
pub mod subscription;

// Re-export core types for convenience
pub use circuit_breaker::{BreakerPolicy, BreakerSnapshot, CircuitBreakerRegistry};
pub use connection::{Connection, ConnectionState};
pub use emergency::EmergencyTable;
pub use market::{
    DataType, Freshness, OwnerContext, Payload, Resolution, ResolveRequest, ResolvedValue,
    ResponseKind, SourceTag, SourceTier, Symbol, SymbolSnapshot, TierAttempt, TierOutcome,
};
pub use subscription::{Subscription, SubscriptionKey, SubscriptionRegistry};
