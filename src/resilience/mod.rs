//! Isolation of decisioning from downstream outages.

pub mod breaker;
pub mod dead_letter;
pub mod retry;
pub mod sink;

pub use breaker::{
    BreakerConfig, CallError, CircuitBreaker, CircuitBreakerManager, CircuitSnapshot, CircuitState,
};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterError, DeadLetterStore, FileDeadLetterStore, MemoryDeadLetterStore,
};
pub use retry::RetryPolicy;
pub use sink::{Delivery, ReplayReport, ResilientSink, CIRCUIT_OPEN_REASON};
