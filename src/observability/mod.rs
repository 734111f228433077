pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsRegistry, TimingGuard};
pub use tracing::{init_tracing, LogFormat};

#[cfg(test)]
pub use tracing::init_test_tracing;
