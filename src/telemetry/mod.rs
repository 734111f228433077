pub mod aggregator;
pub mod alert;
pub mod event;

pub use aggregator::{CounterEntry, CounterSnapshot, FlushReport, TelemetryAggregator, TelemetryHandle};
pub use alert::{AlertDispatcher, AlertError, AlertOutcome, AlertSettings};
pub use event::{CounterKey, TelemetryEvent};
