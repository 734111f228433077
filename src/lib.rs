pub mod api;
pub mod audit;
pub mod config;
pub mod domain;
pub mod engine;
pub mod gateway;
pub mod observability;
pub mod policy;
pub mod resilience;
pub mod rules;
pub mod sinks;
pub mod telemetry;

pub use audit::{AuditChain, AuditRecord, VerifyReport};
pub use config::{Cli, Settings};
pub use domain::{Action, Decision, Direction};
pub use engine::{DecisionEngine, ShadowPolicy};
pub use gateway::{DecisionRequest, DecisionResponse, Gateway, GatewayError};
pub use rules::RuleSet;
