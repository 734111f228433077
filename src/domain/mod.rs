pub mod action;
pub mod decision;
pub mod policy;

pub use action::Action;
pub use decision::Decision;
pub use policy::{Direction, MatchDef, Policy, Predicate, RuleDef, Severity};
