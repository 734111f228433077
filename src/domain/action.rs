use serde::{Deserialize, Serialize};
use std::fmt;

/// Enforcement action with severity ordering.
///
/// Actions are ordered from least to most severe. When multiple rules
/// fire, the most severe action wins.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Action {
    /// Request passes untouched
    #[default]
    Allow = 0,
    /// Request passes but is marked for review
    Flag = 1,
    /// Request is refused
    Block = 2,
}

impl Action {
    /// Returns the more severe of two actions.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }

    #[inline]
    pub fn is_allow(&self) -> bool {
        *self == Action::Allow
    }

    /// Returns true for actions that raise an alert (flag and block).
    #[inline]
    pub fn is_alertable(&self) -> bool {
        matches!(self, Action::Flag | Action::Block)
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Flag => "flag",
            Action::Block => "block",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Action::Allow),
            "flag" => Some(Action::Flag),
            "block" => Some(Action::Block),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
