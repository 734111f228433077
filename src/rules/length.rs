use crate::rules::traits::{ContentRule, RuleMeta, RuleResult};

/// Fires when the text is longer than `max_length` characters.
#[derive(Debug)]
pub struct LengthRule {
    meta: RuleMeta,
    max_length: usize,
}

impl LengthRule {
    pub fn new(meta: RuleMeta, max_length: usize) -> Self {
        LengthRule { meta, max_length }
    }
}

impl ContentRule for LengthRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, text: &str) -> RuleResult {
        if text.chars().count() > self.max_length {
            RuleResult::hit(1)
        } else {
            RuleResult::miss()
        }
    }
}
