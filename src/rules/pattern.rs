use regex::{Regex, RegexBuilder};

use crate::domain::Predicate;
use crate::rules::traits::{ContentRule, RuleMeta, RuleResult};

/// Regex counting rule.
///
/// Counts non-overlapping matches (optionally filtered by a predicate)
/// and fires once the count reaches `min_occurrences`.
#[derive(Debug)]
pub struct PatternRule {
    meta: RuleMeta,
    regex: Regex,
    min_occurrences: usize,
    predicate: Option<Predicate>,
}

impl PatternRule {
    /// Compile a pattern rule.
    pub fn new(
        meta: RuleMeta,
        pattern: &str,
        case_insensitive: bool,
        min_occurrences: usize,
        predicate: Option<Predicate>,
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;

        Ok(PatternRule {
            meta,
            regex,
            min_occurrences: min_occurrences.max(1),
            predicate,
        })
    }

    /// Count the matches that pass the predicate.
    pub fn count_matches(&self, text: &str) -> usize {
        self.regex
            .find_iter(text)
            .filter(|m| match self.predicate {
                Some(predicate) => check_predicate(predicate, m.as_str()),
                None => true,
            })
            .count()
    }
}

impl ContentRule for PatternRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, text: &str) -> RuleResult {
        let count = self.count_matches(text);
        if count >= self.min_occurrences {
            RuleResult::hit(count)
        } else {
            RuleResult::miss()
        }
    }
}

fn check_predicate(predicate: Predicate, candidate: &str) -> bool {
    match predicate {
        Predicate::Luhn => luhn_valid(candidate),
        Predicate::SsnArea => ssn_structurally_valid(candidate),
    }
}

/// Luhn checksum over the digits of `candidate`, ignoring separators.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 12 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// SSN shape check: 9 digits, area not 000/666/9xx, group and serial non-zero.
fn ssn_structurally_valid(candidate: &str) -> bool {
    let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 9 {
        return false;
    }

    let area = &digits[0..3];
    let group = &digits[3..5];
    let serial = &digits[5..9];

    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}
