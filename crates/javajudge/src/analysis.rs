//! Source pattern checks declared alongside an exercise
//!
//! Exercises may require certain constructs (counted as literal occurrences)
//! and ban others (regular expressions). The result is informational and
//! never changes a verdict's overall status.

use std::collections::BTreeMap;

use lazy_regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractionRules {
    /// Literal snippet mapped to the number of occurrences expected
    #[serde(default)]
    pub required: BTreeMap<String, u32>,

    /// Regular expressions that should not match anywhere in the source
    #[serde(default)]
    pub banned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractionReport {
    /// Percentage of required occurrences found, shifted so 0 means
    /// "exactly as required" and -100 means "none found"
    pub score: f64,
    pub banned_found: Vec<String>,
}

#[derive(Debug, Error)]
#[error("invalid banned pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl AbstractionRules {
    /// Reject rules whose banned patterns do not compile
    pub fn validate(&self) -> Result<(), PatternError> {
        self.compiled_banned().map(|_| ())
    }

    fn compiled_banned(&self) -> Result<Vec<(String, Regex)>, PatternError> {
        self.banned
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|re| (pattern.clone(), re))
                    .map_err(|e| PatternError {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    /// Scan `source` against the rules
    pub fn check(&self, source: &str) -> Result<AbstractionReport, PatternError> {
        let required_total: u64 = self.required.values().map(|&n| u64::from(n)).sum();
        let found_total: u64 = self
            .required
            .keys()
            .filter(|literal| !literal.is_empty())
            .map(|literal| source.matches(literal.as_str()).count() as u64)
            .sum();

        let score = if required_total == 0 {
            0.0
        } else {
            (found_total as f64 / required_total as f64) * 100.0 - 100.0
        };

        let banned_found = self
            .compiled_banned()?
            .into_iter()
            .filter(|(_, re)| re.is_match(source))
            .map(|(pattern, _)| pattern)
            .collect();

        Ok(AbstractionReport {
            score,
            banned_found,
        })
    }
}
