//! Domain Suffix Set

use std::collections::HashSet;
use std::path::Path;

use super::types::{read_rule_lines, RuleError};

/// Static set of domain suffixes.
///
/// Callers pass lower-case names; no case folding happens here.
#[derive(Debug, Clone, Default)]
pub struct DomainSuffixSet {
    rules: HashSet<String>,
}

impl DomainSuffixSet {
    /// Build a set from rule lines, skipping blanks
    pub fn load<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self { rules }
    }

    /// Build a set from a rule file. An empty file is a load failure.
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let set = Self::load(read_rule_lines(path)?);
        if set.is_empty() {
            return Err(RuleError::Empty {
                source: path.display().to_string(),
            });
        }
        Ok(set)
    }

    /// True when a suffix of `domain` with at least two labels is in the set
    pub fn contains(&self, domain: &str) -> bool {
        let labels: Vec<&str> = domain.split('.').collect();
        (2..=labels.len()).any(|n| {
            let suffix = labels[labels.len() - n..].join(".");
            self.rules.contains(&suffix)
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
