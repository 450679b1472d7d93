//! Sorting remediation suggestions into action buckets.

use serde::{Deserialize, Serialize};

const MAX_PER_BUCKET: usize = 3;
const IMMEDIATE_KEYWORDS: &[&str] = &["restart", "emergency"];
const INVESTIGATION_KEYWORDS: &[&str] = &["check", "verify", "investigate", "review"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub immediate: Vec<String>,
    pub investigation: Vec<String>,
    pub long_term: Vec<String>,
}

/// Bucket suggestions by keyword.
///
/// A bucket left empty is filled by position from the raw list: the first
/// suggestion for immediate, the second for investigation and the rest for
/// long term. Each bucket holds at most three entries.
pub fn categorize(suggestions: &[String]) -> Recommendations {
    let mut recs = Recommendations::default();
    for suggestion in suggestions {
        let lower = suggestion.to_lowercase();
        let bucket = if IMMEDIATE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            &mut recs.immediate
        } else if INVESTIGATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            &mut recs.investigation
        } else {
            &mut recs.long_term
        };
        bucket.push(suggestion.clone());
    }

    if recs.immediate.is_empty() {
        recs.immediate = suggestions.iter().take(1).cloned().collect();
    }
    if recs.investigation.is_empty() {
        recs.investigation = suggestions.iter().skip(1).take(1).cloned().collect();
    }
    if recs.long_term.is_empty() {
        recs.long_term = suggestions.iter().skip(2).cloned().collect();
    }

    recs.immediate.truncate(MAX_PER_BUCKET);
    recs.investigation.truncate(MAX_PER_BUCKET);
    recs.long_term.truncate(MAX_PER_BUCKET);
    recs
}
