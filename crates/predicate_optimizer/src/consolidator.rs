//! Run-wide aggregation of index suggestions.
//!
//! Suggestions arrive once per method and are deduplicated by their
//! canonical key as they arrive, so `finalize` output is insertion-ordered
//! and deterministic for a given input order.

use std::collections::HashSet;

use crate::model::IndexSuggestion;

#[derive(Debug, Default)]
pub struct SuggestionConsolidator {
    seen: HashSet<String>,
    single_column: Vec<String>,
    multi_column: Vec<String>,
    entries: Vec<IndexSuggestion>,
}

/// Deduplicated, insertion-ordered result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidatedSuggestions {
    pub single_column: Vec<String>,
    pub multi_column: Vec<String>,
    /// Structured entries for the changelog writer: a table name and an
    /// ordered column list per suggestion. The core never emits DDL.
    pub entries: Vec<IndexSuggestion>,
}

impl SuggestionConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, suggestion: IndexSuggestion) {
        let key = suggestion.key();
        if !self.seen.insert(key.clone()) {
            return;
        }
        if suggestion.multi_column {
            self.multi_column.push(key);
        } else {
            self.single_column.push(key);
        }
        self.entries.push(suggestion);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finalize(self) -> ConsolidatedSuggestions {
        ConsolidatedSuggestions {
            single_column: self.single_column,
            multi_column: self.multi_column,
            entries: self.entries,
        }
    }
}
