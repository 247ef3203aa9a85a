//! Turns extracted predicates into reordering recommendations, index
//! suggestions, an argument-position remapping, and (for custom query
//! text) a reordered WHERE body.

use std::collections::HashMap;

use tracing::debug;

use crate::classifier::Classifier;
use crate::model::{
    CardinalityLevel, IndexSuggestion, OptimizationIssue, Predicate, Severity,
};

pub struct Advisor<'a> {
    classifier: &'a Classifier,
}

impl<'a> Advisor<'a> {
    pub fn new(classifier: &'a Classifier) -> Self {
        Self { classifier }
    }

    /// Produce at most one issue for a method's WHERE predicates.
    ///
    /// Advice requires at least two predicates, a purely AND-connected
    /// clause (`conjunctive`), and a current order that disagrees with the
    /// cardinality-sorted order. OR changes evaluation semantics under
    /// reordering, so any OR anywhere disables advice for the method.
    pub fn advise(
        &self,
        unit_id: &str,
        method_id: &str,
        predicates: &[Predicate],
        conjunctive: bool,
    ) -> Option<OptimizationIssue> {
        if predicates.len() < 2 {
            return None;
        }
        if !conjunctive {
            debug!("skipping {method_id}: WHERE clause contains OR");
            return None;
        }

        let current_order: Vec<String> = predicates.iter().map(|p| p.column.clone()).collect();
        let recommended = recommended_order(predicates);
        let recommended_order: Vec<String> = recommended.iter().map(|p| p.column.clone()).collect();
        if current_order == recommended_order {
            return None;
        }

        let severity = severity_of(predicates);
        let table = predicates[0].table.clone().unwrap_or_default();
        let description = format!(
            "WHERE predicates on `{table}` are ordered ({}) but column selectivity favors ({})",
            current_order.join(", "),
            recommended_order.join(", "),
        );

        Some(OptimizationIssue {
            unit_id: unit_id.to_string(),
            method_id: method_id.to_string(),
            current_order,
            recommended_order,
            severity,
            description,
        })
    }

    /// Index-coverage gaps for one method, checked against the recommended
    /// predicate order. The leading-column and covering-sequence checks
    /// are independent; a method can produce zero, one or both suggestions.
    pub fn index_gaps(&self, recommended: &[Predicate]) -> Vec<IndexSuggestion> {
        let mut out = Vec::new();
        let Some(leading) = recommended.first() else {
            return out;
        };
        let Some(table) = leading.table.clone() else {
            return out;
        };

        if !self
            .classifier
            .has_index_with_leading_column(&table, &leading.column)
        {
            out.push(IndexSuggestion::single(&table, &leading.column));
        }

        let columns: Vec<String> = recommended
            .iter()
            .filter(|p| {
                p.table
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case(&table))
                    .unwrap_or(false)
            })
            .map(|p| p.column.clone())
            .collect();
        if columns.len() >= 2 && !self.classifier.has_index_covering_columns(&table, &columns) {
            out.push(IndexSuggestion::multi(&table, columns));
        }

        out
    }
}

/// Stable sort by cardinality descending, ties broken by original source
/// position ascending, so predicates of equal cardinality never swap.
pub fn recommended_order(predicates: &[Predicate]) -> Vec<Predicate> {
    let mut sorted = predicates.to_vec();
    sorted.sort_by(|a, b| {
        b.cardinality
            .cmp(&a.cardinality)
            .then(a.position.cmp(&b.position))
    });
    sorted
}

fn severity_of(predicates: &[Predicate]) -> Severity {
    let leading = predicates[0].cardinality;
    let high_exists_later = predicates[1..]
        .iter()
        .any(|p| p.cardinality == CardinalityLevel::High);
    match leading {
        CardinalityLevel::Low if high_exists_later => Severity::High,
        CardinalityLevel::Medium if high_exists_later => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Map new argument index to old argument index for a reordered method.
///
/// Arguments beyond the tracked column count (trailing pagination or sort
/// parameters) are identity-mapped. Returns `None` when the two orders are
/// not a permutation of each other or the column count exceeds `arg_count`.
pub fn build_position_mapping(
    current: &[String],
    recommended: &[String],
    arg_count: usize,
) -> Option<HashMap<usize, usize>> {
    if current.len() != recommended.len() || current.len() > arg_count {
        return None;
    }
    let mut used = vec![false; recommended.len()];
    let mut mapping = HashMap::with_capacity(arg_count);
    for (old_index, column) in current.iter().enumerate() {
        let new_index = recommended
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && candidate == column)?;
        used[new_index] = true;
        mapping.insert(new_index, old_index);
    }
    for trailing in current.len()..arg_count {
        mapping.insert(trailing, trailing);
    }
    Some(mapping)
}

/// Re-emit a WHERE body with its top-level AND fragments in recommended
/// column order. Bodies containing a top-level OR are left alone; matched
/// fragments come first in recommended order, leftovers keep their
/// original order at the end and are never dropped.
pub fn reorder_where_clause(body: &str, recommended_columns: &[String]) -> Option<String> {
    let fragments = split_top_level_and(body)?;
    if fragments.is_empty() {
        return None;
    }

    let mut claimed = vec![false; fragments.len()];
    let mut reordered: Vec<&str> = Vec::with_capacity(fragments.len());
    for column in recommended_columns {
        let needle = column.to_ascii_lowercase();
        if let Some(i) = fragments
            .iter()
            .enumerate()
            .position(|(i, f)| !claimed[i] && f.to_ascii_lowercase().contains(&needle))
        {
            claimed[i] = true;
            reordered.push(&fragments[i]);
        }
    }
    for (i, fragment) in fragments.iter().enumerate() {
        if !claimed[i] {
            reordered.push(fragment);
        }
    }
    Some(reordered.join(" AND "))
}

/// Split on top-level AND, honoring parentheses and string literals.
/// Returns `None` when a top-level OR is present.
fn split_top_level_and(body: &str) -> Option<Vec<String>> {
    let bytes = body.as_bytes();
    let mut fragments = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if c == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' => {
                in_string = true;
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            _ if depth == 0 => {
                if let Some(len) = keyword_at(bytes, i, b"AND") {
                    let fragment = body[start..i].trim();
                    if !fragment.is_empty() {
                        fragments.push(fragment.to_string());
                    }
                    i += len;
                    start = i;
                } else if keyword_at(bytes, i, b"OR").is_some() {
                    return None;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    let tail = body[start..].trim();
    if !tail.is_empty() {
        fragments.push(tail.to_string());
    }
    Some(fragments)
}

fn keyword_at(bytes: &[u8], at: usize, keyword: &[u8]) -> Option<usize> {
    if at + keyword.len() > bytes.len() {
        return None;
    }
    if !bytes[at..at + keyword.len()].eq_ignore_ascii_case(keyword) {
        return None;
    }
    let boundary_before = at == 0 || !is_word_byte(bytes[at - 1]);
    let boundary_after = at + keyword.len() == bytes.len() || !is_word_byte(bytes[at + keyword.len()]);
    (boundary_before && boundary_after).then_some(keyword.len())
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Propose a new derived-method name reflecting the reordered columns.
/// The existing name is split on the `By`/`And` convention and the same
/// fragments are re-joined in the new order; no proposal when the
/// recomputed name equals the original or the fragments cannot be mapped.
pub fn propose_rename(name: &str, current: &[String], recommended: &[String]) -> Option<String> {
    let by = name.find("By")?;
    let (prefix, rest) = name.split_at(by + 2);
    if rest.is_empty() {
        return None;
    }
    let fragments: Vec<&str> = rest.split("And").collect();
    if fragments.len() != current.len() || current.len() != recommended.len() {
        return None;
    }

    let mut used = vec![false; current.len()];
    let mut reordered = Vec::with_capacity(fragments.len());
    for column in recommended {
        let i = current
            .iter()
            .enumerate()
            .position(|(i, c)| !used[i] && c == column)?;
        used[i] = true;
        reordered.push(fragments[i]);
    }

    let candidate = format!("{prefix}{}", reordered.join("And"));
    (candidate != name).then_some(candidate)
}
