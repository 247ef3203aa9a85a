//! Column cardinality classification from schema metadata.
//!
//! The classifier is built once per analysis run and immutable afterwards;
//! every lookup is a pure function of the snapshot it was built from. None
//! of its operations fail: unknown input degrades to `Medium` (or `false`
//! for the index-coverage queries).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{CardinalityLevel, ColumnCategory, ColumnTypeHint, IndexDescriptor, IndexKind};

const LOW_CARDINALITY_PREFIXES: [&str; 4] = ["is_", "has_", "can_", "should_"];
const LOW_CARDINALITY_SUFFIXES: [&str; 3] = ["_flag", "_enabled", "_active"];
const LOW_CARDINALITY_NAMES: [&str; 4] = ["active", "enabled", "deleted", "visible"];

/// Schema snapshot handed to [`Classifier::from_metadata`], usually read
/// from a JSON file by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaMetadata {
    pub indexes: Vec<IndexDescriptor>,
    pub column_types: Vec<ColumnTypeHint>,
    pub high_cardinality: Vec<String>,
    pub low_cardinality: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    high_override: HashSet<String>,
    low_override: HashSet<String>,
    primary_key_columns: HashMap<String, HashSet<String>>,
    unique_columns: HashMap<String, HashSet<String>>,
    indexed_column_lists: HashMap<String, Vec<Vec<String>>>,
    type_hints: HashMap<(String, String), ColumnCategory>,
}

impl Classifier {
    pub fn from_metadata(metadata: &SchemaMetadata) -> Self {
        let mut primary_key_columns: HashMap<String, HashSet<String>> = HashMap::new();
        let mut unique_columns: HashMap<String, HashSet<String>> = HashMap::new();
        let mut indexed_column_lists: HashMap<String, Vec<Vec<String>>> = HashMap::new();

        for index in &metadata.indexes {
            if index.columns.is_empty() {
                continue;
            }
            let table = fold(&index.table);
            let columns: Vec<String> = index.columns.iter().map(|c| fold(c)).collect();
            match index.kind {
                IndexKind::PrimaryKey => {
                    primary_key_columns
                        .entry(table.clone())
                        .or_default()
                        .extend(columns.iter().cloned());
                }
                IndexKind::UniqueConstraint | IndexKind::UniqueIndex => {
                    unique_columns
                        .entry(table.clone())
                        .or_default()
                        .extend(columns.iter().cloned());
                }
                IndexKind::RegularIndex => {}
            }
            indexed_column_lists.entry(table).or_default().push(columns);
        }

        let type_hints = metadata
            .column_types
            .iter()
            .map(|hint| ((fold(&hint.table), fold(&hint.column)), hint.category))
            .collect();

        Self {
            high_override: metadata.high_cardinality.iter().map(|c| fold(c)).collect(),
            low_override: metadata.low_cardinality.iter().map(|c| fold(c)).collect(),
            primary_key_columns,
            unique_columns,
            indexed_column_lists,
            type_hints,
        }
    }

    /// Selectivity verdict for one `(table, column)` pair.
    ///
    /// Lookup cascade, first match wins: overrides (column name only,
    /// `High` beats `Low` when listed in both), primary-key membership,
    /// unique membership, Boolean/Enum type hint, and only when no type
    /// hint exists at all, the naming-convention fallback. Anything else
    /// is `Medium`, including missing identity.
    pub fn classify(&self, table: &str, column: &str) -> CardinalityLevel {
        let table = fold(table);
        let column = fold(column);
        if table.is_empty() || column.is_empty() {
            return CardinalityLevel::Medium;
        }

        if self.high_override.contains(&column) {
            return CardinalityLevel::High;
        }
        if self.low_override.contains(&column) {
            return CardinalityLevel::Low;
        }

        if member(&self.primary_key_columns, &table, &column)
            || member(&self.unique_columns, &table, &column)
        {
            return CardinalityLevel::High;
        }

        match self.type_hints.get(&(table, column.clone())) {
            Some(ColumnCategory::Boolean) | Some(ColumnCategory::Enum) => CardinalityLevel::Low,
            // Explicit metadata is authoritative; the naming heuristic
            // only applies when no hint exists for the column at all.
            Some(ColumnCategory::Other) => CardinalityLevel::Medium,
            None if name_suggests_low_cardinality(&column) => CardinalityLevel::Low,
            None => CardinalityLevel::Medium,
        }
    }

    /// True iff some index on `table` has `column` as its first element.
    pub fn has_index_with_leading_column(&self, table: &str, column: &str) -> bool {
        let table = fold(table);
        let column = fold(column);
        if table.is_empty() || column.is_empty() {
            return false;
        }
        self.indexed_column_lists
            .get(&table)
            .map(|lists| lists.iter().any(|columns| columns[0] == column))
            .unwrap_or(false)
    }

    /// True iff some index on `table` has `columns` as an exact, in-order
    /// prefix of its declared column sequence. Extra trailing index
    /// columns are allowed; gaps or reordering are not covering.
    pub fn has_index_covering_columns(&self, table: &str, columns: &[String]) -> bool {
        let table = fold(table);
        if table.is_empty() || columns.is_empty() {
            return false;
        }
        let wanted: Vec<String> = columns.iter().map(|c| fold(c)).collect();
        self.indexed_column_lists
            .get(&table)
            .map(|lists| {
                lists.iter().any(|declared| {
                    declared.len() >= wanted.len()
                        && declared.iter().zip(wanted.iter()).all(|(a, b)| a == b)
                })
            })
            .unwrap_or(false)
    }
}

fn fold(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn member(map: &HashMap<String, HashSet<String>>, table: &str, column: &str) -> bool {
    map.get(table).map(|s| s.contains(column)).unwrap_or(false)
}

fn name_suggests_low_cardinality(column: &str) -> bool {
    LOW_CARDINALITY_PREFIXES.iter().any(|p| column.starts_with(p))
        || LOW_CARDINALITY_SUFFIXES.iter().any(|s| column.ends_with(s))
        || LOW_CARDINALITY_NAMES.iter().any(|n| column == *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SchemaMetadata {
        SchemaMetadata {
            indexes: vec![
                IndexDescriptor {
                    table: "orders".to_string(),
                    kind: IndexKind::PrimaryKey,
                    columns: vec!["id".to_string()],
                },
                IndexDescriptor {
                    table: "orders".to_string(),
                    kind: IndexKind::UniqueIndex,
                    columns: vec!["external_ref".to_string()],
                },
                IndexDescriptor {
                    table: "orders".to_string(),
                    kind: IndexKind::RegularIndex,
                    columns: vec![
                        "a".to_string(),
                        "b".to_string(),
                        "c".to_string(),
                        "d".to_string(),
                    ],
                },
            ],
            column_types: vec![
                ColumnTypeHint {
                    table: "orders".to_string(),
                    column: "archived".to_string(),
                    category: ColumnCategory::Boolean,
                },
                ColumnTypeHint {
                    table: "orders".to_string(),
                    column: "is_active".to_string(),
                    category: ColumnCategory::Other,
                },
            ],
            high_cardinality: vec!["tracking_code".to_string()],
            low_cardinality: vec!["region".to_string(), "tracking_code".to_string()],
        }
    }

    #[test]
    fn classify_is_deterministic() {
        let classifier = Classifier::from_metadata(&metadata());
        let first = classifier.classify("orders", "archived");
        for _ in 0..3 {
            assert_eq!(classifier.classify("orders", "archived"), first);
        }
    }

    #[test]
    fn high_override_wins_when_column_listed_in_both() {
        let classifier = Classifier::from_metadata(&metadata());
        assert_eq!(
            classifier.classify("orders", "tracking_code"),
            CardinalityLevel::High
        );
        assert_eq!(classifier.classify("orders", "region"), CardinalityLevel::Low);
    }

    #[test]
    fn primary_key_beats_boolean_hint() {
        let mut metadata = metadata();
        metadata.column_types.push(ColumnTypeHint {
            table: "orders".to_string(),
            column: "id".to_string(),
            category: ColumnCategory::Boolean,
        });
        let classifier = Classifier::from_metadata(&metadata);
        assert_eq!(classifier.classify("orders", "id"), CardinalityLevel::High);
    }

    #[test]
    fn explicit_other_hint_suppresses_naming_heuristic() {
        let classifier = Classifier::from_metadata(&metadata());
        assert_eq!(
            classifier.classify("orders", "is_active"),
            CardinalityLevel::Medium
        );
        // Same name with no hint at all falls back to the heuristic.
        assert_eq!(classifier.classify("users", "is_active"), CardinalityLevel::Low);
    }

    #[test]
    fn naming_heuristic_covers_prefixes_suffixes_and_exact_names() {
        let classifier = Classifier::from_metadata(&SchemaMetadata::default());
        for column in ["is_paid", "has_items", "sync_flag", "row_enabled", "deleted"] {
            assert_eq!(
                classifier.classify("users", column),
                CardinalityLevel::Low,
                "{column}"
            );
        }
        assert_eq!(classifier.classify("users", "name"), CardinalityLevel::Medium);
    }

    #[test]
    fn missing_identity_degrades_to_medium() {
        let classifier = Classifier::from_metadata(&metadata());
        assert_eq!(classifier.classify("", "id"), CardinalityLevel::Medium);
        assert_eq!(classifier.classify("orders", ""), CardinalityLevel::Medium);
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let classifier = Classifier::from_metadata(&metadata());
        assert_eq!(classifier.classify("Orders", "ID"), CardinalityLevel::High);
        assert!(classifier.has_index_with_leading_column("ORDERS", "A"));
    }

    #[test]
    fn leading_column_requires_first_position() {
        let classifier = Classifier::from_metadata(&metadata());
        assert!(classifier.has_index_with_leading_column("orders", "a"));
        assert!(!classifier.has_index_with_leading_column("orders", "b"));
        assert!(!classifier.has_index_with_leading_column("missing", "a"));
    }

    #[test]
    fn covering_requires_exact_in_order_prefix() {
        let classifier = Classifier::from_metadata(&metadata());
        let cols = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();

        for covered in [
            cols(&["a"]),
            cols(&["a", "b"]),
            cols(&["a", "b", "c"]),
            cols(&["a", "b", "c", "d"]),
        ] {
            assert!(classifier.has_index_covering_columns("orders", &covered), "{covered:?}");
        }
        for uncovered in [cols(&["b"]), cols(&["a", "c"]), cols(&["b", "c"])] {
            assert!(
                !classifier.has_index_covering_columns("orders", &uncovered),
                "{uncovered:?}"
            );
        }
        assert!(!classifier.has_index_covering_columns("orders", &[]));
    }
}
