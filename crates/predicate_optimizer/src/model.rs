//! Shared data model for the analysis core.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    PrimaryKey,
    UniqueConstraint,
    UniqueIndex,
    RegularIndex,
}

/// One index declared by the schema. `columns` is non-empty and its order
/// is significant: the first element is the leading column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub table: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnCategory {
    Boolean,
    Enum,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTypeHint {
    pub table: String,
    pub column: String,
    pub category: ColumnCategory,
}

/// Coarse selectivity class. Ordered so that `High > Medium > Low`, which
/// is the sort key for predicate reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CardinalityLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for CardinalityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardinalityLevel::Low => write!(f, "LOW"),
            CardinalityLevel::Medium => write!(f, "MEDIUM"),
            CardinalityLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Opaque handle back into the caller's parameter model. The core threads
/// it through unchanged and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterRef {
    Positional(usize),
    Named(String),
}

/// A predicate as the walker first sees it, before the classifier has run.
/// Converted into a [`Predicate`] exactly once; there is no mutable
/// half-classified state in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclassifiedPredicate {
    pub table: Option<String>,
    pub column: String,
    pub operator: String,
    pub position: usize,
    pub parameter: Option<ParameterRef>,
}

impl UnclassifiedPredicate {
    pub fn classified(self, cardinality: CardinalityLevel) -> Predicate {
        Predicate {
            table: self.table,
            column: self.column,
            operator: self.operator,
            cardinality,
            position: self.position,
            parameter: self.parameter,
        }
    }
}

/// One atomic WHERE-clause test. `position` is the 0-based source-order
/// index within its owning clause, assigned at extraction time and never
/// renumbered; reordering produces a new sequence referencing the old
/// positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub table: Option<String>,
    pub column: String,
    pub operator: String,
    pub cardinality: CardinalityLevel,
    pub position: usize,
    pub parameter: Option<ParameterRef>,
}

/// A column-to-column comparison taken from a JOIN ON clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPredicate {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
    pub operator: String,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Created at most once per method whose AND-only WHERE order disagrees
/// with the cardinality-sorted order. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationIssue {
    pub unit_id: String,
    pub method_id: String,
    pub current_order: Vec<String>,
    pub recommended_order: Vec<String>,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSuggestion {
    pub table: String,
    pub columns: Vec<String>,
    pub multi_column: bool,
}

impl IndexSuggestion {
    pub fn single(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec![column.into()],
            multi_column: false,
        }
    }

    pub fn multi(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            multi_column: true,
        }
    }

    /// Canonical dedup key: `table|column` for single-column suggestions,
    /// `table|c1,c2,...` for multi-column ones.
    pub fn key(&self) -> String {
        format!("{}|{}", self.table, self.columns.join(","))
    }
}
