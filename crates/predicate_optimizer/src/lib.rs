//! Analysis core for inspecting data-access query methods, deciding
//! whether their WHERE/JOIN predicates are ordered sub-optimally relative
//! to column selectivity, and producing reordering recommendations,
//! missing-index suggestions and argument-position remappings, with
//! durable checkpoint/resume for long multi-repository scans.

use thiserror::Error;

pub mod advisor;
pub mod checkpoint;
pub mod classifier;
pub mod consolidator;
pub mod model;
pub mod runner;
pub mod walker;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("failed to parse SQL: {0}")]
    Parse(String),
    #[error("unsupported statement shape: {0}")]
    Unsupported(String),
}

pub use advisor::{
    build_position_mapping, propose_rename, recommended_order, reorder_where_clause, Advisor,
};
pub use checkpoint::{CheckpointManager, CheckpointPhase, CheckpointState};
pub use classifier::{Classifier, SchemaMetadata};
pub use consolidator::{ConsolidatedSuggestions, SuggestionConsolidator};
pub use model::{
    CardinalityLevel, ColumnCategory, ColumnTypeHint, IndexDescriptor, IndexKind, IndexSuggestion,
    JoinPredicate, OptimizationIssue, ParameterRef, Predicate, Severity, UnclassifiedPredicate,
};
pub use runner::{
    AnalysisRun, AnalysisUnit, MethodAdvice, MethodParameter, QueryMethod, RunReport,
};
pub use walker::{ConditionWalker, Extraction};
