//! Batch orchestration: one unit at a time, fully extracted, advised and
//! checkpointed before the next begins.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::advisor::{self, Advisor};
use crate::checkpoint::CheckpointManager;
use crate::classifier::Classifier;
use crate::consolidator::{ConsolidatedSuggestions, SuggestionConsolidator};
use crate::model::{IndexSuggestion, OptimizationIssue, ParameterRef, Predicate};
use crate::walker::ConditionWalker;

/// One analysis target, typically one repository interface. Deserialized
/// from the caller's unit description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisUnit {
    pub id: String,
    #[serde(default)]
    pub file: Option<String>,
    pub table: String,
    #[serde(default)]
    pub methods: Vec<QueryMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMethod {
    pub id: String,
    /// Declared method name; used for the derived-method rename proposal.
    #[serde(default)]
    pub name: Option<String>,
    /// Custom query text. `None` means the method is derived from its
    /// name, and predicates come from the bound parameter columns.
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub parameters: Vec<MethodParameter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodParameter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub column: Option<String>,
}

/// Everything the source-rewriting collaborator needs for one method.
#[derive(Debug, Clone)]
pub struct MethodAdvice {
    pub issue: OptimizationIssue,
    /// New argument index to old argument index; derived methods only.
    pub position_mapping: Option<HashMap<usize, usize>>,
    /// Proposed method name for derived methods; absent when the
    /// recomputed name equals the original.
    pub proposed_name: Option<String>,
    /// Reordered WHERE body for custom query text.
    pub rewritten_where: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub advices: Vec<MethodAdvice>,
    pub suggestions: ConsolidatedSuggestions,
    pub units_processed: usize,
    pub units_skipped: usize,
    pub resumed: bool,
}

pub struct AnalysisRun<'a> {
    classifier: &'a Classifier,
    checkpoint: CheckpointManager,
}

impl<'a> AnalysisRun<'a> {
    pub fn new(classifier: &'a Classifier, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            checkpoint: CheckpointManager::new(checkpoint_path),
        }
    }

    /// Analyze every unit, skipping those a prior interrupted session
    /// already completed. The checkpoint is saved after each unit and
    /// cleared once the whole run finishes.
    pub fn execute(mut self, units: &[AnalysisUnit]) -> RunReport {
        let resumed = self.checkpoint.load();
        let walker = ConditionWalker::new(self.classifier);
        let advisor = Advisor::new(self.classifier);
        let mut consolidator = SuggestionConsolidator::new();

        if resumed {
            // Carry suggestion keys accumulated by the interrupted session
            // into this run's consolidated report.
            for key in &self.checkpoint.state().suggested_new_indexes {
                match suggestion_from_key(key, false) {
                    Some(suggestion) => consolidator.add(suggestion),
                    None => warn!("ignoring malformed checkpoint key `{key}`"),
                }
            }
            for key in &self.checkpoint.state().suggested_multi_column_indexes {
                match suggestion_from_key(key, true) {
                    Some(suggestion) => consolidator.add(suggestion),
                    None => warn!("ignoring malformed checkpoint key `{key}`"),
                }
            }
        }

        let mut advices = Vec::new();
        let mut units_processed = 0;
        let mut units_skipped = 0;

        for unit in units {
            if self.checkpoint.is_processed(&unit.id) {
                debug!("skipping {}: already processed", unit.id);
                units_skipped += 1;
                continue;
            }

            let unit_advices = self.analyze_unit(unit, &walker, &advisor, &mut consolidator);
            if !unit_advices.is_empty() {
                if let Some(file) = &unit.file {
                    self.checkpoint.mark_modified(file);
                }
            }
            advices.extend(unit_advices);

            self.checkpoint.mark_processed(&unit.id);
            self.checkpoint.save();
            units_processed += 1;
        }

        self.checkpoint.clear();

        RunReport {
            advices,
            suggestions: consolidator.finalize(),
            units_processed,
            units_skipped,
            resumed,
        }
    }

    fn analyze_unit(
        &mut self,
        unit: &AnalysisUnit,
        walker: &ConditionWalker<'_>,
        advisor: &Advisor<'_>,
        consolidator: &mut SuggestionConsolidator,
    ) -> Vec<MethodAdvice> {
        unit.methods
            .iter()
            .filter_map(|method| self.analyze_method(unit, method, walker, advisor, consolidator))
            .collect()
    }

    fn analyze_method(
        &mut self,
        unit: &AnalysisUnit,
        method: &QueryMethod,
        walker: &ConditionWalker<'_>,
        advisor: &Advisor<'_>,
        consolidator: &mut SuggestionConsolidator,
    ) -> Option<MethodAdvice> {
        let (predicates, conjunctive) = match &method.sql {
            Some(sql) => match walker.extract_sql(sql, &unit.table) {
                Ok(extraction) => (extraction.where_predicates, !extraction.where_has_or),
                Err(error) => {
                    warn!("skipping {}.{}: {error}", unit.id, method.id);
                    return None;
                }
            },
            None => (self.derived_predicates(unit, method), true),
        };

        // Coverage gaps are reported per WHERE predicate list, whether or
        // not a reordering issue exists.
        let recommended = advisor::recommended_order(&predicates);
        for suggestion in advisor.index_gaps(&recommended) {
            self.record_suggestion(&suggestion);
            consolidator.add(suggestion);
        }

        let issue = advisor.advise(&unit.id, &method.id, &predicates, conjunctive)?;

        let advice = match &method.sql {
            Some(sql) => MethodAdvice {
                rewritten_where: where_body(sql).and_then(|body| {
                    advisor::reorder_where_clause(&body, &issue.recommended_order)
                }),
                position_mapping: None,
                proposed_name: None,
                issue,
            },
            None => MethodAdvice {
                position_mapping: advisor::build_position_mapping(
                    &issue.current_order,
                    &issue.recommended_order,
                    method.parameters.len(),
                ),
                proposed_name: method.name.as_deref().and_then(|name| {
                    advisor::propose_rename(name, &issue.current_order, &issue.recommended_order)
                }),
                rewritten_where: None,
                issue,
            },
        };
        Some(advice)
    }

    /// Predicates for a name-derived method come from its bound parameter
    /// columns, in declared order, each an equality test against the
    /// unit's primary table.
    fn derived_predicates(&self, unit: &AnalysisUnit, method: &QueryMethod) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        for (index, parameter) in method.parameters.iter().enumerate() {
            let Some(column) = &parameter.column else {
                continue;
            };
            let reference = match (&parameter.name, parameter.position) {
                (Some(name), _) => ParameterRef::Named(name.clone()),
                (None, Some(position)) => ParameterRef::Positional(position),
                (None, None) => ParameterRef::Positional(index),
            };
            let position = predicates.len();
            let cardinality = self.classifier.classify(&unit.table, column);
            predicates.push(Predicate {
                table: Some(unit.table.clone()),
                column: column.clone(),
                operator: "=".to_string(),
                cardinality,
                position,
                parameter: Some(reference),
            });
        }
        predicates
    }

    fn record_suggestion(&mut self, suggestion: &IndexSuggestion) {
        let key = suggestion.key();
        if suggestion.multi_column {
            self.checkpoint.record_multi_column_index(&key);
        } else {
            self.checkpoint.record_single_column_index(&key);
        }
    }
}

fn suggestion_from_key(key: &str, multi_column: bool) -> Option<IndexSuggestion> {
    let (table, columns) = key.split_once('|')?;
    let columns: Vec<String> = columns.split(',').map(str::to_string).collect();
    if table.is_empty() || columns.iter().any(String::is_empty) {
        return None;
    }
    Some(IndexSuggestion {
        table: table.to_string(),
        columns,
        multi_column,
    })
}

/// Best-effort slice of a statement's WHERE body, up to ORDER BY/GROUP
/// BY/HAVING/LIMIT or the end of the text.
fn where_body(sql: &str) -> Option<String> {
    let regex = Regex::new(
        r"(?is)\bwhere\b(.*?)(?:\border\s+by\b|\bgroup\s+by\b|\bhaving\b|\blimit\b|\z)",
    )
    .ok()?;
    let body = regex.captures(sql)?.get(1)?.as_str().trim();
    (!body.is_empty()).then(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SchemaMetadata;
    use crate::model::{IndexDescriptor, IndexKind, Severity};
    use std::fs;
    use std::path::PathBuf;

    fn classifier() -> Classifier {
        Classifier::from_metadata(&SchemaMetadata {
            indexes: vec![IndexDescriptor {
                table: "orders".to_string(),
                kind: IndexKind::PrimaryKey,
                columns: vec!["id".to_string()],
            }],
            ..SchemaMetadata::default()
        })
    }

    fn temp_checkpoint(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("predicate-optimizer-runner-{}", std::process::id()));
        fs::create_dir_all(&path).expect("create temp dir");
        path.push(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn derived_method(id: &str, name: &str, columns: &[&str]) -> QueryMethod {
        QueryMethod {
            id: id.to_string(),
            name: Some(name.to_string()),
            sql: None,
            parameters: columns
                .iter()
                .map(|column| MethodParameter {
                    name: None,
                    position: None,
                    column: Some(column.to_string()),
                })
                .collect(),
        }
    }

    fn unit(id: &str, methods: Vec<QueryMethod>) -> AnalysisUnit {
        AnalysisUnit {
            id: id.to_string(),
            file: Some(format!("{id}.java")),
            table: "orders".to_string(),
            methods,
        }
    }

    #[test]
    fn derived_method_gets_mapping_and_rename() {
        let classifier = classifier();
        let run = AnalysisRun::new(&classifier, temp_checkpoint("derived.json"));
        let units = vec![unit(
            "U1",
            vec![derived_method(
                "m1",
                "findByDeletedAndId",
                &["deleted", "id"],
            )],
        )];

        let report = run.execute(&units);
        assert_eq!(report.advices.len(), 1);
        let advice = &report.advices[0];
        assert_eq!(advice.issue.severity, Severity::High);
        assert_eq!(advice.issue.recommended_order, vec!["id", "deleted"]);
        assert_eq!(advice.proposed_name.as_deref(), Some("findByIdAndDeleted"));
        let mapping = advice.position_mapping.as_ref().expect("mapping");
        assert_eq!(mapping[&0], 1);
        assert_eq!(mapping[&1], 0);
    }

    #[test]
    fn custom_sql_method_gets_a_rewritten_where_body() {
        let classifier = classifier();
        let run = AnalysisRun::new(&classifier, temp_checkpoint("custom.json"));
        let units = vec![unit(
            "U1",
            vec![QueryMethod {
                id: "m1".to_string(),
                name: None,
                sql: Some(
                    "SELECT * FROM orders WHERE deleted = ? AND id = ? ORDER BY id".to_string(),
                ),
                parameters: Vec::new(),
            }],
        )];

        let report = run.execute(&units);
        assert_eq!(report.advices.len(), 1);
        assert_eq!(
            report.advices[0].rewritten_where.as_deref(),
            Some("id = ? AND deleted = ?")
        );
        assert!(report.advices[0].position_mapping.is_none());
    }

    #[test]
    fn processed_units_are_skipped_on_resume() {
        let classifier = classifier();
        let path = temp_checkpoint("skip.json");

        // Simulate an interrupted session that finished U1 only.
        let mut prior = CheckpointManager::new(&path);
        prior.mark_processed("U1");
        prior.save();

        let run = AnalysisRun::new(&classifier, &path);
        let units = vec![
            unit("U1", vec![derived_method("m1", "findByDeleted", &["deleted"])]),
            unit("U2", vec![derived_method("m2", "findByRegionAndId", &["region", "id"])]),
        ];
        let report = run.execute(&units);

        assert!(report.resumed);
        assert_eq!(report.units_skipped, 1);
        assert_eq!(report.units_processed, 1);
        assert_eq!(report.advices.len(), 1);
        assert_eq!(report.advices[0].issue.unit_id, "U2");
        // Finished run clears its checkpoint.
        assert!(!path.exists());
    }

    #[test]
    fn prior_session_suggestions_survive_into_the_report() {
        let classifier = classifier();
        let path = temp_checkpoint("carry.json");

        let mut prior = CheckpointManager::new(&path);
        prior.mark_processed("U1");
        prior.record_single_column_index("orders|region");
        prior.save();

        let run = AnalysisRun::new(&classifier, &path);
        let report = run.execute(&[unit("U1", Vec::new())]);
        assert_eq!(report.suggestions.single_column, vec!["orders|region"]);
    }

    #[test]
    fn unparseable_sql_contributes_nothing_but_does_not_abort() {
        let classifier = classifier();
        let run = AnalysisRun::new(&classifier, temp_checkpoint("broken.json"));
        let units = vec![unit(
            "U1",
            vec![
                QueryMethod {
                    id: "broken".to_string(),
                    name: None,
                    sql: Some("SELECT FROM WHERE ???".to_string()),
                    parameters: Vec::new(),
                },
                derived_method("ok", "findByDeletedAndId", &["deleted", "id"]),
            ],
        )];
        let report = run.execute(&units);
        assert_eq!(report.units_processed, 1);
        assert_eq!(report.advices.len(), 1);
        assert_eq!(report.advices[0].issue.method_id, "ok");
    }

    #[test]
    fn or_connected_where_clause_never_produces_an_issue() {
        let classifier = classifier();
        let run = AnalysisRun::new(&classifier, temp_checkpoint("or.json"));
        let units = vec![unit(
            "U1",
            vec![QueryMethod {
                id: "m1".to_string(),
                name: None,
                sql: Some(
                    "SELECT * FROM orders WHERE deleted = ? AND region = ? OR id = ?".to_string(),
                ),
                parameters: Vec::new(),
            }],
        )];
        let report = run.execute(&units);
        assert!(report.advices.is_empty());
        assert_eq!(report.units_processed, 1);
    }

    #[test]
    fn index_gaps_are_consolidated_across_methods() {
        let classifier = classifier();
        let run = AnalysisRun::new(&classifier, temp_checkpoint("gaps.json"));
        let units = vec![
            unit("U1", vec![derived_method("m1", "findByRegion", &["region"])]),
            unit("U2", vec![derived_method("m2", "findByRegion", &["region"])]),
        ];
        let report = run.execute(&units);
        assert_eq!(report.suggestions.single_column, vec!["orders|region"]);
        assert!(report.suggestions.multi_column.is_empty());
    }

    #[test]
    fn where_body_stops_before_trailing_clauses() {
        assert_eq!(
            where_body("SELECT * FROM t WHERE a = ? AND b = ? ORDER BY a"),
            Some("a = ? AND b = ?".to_string())
        );
        assert_eq!(where_body("SELECT * FROM t"), None);
    }
}
