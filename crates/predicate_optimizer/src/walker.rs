//! Recursive decomposition of parsed statements into ordered WHERE and
//! JOIN-ON predicate streams.
//!
//! Dispatch is statement-type driven: SELECT (including nested subqueries
//! and set operations), UPDATE and DELETE are recognized, and every nested
//! SELECT reachable through a FROM/JOIN item is visited. A subtree the
//! walker does not model is skipped and logged, never fatal.

use std::collections::HashMap;

use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, FromTable, JoinConstraint, JoinOperator, ObjectName, ObjectNamePart,
    Query, Select, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::model::{JoinPredicate, ParameterRef, Predicate, UnclassifiedPredicate};
use crate::AnalyzeError;

/// Result of one `extract` call. WHERE and JOIN predicates are numbered by
/// two independent counters, both reset per call; `where_has_or` records
/// whether any OR was seen anywhere in a WHERE tree, which disables
/// reordering advice downstream.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub where_predicates: Vec<Predicate>,
    pub join_predicates: Vec<JoinPredicate>,
    pub where_has_or: bool,
}

pub struct ConditionWalker<'a> {
    classifier: &'a Classifier,
}

impl<'a> ConditionWalker<'a> {
    pub fn new(classifier: &'a Classifier) -> Self {
        Self { classifier }
    }

    /// Parse `sql` as a single statement and extract its predicates.
    pub fn extract_sql(&self, sql: &str, default_table: &str) -> Result<Extraction, AnalyzeError> {
        let dialect = GenericDialect {};
        let mut statements =
            Parser::parse_sql(&dialect, sql).map_err(|e| AnalyzeError::Parse(e.to_string()))?;
        if statements.len() != 1 {
            return Err(AnalyzeError::Unsupported(
                "expected exactly one statement".to_string(),
            ));
        }
        Ok(self.extract(&statements.remove(0), default_table, sql))
    }

    /// Extract from an already-parsed statement. `raw_sql` backs the
    /// best-effort alias-resolution fallback and may be empty.
    pub fn extract(&self, statement: &Statement, default_table: &str, raw_sql: &str) -> Extraction {
        let mut walk = Walk::new(raw_sql);
        match statement {
            Statement::Query(query) => walk.query(query, default_table),
            Statement::Update { table, selection, .. } => {
                let aliases = alias_map(std::slice::from_ref(table));
                let target =
                    table_factor_name(&table.relation).unwrap_or_else(|| default_table.to_string());
                if let Some(expr) = selection {
                    walk.where_expr(expr, &aliases, &target);
                }
            }
            Statement::Delete(delete) => {
                // Target resolution order: explicit table list, then the
                // generic FROM items.
                let from_items = match &delete.from {
                    FromTable::WithFromKeyword(items) | FromTable::WithoutKeyword(items) => items,
                };
                let aliases = alias_map(from_items);
                let target = delete
                    .tables
                    .first()
                    .map(object_name_tail)
                    .or_else(|| {
                        from_items
                            .first()
                            .and_then(|item| table_factor_name(&item.relation))
                    })
                    .unwrap_or_else(|| default_table.to_string());
                if let Some(expr) = &delete.selection {
                    walk.where_expr(expr, &aliases, &target);
                }
            }
            _ => debug!("skipping statement shape with no extractable predicates"),
        }

        let where_predicates = walk
            .where_out
            .into_iter()
            .map(|raw| {
                let table = raw.table.as_deref().unwrap_or(default_table);
                let level = self.classifier.classify(table, &raw.column);
                raw.classified(level)
            })
            .collect();

        Extraction {
            where_predicates,
            join_predicates: walk.join_out,
            where_has_or: walk.where_has_or,
        }
    }
}

struct Walk<'a> {
    raw_sql: &'a str,
    where_out: Vec<UnclassifiedPredicate>,
    join_out: Vec<JoinPredicate>,
    placeholder_ordinal: usize,
    where_has_or: bool,
}

impl<'a> Walk<'a> {
    fn new(raw_sql: &'a str) -> Self {
        Self {
            raw_sql,
            where_out: Vec::new(),
            join_out: Vec::new(),
            placeholder_ordinal: 0,
            where_has_or: false,
        }
    }

    fn query(&mut self, query: &Query, inherited_default: &str) {
        self.set_expr(&query.body, inherited_default);
    }

    fn set_expr(&mut self, body: &SetExpr, inherited_default: &str) {
        match body {
            SetExpr::Select(select) => self.select(select, inherited_default),
            SetExpr::Query(query) => self.query(query, inherited_default),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, inherited_default);
                self.set_expr(right, inherited_default);
            }
            _ => debug!("skipping set expression with no extractable predicates"),
        }
    }

    fn select(&mut self, select: &Select, inherited_default: &str) {
        let aliases = alias_map(&select.from);
        let default = select
            .from
            .first()
            .and_then(|item| table_factor_name(&item.relation))
            .unwrap_or_else(|| inherited_default.to_string());

        for item in &select.from {
            self.from_item(item, &aliases, &default);
        }
        if let Some(selection) = &select.selection {
            self.where_expr(selection, &aliases, &default);
        }
    }

    fn from_item(
        &mut self,
        item: &TableWithJoins,
        aliases: &HashMap<String, String>,
        default: &str,
    ) {
        self.table_factor(&item.relation, aliases, default);
        for join in &item.joins {
            self.table_factor(&join.relation, aliases, default);
            if let Some(on_expr) = join_on_expr(&join.join_operator) {
                self.join_expr(on_expr, aliases, default);
            }
        }
    }

    fn table_factor(
        &mut self,
        factor: &TableFactor,
        aliases: &HashMap<String, String>,
        default: &str,
    ) {
        match factor {
            TableFactor::Derived { subquery, .. } => self.query(subquery, default),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.from_item(table_with_joins, aliases, default),
            _ => {}
        }
    }

    fn where_expr(&mut self, expr: &Expr, aliases: &HashMap<String, String>, default: &str) {
        match expr {
            Expr::BinaryOp { left, op, right } => match op {
                // AND is traversed left-then-right so positions keep
                // source order.
                BinaryOperator::And => {
                    self.where_expr(left, aliases, default);
                    self.where_expr(right, aliases, default);
                }
                BinaryOperator::Or => {
                    self.where_has_or = true;
                    self.where_expr(left, aliases, default);
                    self.where_expr(right, aliases, default);
                }
                op if is_comparison(op) => {
                    self.comparison(left, op, right, aliases, default);
                }
                _ => debug!("skipping WHERE operator with no predicate shape"),
            },
            Expr::Nested(inner) => self.where_expr(inner, aliases, default),
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let parameter = self.bind_placeholders(&[low, high]);
                let operator = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                self.push_where(expr, operator, parameter, aliases, default);
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let values: Vec<&Expr> = list.iter().collect();
                let parameter = self.bind_placeholders(&values);
                let operator = if *negated { "NOT IN" } else { "IN" };
                self.push_where(expr, operator, parameter, aliases, default);
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let operator = if *negated { "NOT IN" } else { "IN" };
                self.push_where(expr, operator, None, aliases, default);
                self.query(subquery, default);
            }
            Expr::IsNull(inner) => self.push_where(inner, "IS NULL", None, aliases, default),
            Expr::IsNotNull(inner) => self.push_where(inner, "IS NOT NULL", None, aliases, default),
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let parameter = self.bind_placeholders(&[pattern]);
                let operator = if *negated { "NOT LIKE" } else { "LIKE" };
                self.push_where(expr, operator, parameter, aliases, default);
            }
            Expr::Exists { subquery, .. } => self.query(subquery, default),
            Expr::Subquery(subquery) => self.query(subquery, default),
            _ => debug!("skipping unrecognized WHERE expression shape"),
        }
    }

    fn comparison(
        &mut self,
        left: &Expr,
        op: &BinaryOperator,
        right: &Expr,
        aliases: &HashMap<String, String>,
        default: &str,
    ) {
        let operator = op.to_string();
        match (column_ref(left), column_ref(right)) {
            (Some(column), _) => {
                let parameter = self.bind_placeholders(&[right]);
                self.push_column(column, &operator, parameter, aliases, default);
            }
            (None, Some(column)) => {
                let parameter = self.bind_placeholders(&[left]);
                self.push_column(column, &operator, parameter, aliases, default);
            }
            (None, None) => debug!("skipping comparison without a column operand"),
        }
        if let Expr::Subquery(subquery) = right {
            self.query(subquery, default);
        }
    }

    fn push_where(
        &mut self,
        column_expr: &Expr,
        operator: &str,
        parameter: Option<ParameterRef>,
        aliases: &HashMap<String, String>,
        default: &str,
    ) {
        match column_ref(column_expr) {
            Some(column) => self.push_column(column, operator, parameter, aliases, default),
            None => debug!("skipping {operator} test without a column operand"),
        }
    }

    fn push_column(
        &mut self,
        column: ColumnRef,
        operator: &str,
        parameter: Option<ParameterRef>,
        aliases: &HashMap<String, String>,
        default: &str,
    ) {
        let table = self.resolve_table(column.qualifier.as_deref(), aliases, default);
        let position = self.where_out.len();
        self.where_out.push(UnclassifiedPredicate {
            table,
            column: column.column,
            operator: operator.to_string(),
            position,
            parameter,
        });
    }

    fn join_expr(&mut self, expr: &Expr, aliases: &HashMap<String, String>, default: &str) {
        match expr {
            Expr::BinaryOp { left, op, right }
                if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
            {
                self.join_expr(left, aliases, default);
                self.join_expr(right, aliases, default);
            }
            Expr::Nested(inner) => self.join_expr(inner, aliases, default),
            Expr::BinaryOp { left, op, right } if is_comparison(op) => {
                // Only column-to-column comparisons are join predicates;
                // column-to-literal tests inside ON are filtering.
                if let (Some(l), Some(r)) = (column_ref(left), column_ref(right)) {
                    let left_table = self
                        .resolve_table(l.qualifier.as_deref(), aliases, default)
                        .unwrap_or_else(|| default.to_string());
                    let right_table = self
                        .resolve_table(r.qualifier.as_deref(), aliases, default)
                        .unwrap_or_else(|| default.to_string());
                    let position = self.join_out.len();
                    self.join_out.push(JoinPredicate {
                        left_table,
                        left_column: l.column,
                        right_table,
                        right_column: r.column,
                        operator: op.to_string(),
                        position,
                    });
                }
            }
            _ => {}
        }
    }

    /// Map a column qualifier back to a physical table: the statement's
    /// alias map first, then the qualifier itself when it already looks
    /// like a table name, then a best-effort scan of the raw statement
    /// text for a `FROM <table> <alias>` / `JOIN <table> <alias>` pattern,
    /// and finally the statement's default table.
    fn resolve_table(
        &self,
        qualifier: Option<&str>,
        aliases: &HashMap<String, String>,
        default: &str,
    ) -> Option<String> {
        let fallback = || {
            if default.is_empty() {
                None
            } else {
                Some(default.to_string())
            }
        };
        let qualifier = match qualifier {
            Some(q) => q,
            None => return fallback(),
        };
        if let Some(table) = aliases.get(&qualifier.to_ascii_lowercase()) {
            return Some(table.clone());
        }
        if qualifier.eq_ignore_ascii_case(default) {
            return fallback();
        }
        if qualifier.contains('_') {
            return Some(qualifier.to_string());
        }
        if let Some(table) = scan_raw_for_alias(self.raw_sql, qualifier) {
            return Some(table);
        }
        warn!("could not resolve table qualifier `{qualifier}`, using default table");
        fallback()
    }

    /// Scan `values` in source order, consuming one ordinal per anonymous
    /// placeholder, and return the first placeholder seen.
    fn bind_placeholders(&mut self, values: &[&Expr]) -> Option<ParameterRef> {
        let mut first = None;
        for value in values {
            if let Expr::Value(value) = value {
                if let Value::Placeholder(text) = &value.value {
                    let reference = if text == "?" {
                        let ordinal = self.placeholder_ordinal;
                        self.placeholder_ordinal += 1;
                        ParameterRef::Positional(ordinal)
                    } else {
                        ParameterRef::Named(text.trim_start_matches(':').to_string())
                    };
                    if first.is_none() {
                        first = Some(reference);
                    }
                }
            }
        }
        first
    }
}

struct ColumnRef {
    qualifier: Option<String>,
    column: String,
}

fn column_ref(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef {
            qualifier: None,
            column: ident.value.clone(),
        }),
        Expr::CompoundIdentifier(idents) if idents.len() >= 2 => Some(ColumnRef {
            qualifier: Some(idents[idents.len() - 2].value.clone()),
            column: idents.last()?.value.clone(),
        }),
        _ => None,
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
    )
}

fn join_on_expr(operator: &JoinOperator) -> Option<&Expr> {
    let constraint = match operator {
        JoinOperator::Join(constraint)
        | JoinOperator::Inner(constraint)
        | JoinOperator::Left(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::Right(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint) => Some(constraint),
        _ => None,
    };
    match constraint {
        Some(JoinConstraint::On(expr)) => Some(expr),
        _ => None,
    }
}

fn alias_map(items: &[TableWithJoins]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for item in items {
        insert_factor(&mut map, &item.relation);
        for join in &item.joins {
            insert_factor(&mut map, &join.relation);
        }
    }
    map
}

fn insert_factor(map: &mut HashMap<String, String>, factor: &TableFactor) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table = object_name_tail(name);
            if let Some(alias) = alias {
                map.insert(alias.name.value.to_ascii_lowercase(), table.clone());
            }
            map.insert(table.to_ascii_lowercase(), table);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            insert_factor(map, &table_with_joins.relation);
            for join in &table_with_joins.joins {
                insert_factor(map, &join.relation);
            }
        }
        _ => {}
    }
}

fn table_factor_name(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, .. } => Some(object_name_tail(name)),
        _ => None,
    }
}

fn object_name_tail(name: &ObjectName) -> String {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.clone())
        .unwrap_or_else(|| name.to_string())
}

fn scan_raw_for_alias(raw_sql: &str, qualifier: &str) -> Option<String> {
    if raw_sql.is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_.]*)\s+(?:as\s+)?{}\b",
        regex::escape(qualifier)
    );
    let regex = Regex::new(&pattern).ok()?;
    let table = regex.captures(raw_sql)?.get(1)?.as_str();
    Some(camel_to_snake(table))
}

fn camel_to_snake(name: &str) -> String {
    if name.contains('_') || !name.chars().any(|c| c.is_ascii_uppercase()) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
