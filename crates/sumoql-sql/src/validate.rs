//! Validation of model-generated SQL
//!
//! Checks, in order:
//! - the text parses as DuckDB SQL
//! - it is a single read-only (query-class) statement
//! - every relation and column it references exists in the schema

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use sqlparser::ast::{
    visit_expressions, Expr, Ident, ObjectName, Query, Select, SelectItem, SetExpr, Statement,
    TableAlias, TableFactor, TableWithJoins, Visit, Visitor,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

use crate::candidate::CandidateQuery;
use crate::schema::SchemaDescriptor;

/// Unquoted words that never appear in a read-only statement
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE", "COPY", "ATTACH",
    "DETACH", "INSTALL", "LOAD", "GRANT", "REVOKE", "PRAGMA", "VACUUM", "CHECKPOINT", "EXPORT",
    "IMPORT",
];

/// Why a candidate was rejected. The display text is fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum InvalidReason {
    #[error("unparseable model response")]
    Unparseable,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("non-read-only statement")]
    NonReadOnly,

    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
}

/// A candidate that passed validation; the only input the executor accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    attempt: u32,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid(ValidatedQuery),
    Invalid(InvalidReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// Validator bound to one schema
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Arc<SchemaDescriptor>,
}

impl Validator {
    pub fn new(schema: Arc<SchemaDescriptor>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn validate(&self, candidate: &CandidateQuery) -> ValidationOutcome {
        validate(candidate, &self.schema)
    }
}

/// Validate a candidate against the schema
pub fn validate(candidate: &CandidateQuery, schema: &SchemaDescriptor) -> ValidationOutcome {
    match check(candidate, schema) {
        Ok(()) => ValidationOutcome::Valid(ValidatedQuery {
            sql: candidate.sql.clone(),
            attempt: candidate.attempt,
        }),
        Err(reason) => {
            tracing::debug!(attempt = candidate.attempt, %reason, "Candidate rejected");
            ValidationOutcome::Invalid(reason)
        }
    }
}

fn check(candidate: &CandidateQuery, schema: &SchemaDescriptor) -> Result<(), InvalidReason> {
    if candidate.unparseable || candidate.sql.trim().is_empty() {
        return Err(InvalidReason::Unparseable);
    }

    let dialect = DuckDbDialect {};

    // 1. Syntax
    let statements = Parser::parse_sql(&dialect, &candidate.sql)
        .map_err(|e| InvalidReason::Syntax(e.to_string()))?;

    // 2. Statement type
    if !statements.iter().all(is_read_only_statement) || has_write_keyword(&dialect, &candidate.sql) {
        return Err(InvalidReason::NonReadOnly);
    }
    if statements.len() != 1 {
        return Err(InvalidReason::StatementCount(statements.len()));
    }

    // 3. Schema conformance
    let statement = &statements[0];
    let scope = Scope::collect(statement);
    let mut checker = ReferenceChecker { schema, scope: &scope };
    match statement.visit(&mut checker) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(identifier) => Err(InvalidReason::UnknownIdentifier(identifier)),
    }
}

fn is_read_only_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => is_read_only_query(query),
        _ => false,
    }
}

fn is_read_only_query(query: &Query) -> bool {
    let ctes_read_only = query
        .with
        .as_ref()
        .map_or(true, |with| with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)));

    ctes_read_only && is_read_only_body(&query.body)
}

fn is_read_only_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_body(left) && is_read_only_body(right)
        }
        SetExpr::Values(_) => true,
        _ => false,
    }
}

/// Token-level scan so a write keyword can't hide anywhere in the tree.
/// String literals are separate tokens and don't match.
fn has_write_keyword(dialect: &DuckDbDialect, sql: &str) -> bool {
    let tokens = match Tokenizer::new(dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return true,
    };

    tokens.iter().any(|token| match token {
        Token::Word(word) if word.quote_style.is_none() => WRITE_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&word.value)),
        _ => false,
    })
}

fn normalize(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

/// Names a statement declares for itself: CTEs, table aliases and
/// projection aliases
#[derive(Debug, Default)]
struct Scope {
    relations: HashSet<String>,
    qualifiers: HashSet<String>,
    columns: HashSet<String>,
}

impl Scope {
    fn collect(statement: &Statement) -> Self {
        let mut scope = Scope::default();
        scope.qualifiers.insert("main".to_string());

        if let Statement::Query(query) = statement {
            scope.declare_query(query);
        }

        // Subqueries nested in expressions declare their own aliases
        let _ = visit_expressions(statement, |expr| {
            match expr {
                Expr::Subquery(query)
                | Expr::InSubquery { subquery: query, .. }
                | Expr::Exists { subquery: query, .. } => scope.declare_query(query),
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });

        scope
    }

    fn declare_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.relations.insert(normalize(&cte.alias.name));
                self.declare_alias(&cte.alias);
                self.declare_query(&cte.query);
            }
        }
        self.declare_body(&query.body);
    }

    fn declare_body(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.declare_select(select),
            SetExpr::Query(query) => self.declare_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.declare_body(left);
                self.declare_body(right);
            }
            _ => {}
        }
    }

    fn declare_select(&mut self, select: &Select) {
        for item in &select.projection {
            if let SelectItem::ExprWithAlias { alias, .. } = item {
                self.columns.insert(normalize(alias));
            }
        }
        for table in &select.from {
            self.declare_table_with_joins(table);
        }
    }

    fn declare_table_with_joins(&mut self, table: &TableWithJoins) {
        self.declare_factor(&table.relation);
        for join in &table.joins {
            self.declare_factor(&join.relation);
        }
    }

    fn declare_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                if let Some(last) = name.0.last() {
                    self.qualifiers.insert(normalize(last));
                }
                if let Some(alias) = alias {
                    self.declare_alias(alias);
                }
            }
            TableFactor::Derived { subquery, alias, .. } => {
                self.declare_query(subquery);
                if let Some(alias) = alias {
                    self.declare_alias(alias);
                }
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                self.declare_table_with_joins(table_with_joins);
                if let Some(alias) = alias {
                    self.declare_alias(alias);
                }
            }
            _ => {}
        }
    }

    fn declare_alias(&mut self, alias: &TableAlias) {
        self.qualifiers.insert(normalize(&alias.name));
        for column in &alias.columns {
            self.columns.insert(normalize(column));
        }
    }
}

struct ReferenceChecker<'a> {
    schema: &'a SchemaDescriptor,
    scope: &'a Scope,
}

impl ReferenceChecker<'_> {
    fn is_column(&self, ident: &Ident) -> bool {
        self.schema.has_column(&ident.value) || self.scope.columns.contains(&normalize(ident))
    }

    /// Tables and aliases the statement actually brings into scope
    fn is_qualifier(&self, ident: &Ident) -> bool {
        self.scope.qualifiers.contains(&normalize(ident))
    }
}

impl Visitor for ReferenceChecker<'_> {
    type Break = String;

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let known = relation.0.last().map_or(false, |name| {
            self.schema.has_table(&name.value) || self.scope.relations.contains(&normalize(name))
        });

        if known {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(relation.to_string())
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => {
                if self.is_column(ident) || self.is_qualifier(ident) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(ident.value.clone())
                }
            }
            Expr::CompoundIdentifier(parts) => {
                // Skip leading qualifiers (schema, table, alias); the first
                // remaining part must be a column. Anything after it is a
                // struct field access. A chain of qualifiers only is fine
                // when its last part also names a column.
                let known = match parts.iter().position(|p| !self.is_qualifier(p)) {
                    None => parts.last().map_or(false, |p| self.is_column(p)),
                    Some(idx) => self.is_column(&parts[idx]),
                };

                if known {
                    ControlFlow::Continue(())
                } else {
                    let name = parts
                        .iter()
                        .map(|p| p.value.as_str())
                        .collect::<Vec<_>>()
                        .join(".");
                    ControlFlow::Break(name)
                }
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableDescriptor};

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new(vec![
            TableDescriptor::new(
                "bots",
                vec![
                    ColumnDescriptor::new("bot_id", "INTEGER").not_null(),
                    ColumnDescriptor::new("name", "VARCHAR"),
                    ColumnDescriptor::new("language", "VARCHAR"),
                ],
            ),
            TableDescriptor::new(
                "matches",
                vec![
                    ColumnDescriptor::new("match_id", "INTEGER").not_null(),
                    ColumnDescriptor::new("left_bot_id", "INTEGER"),
                    ColumnDescriptor::new("right_bot_id", "INTEGER"),
                    ColumnDescriptor::new("winner_bot_id", "INTEGER"),
                    ColumnDescriptor::new("duration_s", "DOUBLE"),
                ],
            ),
            TableDescriptor::new(
                "events",
                vec![
                    ColumnDescriptor::new("match_id", "INTEGER"),
                    ColumnDescriptor::new("Action", "VARCHAR"),
                ],
            ),
        ])
    }

    fn run(sql: &str) -> ValidationOutcome {
        let candidate = CandidateQuery::from_response(sql, 0, None);
        validate(&candidate, &schema())
    }

    fn reason(sql: &str) -> InvalidReason {
        match run(sql) {
            ValidationOutcome::Invalid(reason) => reason,
            ValidationOutcome::Valid(q) => panic!("expected rejection, got valid: {}", q.sql()),
        }
    }

    fn assert_valid(sql: &str) {
        if let ValidationOutcome::Invalid(reason) = run(sql) {
            panic!("expected valid, got {reason} for {sql}");
        }
    }

    #[test]
    fn test_simple_select_is_valid() {
        match run("SELECT COUNT(*) FROM matches;") {
            ValidationOutcome::Valid(q) => {
                assert_eq!(q.sql(), "SELECT COUNT(*) FROM matches");
                assert_eq!(q.attempt(), 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_write_statements_rejected() {
        for sql in [
            "DELETE FROM matches",
            "DROP TABLE matches",
            "UPDATE bots SET name = 'x'",
            "INSERT INTO bots SELECT * FROM bots",
            "ALTER TABLE bots ADD COLUMN x INTEGER",
            "CREATE TABLE t AS SELECT * FROM bots",
        ] {
            assert_eq!(reason(sql), InvalidReason::NonReadOnly, "{sql}");
        }
        assert_eq!(InvalidReason::NonReadOnly.to_string(), "non-read-only statement");
    }

    #[test]
    fn test_hidden_write_rejected() {
        assert_eq!(
            reason("SELECT * FROM bots; DROP TABLE bots"),
            InvalidReason::NonReadOnly
        );
        assert_eq!(
            reason("SELECT * INTO bots_copy FROM bots"),
            InvalidReason::NonReadOnly
        );
    }

    #[test]
    fn test_multiple_selects_rejected() {
        assert_eq!(
            reason("SELECT 1; SELECT 2"),
            InvalidReason::StatementCount(2)
        );
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(reason("SELECT FROM WHERE"), InvalidReason::Syntax(_)));
    }

    #[test]
    fn test_unparseable_candidate() {
        let candidate = CandidateQuery::unparseable("no idea", 2);
        assert_eq!(
            validate(&candidate, &schema()),
            ValidationOutcome::Invalid(InvalidReason::Unparseable)
        );
    }

    #[test]
    fn test_unknown_table() {
        assert_eq!(
            reason("SELECT * FROM players"),
            InvalidReason::UnknownIdentifier("players".to_string())
        );
        assert_eq!(
            InvalidReason::UnknownIdentifier("players".to_string()).to_string(),
            "unknown identifier: players"
        );
    }

    #[test]
    fn test_unknown_column() {
        assert_eq!(
            reason("SELECT loser_bot_id FROM matches"),
            InvalidReason::UnknownIdentifier("loser_bot_id".to_string())
        );
        assert_eq!(
            reason("SELECT x.name FROM bots b"),
            InvalidReason::UnknownIdentifier("x.name".to_string())
        );
    }

    #[test]
    fn test_qualifier_must_be_in_scope() {
        assert_eq!(
            reason("SELECT bots.name FROM matches"),
            InvalidReason::UnknownIdentifier("bots.name".to_string())
        );
        assert_eq!(
            reason("SELECT m.bots FROM matches m"),
            InvalidReason::UnknownIdentifier("m.bots".to_string())
        );
        assert_valid("SELECT bots.name FROM bots");
        assert_valid(
            "SELECT name FROM bots WHERE EXISTS \
             (SELECT 1 FROM matches m WHERE m.winner_bot_id = bots.bot_id)",
        );
    }

    #[test]
    fn test_double_quoted_literal_is_identifier() {
        assert_eq!(
            reason("SELECT * FROM bots WHERE name = \"Bot_01\""),
            InvalidReason::UnknownIdentifier("Bot_01".to_string())
        );
    }

    #[test]
    fn test_aliases_and_ctes() {
        assert_valid(
            "SELECT winner_bot_id, COUNT(*) AS wins FROM matches \
             GROUP BY winner_bot_id ORDER BY wins DESC LIMIT 5",
        );
        assert_valid(
            "WITH participants AS (\
                SELECT left_bot_id AS bot_id FROM matches \
                UNION SELECT right_bot_id FROM matches \
                UNION SELECT winner_bot_id FROM matches) \
             SELECT COUNT(DISTINCT bot_id) FROM participants",
        );
        assert_valid(
            "SELECT b.name, COUNT(*) AS wins FROM matches m \
             JOIN bots b ON m.winner_bot_id = b.bot_id GROUP BY b.name",
        );
        assert_valid(
            "SELECT t.total FROM (SELECT COUNT(*) AS total FROM matches) AS t",
        );
        assert_valid(
            "SELECT name FROM bots WHERE bot_id IN (SELECT winner_bot_id FROM matches WHERE duration_s > 10)",
        );
    }

    #[test]
    fn test_case_insensitive_and_string_literals() {
        assert_valid("select Winner_Bot_Id from MATCHES where Winner_Bot_Id = 3");
        assert_valid("SELECT COUNT(*) FROM events WHERE action = 'delete'");
        assert_valid("SELECT AVG(main.matches.duration_s) FROM main.matches");
    }

    #[test]
    fn test_valid_never_contains_write_keywords_or_unknown_names() {
        let candidates = [
            "SELECT COUNT(*) FROM matches",
            "DELETE FROM matches",
            "SELECT * FROM ghosts",
            "SELECT name FROM bots ORDER BY name",
            "DROP TABLE bots",
            "SELECT nope FROM bots",
        ];

        for sql in candidates {
            if let ValidationOutcome::Valid(q) = run(sql) {
                let upper = q.sql().to_uppercase();
                for keyword in ["INSERT", "UPDATE", "DELETE", "DROP", "ALTER"] {
                    assert!(!upper.contains(keyword), "{sql}");
                }
                assert!(!upper.contains("GHOSTS") && !upper.contains("NOPE"), "{sql}");
            }
        }
    }
}
