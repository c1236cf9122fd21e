//! Clause extraction: AST → `QueryDescriptor`
//!
//! The descriptor is the flat, per-clause view of a SELECT that the step
//! pipeline walks. It keeps both the raw text of every clause and, when the
//! statement parsed, the typed expressions behind it.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::ast::*;
use crate::parser::parse;
use crate::validate::first_from_table;

/// Clauses in SQL's logical evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClauseKind {
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectColumn {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub kind: SelectKind,
    pub aggregate: bool,
    #[serde(skip)]
    pub expr: Option<Expr>,
}

impl SelectColumn {
    /// Column header this item produces in a result set.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.kind {
            SelectKind::Column(col) => col.column.clone(),
            _ => self.expression.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectKind {
    Wildcard,
    QualifiedWildcard { table: String },
    Column(ColumnRef),
    Expression,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Key columns when the condition is a single column equality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equality: Option<(ColumnRef, ColumnRef)>,
    /// Came from a comma-separated FROM list rather than a JOIN keyword.
    pub implicit: bool,
}

impl JoinClause {
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTerm {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
struct ClauseSpans {
    select_list: Option<Span>,
    from: Option<Span>,
    relation_end: usize,
    starts: BTreeMap<ClauseKind, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub sql: String,
    pub distinct: bool,
    pub select_columns: Vec<SelectColumn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_alias: Option<String>,
    pub table_aliases: BTreeMap<String, String>,
    pub joins: Vec<JoinClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    pub group_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<String>,
    pub order_by: Vec<OrderTerm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub aggregates: Vec<String>,
    /// Set when the grammar could not parse the statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(skip)]
    pub group_keys: Vec<KeyExpr>,
    #[serde(skip)]
    spans: ClauseSpans,
}

impl QueryDescriptor {
    /// Extract clauses from a normalized SELECT.
    ///
    /// Never fails: when the grammar rejects the statement, the descriptor
    /// carries only the base table and the statement is left for the engine
    /// to judge.
    pub fn extract(sql: &str) -> Self {
        match parse(sql) {
            Ok(stmt) => Self::from_statement(sql, stmt),
            Err(err) => Self::partial(sql, err.to_string()),
        }
    }

    fn partial(sql: &str, parse_error: String) -> Self {
        let from_table = first_from_table(sql);
        let mut table_aliases = BTreeMap::new();
        if let Some(table) = &from_table {
            table_aliases.insert(table.clone(), table.clone());
        }
        Self {
            sql: sql.to_string(),
            distinct: false,
            select_columns: Vec::new(),
            from_table,
            from_alias: None,
            table_aliases,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            aggregates: Vec::new(),
            parse_error: Some(parse_error),
            group_keys: Vec::new(),
            spans: ClauseSpans::default(),
        }
    }

    pub fn from_statement(sql: &str, stmt: SelectStatement) -> Self {
        let mut spans = ClauseSpans {
            select_list: Some(stmt.select_list),
            from: Some(stmt.from_span),
            relation_end: stmt.from_span.end,
            starts: BTreeMap::new(),
        };

        let mut from_tables = stmt.from.into_iter();
        let base = from_tables.next();

        // Aliases are registered in FROM/JOIN order so a later alias can shadow an earlier one.
        let mut table_aliases = BTreeMap::new();
        let mut register = |table: &TableRef| {
            table_aliases.insert(table.name.clone(), table.name.clone());
            if let Some(alias) = &table.alias {
                table_aliases.insert(alias.clone(), table.name.clone());
            }
        };
        if let Some(base) = &base {
            register(base);
        }

        let mut joins = Vec::new();
        for table in from_tables {
            register(&table);
            joins.push(JoinClause {
                join_type: JoinType::Cross,
                table: table.name,
                alias: table.alias,
                condition: None,
                equality: None,
                implicit: true,
            });
        }
        for join in stmt.joins {
            register(&join.table);
            spans.relation_end = spans.relation_end.max(join.span.end);
            let equality = join
                .on
                .as_ref()
                .and_then(|on| on.single_equality())
                .map(|(l, r)| (l.clone(), r.clone()));
            joins.push(JoinClause {
                join_type: join.join_type,
                table: join.table.name,
                alias: join.table.alias,
                condition: join.on_text,
                equality,
                implicit: false,
            });
        }

        let mut aggregate_calls: Vec<String> = Vec::new();
        let mut note_aggregates = |expr: &Expr| {
            let mut found = Vec::new();
            expr.collect_aggregates(&mut found);
            for call in found {
                if !aggregate_calls.contains(&call.text) {
                    aggregate_calls.push(call.text.clone());
                }
            }
        };

        let select_columns = stmt
            .items
            .into_iter()
            .map(|item| match item {
                SelectItem::Wildcard => SelectColumn {
                    expression: "*".to_string(),
                    alias: None,
                    kind: SelectKind::Wildcard,
                    aggregate: false,
                    expr: None,
                },
                SelectItem::QualifiedWildcard { table } => SelectColumn {
                    expression: format!("{}.*", table),
                    alias: None,
                    kind: SelectKind::QualifiedWildcard { table },
                    aggregate: false,
                    expr: None,
                },
                SelectItem::Expr { expr, alias, text } => {
                    note_aggregates(&expr);
                    let kind = match expr.as_column() {
                        Some(col) => SelectKind::Column(col.clone()),
                        None => SelectKind::Expression,
                    };
                    SelectColumn {
                        expression: text,
                        alias,
                        kind,
                        aggregate: expr.contains_aggregate(),
                        expr: Some(expr),
                    }
                }
            })
            .collect();

        let where_clause = stmt.where_clause.map(|clause| {
            spans.starts.insert(ClauseKind::Where, clause.span.start);
            spans.relation_end = spans.relation_end.max(clause.span.end);
            clause.text
        });

        let group_keys = match stmt.group_by {
            Some(clause) => {
                spans.starts.insert(ClauseKind::GroupBy, clause.span.start);
                clause.node
            }
            None => Vec::new(),
        };
        let group_by = group_keys.iter().map(|k| k.text.clone()).collect();

        let having = stmt.having.map(|clause| {
            spans.starts.insert(ClauseKind::Having, clause.span.start);
            note_aggregates(&clause.node);
            clause.text
        });

        let order_by = match stmt.order_by {
            Some(clause) => {
                spans.starts.insert(ClauseKind::OrderBy, clause.span.start);
                clause
                    .node
                    .into_iter()
                    .map(|key| OrderTerm {
                        column: key.text,
                        direction: if key.desc { SortDirection::Desc } else { SortDirection::Asc },
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let limit = stmt.limit.map(|clause| {
            spans.starts.insert(ClauseKind::Limit, clause.span.start);
            clause.node
        });
        let offset = stmt.offset.map(|clause| {
            spans.starts.insert(ClauseKind::Offset, clause.span.start);
            clause.node
        });

        Self {
            sql: sql.to_string(),
            distinct: stmt.distinct,
            select_columns,
            from_table: base.as_ref().map(|t| t.name.clone()),
            from_alias: base.and_then(|t| t.alias),
            table_aliases,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
            aggregates: aggregate_calls,
            parse_error: None,
            group_keys,
            spans,
        }
    }

    /// Whether the grammar parsed the statement fully.
    pub fn is_complete(&self) -> bool {
        self.parse_error.is_none()
    }

    /// Resolve an alias (or table name) to its table.
    pub fn resolve_table<'a>(&'a self, qualifier: &'a str) -> &'a str {
        self.table_aliases
            .get(qualifier)
            .map(String::as_str)
            .unwrap_or(qualifier)
    }

    /// Qualifier of the base table as written in FROM.
    pub fn from_qualifier(&self) -> Option<&str> {
        self.from_alias.as_deref().or(self.from_table.as_deref())
    }

    /// Qualifiers of every participating table in FROM/JOIN order.
    pub fn qualifiers(&self) -> Vec<&str> {
        self.from_qualifier()
            .into_iter()
            .chain(self.joins.iter().map(JoinClause::qualifier))
            .collect()
    }

    pub fn selects_everything(&self) -> bool {
        self.select_columns.iter().all(|c| c.kind == SelectKind::Wildcard)
    }

    pub fn is_aggregate_query(&self) -> bool {
        !self.group_by.is_empty() || self.select_columns.iter().any(|c| c.aggregate)
    }

    /// Statement text up to (excluding) the earliest clause at or after `kind`.
    pub fn truncate_before(&self, kind: ClauseKind) -> &str {
        let cut = self
            .spans
            .starts
            .range(kind..)
            .map(|(_, start)| *start)
            .min()
            .unwrap_or(self.sql.len());
        self.sql[..cut].trim_end()
    }

    /// The statement cut before `kind`, with `extra` appended to the SELECT list.
    pub fn with_select_appended(&self, extra: &str, kind: ClauseKind) -> Option<String> {
        let list = self.spans.select_list?;
        let cut = self.truncate_before(kind).len();
        (list.end <= cut).then(|| format!("{}, {}{}", &self.sql[..list.end], extra, &self.sql[list.end..cut]))
    }

    /// Raw text of the SELECT list.
    pub fn select_list_text(&self) -> Option<&str> {
        self.spans.select_list.map(|span| span.slice(&self.sql))
    }

    /// FROM, JOIN and WHERE clauses as written, keywords included.
    pub fn relation_text(&self) -> Option<&str> {
        self.spans
            .from
            .map(|from| self.sql[from.start..self.spans.relation_end].trim())
    }

    /// FROM and JOIN clauses without WHERE.
    pub fn source_text(&self) -> Option<&str> {
        let from = self.spans.from?;
        let end = match self.spans.starts.get(&ClauseKind::Where) {
            Some(start) => *start,
            None => self.spans.relation_end,
        };
        Some(self.sql[from.start..end].trim())
    }

    /// SHA-256 of the statement text, used to correlate log lines.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
