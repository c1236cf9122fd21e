//! Step pipeline: Scan → Join* → Filter → GroupBy → Having → Project → OrderBy → Limit
//!
//! Each stage either transforms the running table locally or re-issues part
//! of the statement to the engine and reconciles the authoritative answer
//! with the rows it had before. A failing engine call aborts the run; the
//! steps built so far are still returned.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use sqlstep_ast::{
    check_statement_keyword, classify, normalize, target_table, validate, ClauseKind, Expr, JoinClause, KeyExpr,
    QueryDescriptor, SelectKind, SortDirection, StatementKind, ValidationError,
};
use sqlstep_duck::{Engine, QueryOutput};
use sqlstep_ir::{
    cells_equal, unique_column_names, ExecutionResult, FilterStep, Group, GroupByStep, JoinStep, LimitStep,
    OrderByStep, ProjectStep, ProjectedColumn, Row, RowId, ScanStep, SortTerm, Step, TableSnapshot, RESULT_TABLE,
};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::join::{qualify, simulate_join};
use crate::reconcile::{reconcile_by_identity, reconcile_by_value, Reconciliation};
use crate::resolve::ColumnScope;
use crate::translate::translate_error;

const ROWID_COLUMN: &str = "__sqlstep_rowid";
const ID_PREFIX: &str = "__sqlstep_id_";
const EXPR_PREFIX: &str = "__sqlstep_expr_";
const KEY_PREFIX: &str = "__sqlstep_key_";
const GROUP_SEPARATOR: &str = "|";

/// Running table plus the naming scope of its columns.
struct Relation {
    table: TableSnapshot,
    scope: ColumnScope,
}

/// Engine result plus each row's group key tuple, when it was fetched.
struct Keyed {
    table: TableSnapshot,
    ids: Option<Vec<Vec<Value>>>,
}

/// Where a projected value comes from.
enum Source {
    Column(String),
    Computed(usize),
}

struct Output {
    expression: String,
    alias: Option<String>,
    name: String,
    source: Source,
}

pub struct PipelineBuilder<'e> {
    engine: &'e dyn Engine,
}

impl<'e> PipelineBuilder<'e> {
    pub fn new(engine: &'e dyn Engine) -> Self {
        Self { engine }
    }

    /// Replay one statement. Never fails: errors land in `ExecutionResult::error`.
    pub fn run(&self, sql: &str) -> ExecutionResult {
        let started = Instant::now();
        let sql = normalize(sql);
        let mut steps = Vec::new();

        let outcome = self.build(&sql, &mut steps);
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(final_result) => {
                info!(
                    steps = steps.len(),
                    rows = final_result.len(),
                    elapsed_ms = elapsed,
                    "Pipeline completed"
                );
                ExecutionResult::success(steps, final_result, elapsed)
            }
            Err(err) => {
                warn!(
                    kind = err.kind(),
                    error = %err,
                    steps = steps.len(),
                    "Pipeline aborted"
                );
                ExecutionResult::failure(steps, err.to_string(), elapsed)
            }
        }
    }

    fn build(&self, sql: &str, steps: &mut Vec<Step>) -> Result<TableSnapshot, PipelineError> {
        if sql.trim().is_empty() {
            return Err(ValidationError::Empty.into());
        }
        let kind = match classify(sql) {
            Ok(kind) => kind,
            Err(unsupported) => {
                check_statement_keyword(sql)?;
                return Err(unsupported.into());
            }
        };
        match kind {
            StatementKind::Select => self.build_select(sql, steps),
            kind => self.run_modification(sql, kind),
        }
    }

    /// INSERT/UPDATE/DELETE: run it, then show the target table.
    fn run_modification(&self, sql: &str, kind: StatementKind) -> Result<TableSnapshot, PipelineError> {
        let output = self.fetch(sql)?;
        match target_table(sql, kind) {
            Some(table) => Ok(self.scan(&table)?.renamed(table)),
            None => Ok(output.into_snapshot(RESULT_TABLE)),
        }
    }

    fn build_select(&self, sql: &str, steps: &mut Vec<Step>) -> Result<TableSnapshot, PipelineError> {
        validate(sql)?;
        let d = QueryDescriptor::extract(sql);
        debug!(
            fingerprint = %d.fingerprint(),
            complete = d.is_complete(),
            joins = d.joins.len(),
            "Extracted clauses"
        );

        if !d.is_complete() {
            // Beyond what the grammar follows: show the base table and let the engine judge the rest.
            if let Some(base) = &d.from_table {
                let scanned = self.scan(base)?;
                steps.push(scan_step(base, scanned));
            }
            return Ok(self.fetch(sql)?.into_snapshot(RESULT_TABLE));
        }

        let Some(base) = d.from_table.clone() else {
            return Err(ValidationError::MissingTable.into());
        };
        let scanned = self.scan(&base)?;
        steps.push(scan_step(&base, scanned.clone()));

        let mut relation = Relation {
            table: scanned,
            scope: ColumnScope::unprefixed(),
        };

        for clause in &d.joins {
            relation = self.join_step(&d, relation, clause, steps)?;
        }

        if let Some(condition) = &d.where_clause {
            relation.table = self.filter_step(&d, &relation.table, condition, steps)?;
        }

        let grouped = !d.group_by.is_empty();
        let select_labels = unique_column_names(
            &d.select_columns.iter().map(|c| c.output_name()).collect::<Vec<_>>(),
        );

        let keys = group_keys(&d, &relation);
        let mut group_ids = None;
        if grouped {
            let (table, ids) = self.group_step(&d, &relation, &keys, &select_labels, steps)?;
            relation.table = table;
            group_ids = ids;
        }

        if let Some(condition) = &d.having {
            let before = Keyed {
                table: relation.table,
                ids: group_ids,
            };
            relation.table = self.having_step(&d, before, &keys, &select_labels, condition, steps)?;
        }

        let (mut current, labels) = self.project_step(&d, &relation, &select_labels, steps)?;

        if !d.order_by.is_empty() {
            current = self.order_step(&d, &current, &labels, steps)?;
        }

        if d.limit.is_some() || d.offset.is_some() {
            current = self.limit_step(&d, &current, &labels, steps)?;
            return Ok(current.renamed(RESULT_TABLE));
        }

        if !d.order_by.is_empty() {
            // Without LIMIT the ordered statement is the full statement.
            return Ok(current.renamed(RESULT_TABLE));
        }

        Ok(label(self.fetch(sql)?.into_snapshot(RESULT_TABLE), &labels))
    }

    fn join_step(
        &self,
        d: &QueryDescriptor,
        relation: Relation,
        clause: &JoinClause,
        steps: &mut Vec<Step>,
    ) -> Result<Relation, PipelineError> {
        let right = self.scan(&clause.table)?;
        let Relation { table: shown_left, mut scope } = relation;

        let left = if scope.is_prefixed() {
            shown_left.clone()
        } else {
            let base = d.from_table.as_deref().unwrap_or_default();
            scope.add(d.from_qualifier().unwrap_or(base), base);
            qualify(&shown_left, base)
        };

        let prefix = scope.choose_prefix(&clause.table, clause.alias.as_deref());
        let outcome = simulate_join(&left, &scope, &right, clause, &prefix, "joined");
        scope.add(clause.qualifier(), prefix);

        let description = match &clause.condition {
            Some(condition) => format!(
                "{} {} ON {}: {} matching pairs, {} rows",
                clause.join_type,
                clause.table,
                condition,
                outcome.matched_pairs.len(),
                outcome.result.len()
            ),
            None if clause.implicit => format!(
                "Combine every row with every row of {} (comma in FROM): {} rows",
                clause.table,
                outcome.result.len()
            ),
            None => format!("{} {}: {} rows", clause.join_type, clause.table, outcome.result.len()),
        };

        steps.push(Step::Join(JoinStep {
            description,
            join_type: clause.join_type.to_string(),
            condition: clause.condition.clone(),
            left_table: shown_left.dim(outcome.unmatched_left.iter().copied()),
            right_table: right.dim(outcome.unmatched_right.iter().copied()),
            matched_pairs: outcome.matched_pairs,
            unmatched_left: outcome.unmatched_left,
            unmatched_right: outcome.unmatched_right,
            result_table: outcome.result.clone(),
        }));

        Ok(Relation {
            table: outcome.result,
            scope,
        })
    }

    fn filter_step(
        &self,
        d: &QueryDescriptor,
        input: &TableSnapshot,
        condition: &str,
        steps: &mut Vec<Step>,
    ) -> Result<TableSnapshot, PipelineError> {
        let sql = format!("SELECT {} {}", identity_columns(d), d.relation_text().unwrap_or_default());
        let output = self.fetch(&sql)?;
        let after_ids: Vec<RowId> = output
            .rows
            .iter()
            .map(|row| row.iter().map(Value::as_i64).collect())
            .collect();

        let rec = reconcile_by_identity(input, &after_ids, "filtered");
        steps.push(Step::Filter(FilterStep {
            description: format!(
                "Keep rows where {} ({} of {} rows)",
                condition,
                rec.kept_rows.len(),
                input.len()
            ),
            condition: condition.to_string(),
            input_table: input
                .clone()
                .highlight(rec.kept_rows.iter().copied())
                .dim(rec.filtered_out_rows.iter().copied()),
            kept_rows: rec.kept_rows,
            filtered_out_rows: rec.filtered_out_rows,
            result_table: rec.result_table.clone(),
        }));
        Ok(rec.result_table)
    }

    /// Returns the authoritative grouped table and, when available, each
    /// group's key tuple.
    fn group_step(
        &self,
        d: &QueryDescriptor,
        relation: &Relation,
        keys: &[KeyExpr],
        labels: &[String],
        steps: &mut Vec<Step>,
    ) -> Result<(TableSnapshot, Option<Vec<Vec<Value>>>), PipelineError> {
        let input = &relation.table;
        let key_values = self.group_key_values(d, relation, keys)?;

        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (row, values) in key_values.into_iter().enumerate() {
            let key = values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(GROUP_SEPARATOR);
            match index.get(&key) {
                Some(&g) => groups[g].row_indices.push(row),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push(Group {
                        key,
                        key_values: values,
                        row_indices: vec![row],
                    });
                }
            }
        }

        let Keyed { table: result, ids } = self.fetch_keyed(d, keys, ClauseKind::Having, "grouped", labels)?;
        if result.len() != groups.len() {
            warn!(
                local = groups.len(),
                engine = result.len(),
                "Group count differs from engine result"
            );
        }

        steps.push(Step::GroupBy(GroupByStep {
            description: format!(
                "Group {} rows by {} into {} groups",
                input.len(),
                d.group_by.join(", "),
                groups.len()
            ),
            columns: d.group_by.clone(),
            aggregates: d.aggregates.clone(),
            input_table: input.clone(),
            groups,
            result_table: result.clone(),
        }));
        Ok((result, ids))
    }

    /// Group key tuple of every row, read locally when every key is a plain column.
    fn group_key_values(
        &self,
        d: &QueryDescriptor,
        relation: &Relation,
        keys: &[KeyExpr],
    ) -> Result<Vec<Vec<Value>>, PipelineError> {
        let table = &relation.table;
        let local: Option<Vec<String>> = keys
            .iter()
            .map(|k| k.expr.as_column().and_then(|c| relation.scope.resolve(&table.columns, c)))
            .collect();

        match local {
            Some(columns) => Ok(table
                .rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect()),
            None => {
                let exprs: Vec<&str> = keys.iter().map(|k| k.text.as_str()).collect();
                self.evaluate_per_row(d, table, &exprs)
            }
        }
    }

    /// Groups are matched by key tuple when both sides carry one, by value otherwise.
    fn having_step(
        &self,
        d: &QueryDescriptor,
        before: Keyed,
        keys: &[KeyExpr],
        labels: &[String],
        condition: &str,
        steps: &mut Vec<Step>,
    ) -> Result<TableSnapshot, PipelineError> {
        let before = if d.group_by.is_empty() {
            Keyed {
                table: label(
                    self.fetch(d.truncate_before(ClauseKind::Having))?.into_snapshot("aggregated"),
                    labels,
                ),
                ids: None,
            }
        } else {
            before
        };
        let after = if before.ids.is_some() {
            self.fetch_keyed(d, keys, ClauseKind::OrderBy, "having", labels)?
        } else {
            Keyed {
                table: label(
                    self.fetch(d.truncate_before(ClauseKind::OrderBy))?.into_snapshot("having"),
                    labels,
                ),
                ids: None,
            }
        };

        let rec = match (&before.ids, &after.ids) {
            (Some(before_ids), Some(after_ids)) => {
                let by_key = reconcile_by_value(&key_table(before_ids), &key_table(after_ids), "having");
                Reconciliation {
                    result_table: after.table.clone().renamed("having"),
                    ..by_key
                }
            }
            _ => reconcile_by_value(&before.table, &after.table, "having"),
        };
        let before = before.table;

        steps.push(Step::Having(FilterStep {
            description: format!(
                "Keep groups where {} ({} of {} groups)",
                condition,
                rec.kept_rows.len(),
                before.len()
            ),
            condition: condition.to_string(),
            input_table: before
                .clone()
                .highlight(rec.kept_rows.iter().copied())
                .dim(rec.filtered_out_rows.iter().copied()),
            kept_rows: rec.kept_rows,
            filtered_out_rows: rec.filtered_out_rows,
            result_table: rec.result_table.clone(),
        }));
        Ok(rec.result_table)
    }

    /// Run the statement cut before `kind` with the group keys appended to
    /// the SELECT list, then split the keys back off. Falls back to the plain
    /// statement under DISTINCT, where extra columns would change the rows.
    fn fetch_keyed(
        &self,
        d: &QueryDescriptor,
        keys: &[KeyExpr],
        kind: ClauseKind,
        name: &str,
        labels: &[String],
    ) -> Result<Keyed, PipelineError> {
        let extra = keys
            .iter()
            .enumerate()
            .map(|(k, key)| format!("{} AS {}{}", key.text, KEY_PREFIX, k))
            .collect::<Vec<_>>()
            .join(", ");
        let keyed_sql = (!d.distinct && !keys.is_empty())
            .then(|| d.with_select_appended(&extra, kind))
            .flatten();

        let Some(sql) = keyed_sql else {
            return Ok(Keyed {
                table: label(self.fetch(d.truncate_before(kind))?.into_snapshot(name), labels),
                ids: None,
            });
        };

        let mut output = self.fetch(&sql)?;
        let width = output.columns.len().saturating_sub(keys.len());
        output.columns.truncate(width);
        let ids = output
            .rows
            .iter_mut()
            .map(|row| row.split_off(width.min(row.len())))
            .collect();
        Ok(Keyed {
            table: label(output.into_snapshot(name), labels),
            ids: Some(ids),
        })
    }

    /// Returns the projected table and its column labels.
    fn project_step(
        &self,
        d: &QueryDescriptor,
        relation: &Relation,
        select_labels: &[String],
        steps: &mut Vec<Step>,
    ) -> Result<(TableSnapshot, Vec<String>), PipelineError> {
        let input = &relation.table;
        let description = format!(
            "Select {}",
            d.select_columns
                .iter()
                .map(|c| match &c.alias {
                    Some(alias) => format!("{} AS {}", c.expression, alias),
                    None => c.expression.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        );

        if d.is_aggregate_query() {
            // Grouped rows already have the SELECT list's shape; otherwise the
            // single aggregate row comes from the engine.
            let shaped = if !d.group_by.is_empty() || d.having.is_some() {
                input.clone()
            } else {
                self.fetch(d.truncate_before(ClauseKind::OrderBy))?.into_snapshot("projected")
            };
            let result = label(shaped, select_labels).renamed("projected");
            let columns = d
                .select_columns
                .iter()
                .zip(&result.columns)
                .enumerate()
                .map(|(k, (c, name))| ProjectedColumn {
                    expression: c.expression.clone(),
                    alias: c.alias.clone(),
                    output_name: name.clone(),
                    source: input.columns.get(k).cloned(),
                })
                .collect();
            let labels = result.columns.clone();
            steps.push(Step::Project(ProjectStep {
                description,
                columns,
                input_table: input.clone(),
                result_table: result.clone(),
            }));
            return Ok((result, labels));
        }

        let mut outputs = Vec::new();
        let mut computed: Vec<&str> = Vec::new();
        for c in &d.select_columns {
            match &c.kind {
                SelectKind::Wildcard => outputs.extend(input.columns.iter().map(|name| Output {
                    expression: c.expression.clone(),
                    alias: None,
                    name: name.clone(),
                    source: Source::Column(name.clone()),
                })),
                SelectKind::QualifiedWildcard { table } => {
                    outputs.extend(relation.scope.columns_of(&input.columns, table).into_iter().map(
                        |(source, bare)| Output {
                            expression: c.expression.clone(),
                            alias: None,
                            name: bare,
                            source: Source::Column(source.to_string()),
                        },
                    ))
                }
                SelectKind::Column(col) => {
                    let source = match relation.scope.resolve(&input.columns, col) {
                        Some(column) => Source::Column(column),
                        None => {
                            computed.push(&c.expression);
                            Source::Computed(computed.len() - 1)
                        }
                    };
                    outputs.push(Output {
                        expression: c.expression.clone(),
                        alias: c.alias.clone(),
                        name: c.output_name(),
                        source,
                    });
                }
                SelectKind::Expression => {
                    computed.push(&c.expression);
                    outputs.push(Output {
                        expression: c.expression.clone(),
                        alias: c.alias.clone(),
                        name: c.output_name(),
                        source: Source::Computed(computed.len() - 1),
                    });
                }
            }
        }

        let values = if computed.is_empty() {
            Vec::new()
        } else {
            self.evaluate_per_row(d, input, &computed)?
        };

        let names = unique_column_names(&outputs.iter().map(|o| o.name.clone()).collect::<Vec<_>>());
        let rows: Vec<Row> = (0..input.len())
            .map(|i| {
                names
                    .iter()
                    .zip(&outputs)
                    .map(|(name, output)| {
                        let value = match &output.source {
                            Source::Column(column) => input.rows[i].get(column).cloned(),
                            Source::Computed(k) => values.get(i).and_then(|v| v.get(*k)).cloned(),
                        };
                        (name.clone(), value.unwrap_or(Value::Null))
                    })
                    .collect()
            })
            .collect();

        let mut result =
            TableSnapshot::new("projected", names.clone(), rows).with_row_ids(input.row_ids.clone());
        if d.distinct {
            result = distinct(&result);
        }

        let columns = outputs
            .into_iter()
            .zip(&names)
            .map(|(output, name)| ProjectedColumn {
                expression: output.expression,
                alias: output.alias,
                output_name: name.clone(),
                source: match output.source {
                    Source::Column(column) => Some(column),
                    Source::Computed(_) => None,
                },
            })
            .collect();

        steps.push(Step::Project(ProjectStep {
            description,
            columns,
            input_table: input.clone(),
            result_table: result.clone(),
        }));
        Ok((result, names))
    }

    fn order_step(
        &self,
        d: &QueryDescriptor,
        input: &TableSnapshot,
        labels: &[String],
        steps: &mut Vec<Step>,
    ) -> Result<TableSnapshot, PipelineError> {
        let result = label(
            self.fetch(d.truncate_before(ClauseKind::Limit))?.into_snapshot("ordered"),
            labels,
        );
        let terms: Vec<SortTerm> = d
            .order_by
            .iter()
            .map(|t| SortTerm {
                column: t.column.clone(),
                direction: match t.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                }
                .to_string(),
            })
            .collect();

        steps.push(Step::OrderBy(OrderByStep {
            description: format!(
                "Sort by {}",
                terms
                    .iter()
                    .map(|t| format!("{} {}", t.column, t.direction))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            terms,
            input_table: input.clone(),
            result_table: result.clone(),
        }));
        Ok(result)
    }

    fn limit_step(
        &self,
        d: &QueryDescriptor,
        input: &TableSnapshot,
        labels: &[String],
        steps: &mut Vec<Step>,
    ) -> Result<TableSnapshot, PipelineError> {
        let result = label(self.fetch(&d.sql)?.into_snapshot("limited"), labels);
        let description = match (d.limit, d.offset) {
            (Some(limit), Some(offset)) => format!("Skip {} rows, then keep at most {}", offset, limit),
            (Some(limit), None) => format!("Keep the first {} rows", limit),
            (None, Some(offset)) => format!("Skip the first {} rows", offset),
            (None, None) => "Keep all rows".to_string(),
        };
        steps.push(Step::Limit(LimitStep {
            description,
            limit: d.limit,
            offset: d.offset,
            input_table: input.clone(),
            result_table: result.clone(),
        }));
        Ok(result)
    }

    /// Full table plus its `rowid`s.
    fn scan(&self, table: &str) -> Result<TableSnapshot, PipelineError> {
        let sql = format!("SELECT rowid AS {}, * FROM {}", ROWID_COLUMN, quote_ident(table));
        let output = self.fetch(&sql)?;

        let columns = output.columns.get(1..).unwrap_or_default().to_vec();
        let mut ids = Vec::with_capacity(output.rows.len());
        let rows = output
            .rows
            .into_iter()
            .map(|mut cells| {
                let id = if cells.is_empty() { None } else { cells.remove(0).as_i64() };
                ids.push(vec![id]);
                cells
            })
            .collect();

        Ok(TableSnapshot::from_values(table, &columns, rows).with_row_ids(ids))
    }

    /// Evaluate expressions for each row of `table` by row identity.
    fn evaluate_per_row(
        &self,
        d: &QueryDescriptor,
        table: &TableSnapshot,
        exprs: &[&str],
    ) -> Result<Vec<Vec<Value>>, PipelineError> {
        let select = exprs
            .iter()
            .enumerate()
            .map(|(k, e)| format!("{} AS {}{}", e, EXPR_PREFIX, k))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, {} {}",
            identity_columns(d),
            select,
            d.relation_text().unwrap_or_default()
        );
        let output = self.fetch(&sql)?;

        let width = d.qualifiers().len();
        let mut by_id: HashMap<RowId, Vec<Value>> = HashMap::new();
        for row in output.rows {
            if row.len() < width {
                continue;
            }
            let (id, values) = row.split_at(width);
            let id: RowId = id.iter().map(Value::as_i64).collect();
            by_id.entry(id).or_insert_with(|| values.to_vec());
        }

        Ok((0..table.len())
            .map(|i| {
                table
                    .row_id(i)
                    .and_then(|id| by_id.get(id))
                    .cloned()
                    .unwrap_or_else(|| vec![Value::Null; exprs.len()])
            })
            .collect())
    }

    fn fetch(&self, sql: &str) -> Result<QueryOutput, PipelineError> {
        debug!(sql = %sql, "Engine call");
        self.engine.execute(sql).map_err(|err| {
            let known = self.engine.table_names().unwrap_or_default();
            PipelineError::EngineExecution {
                sql: sql.to_string(),
                message: translate_error(&err.to_string(), &known),
            }
        })
    }
}

fn scan_step(table: &str, scanned: TableSnapshot) -> Step {
    Step::Scan(ScanStep {
        description: format!("Read all {} rows from {}", scanned.len(), table),
        table_name: table.to_string(),
        result_table: scanned,
    })
}

/// GROUP BY keys with positions (`GROUP BY 1`) and select-list aliases
/// replaced by the SELECT expression they name. A real column wins over an
/// alias of the same name.
fn group_keys(d: &QueryDescriptor, relation: &Relation) -> Vec<KeyExpr> {
    d.group_keys
        .iter()
        .map(|key| {
            let target = match &key.expr {
                Expr::Literal(sqlstep_ast::Value::Int(n)) => usize::try_from(*n)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| d.select_columns.get(i)),
                Expr::Column(col)
                    if col.table.is_none()
                        && relation.scope.resolve(&relation.table.columns, col).is_none() =>
                {
                    d.select_columns.iter().find(|c| {
                        c.alias
                            .as_deref()
                            .is_some_and(|alias| alias.eq_ignore_ascii_case(&col.column))
                    })
                }
                _ => None,
            };
            match target.and_then(|c| c.expr.as_ref().map(|expr| (c, expr))) {
                Some((c, expr)) => KeyExpr {
                    expr: expr.clone(),
                    text: c.expression.clone(),
                },
                None => key.clone(),
            }
        })
        .collect()
}

/// `"q0".rowid AS __sqlstep_id_0, ...` over every participating table.
fn identity_columns(d: &QueryDescriptor) -> String {
    d.qualifiers()
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}.rowid AS {}{}", quote_ident(q), ID_PREFIX, i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Key tuples as a table, so they can be matched like rows.
fn key_table(ids: &[Vec<Value>]) -> TableSnapshot {
    let width = ids.first().map_or(0, Vec::len);
    let columns: Vec<String> = (0..width).map(|k| format!("{}{}", KEY_PREFIX, k)).collect();
    TableSnapshot::from_values("keys", &columns, ids.to_vec())
}

/// Apply labels when the widths agree.
fn label(snapshot: TableSnapshot, labels: &[String]) -> TableSnapshot {
    snapshot.relabel(labels).unwrap_or(snapshot)
}

fn distinct(table: &TableSnapshot) -> TableSnapshot {
    let mut keep: Vec<usize> = Vec::new();
    for i in 0..table.len() {
        let cells = table.cells(i);
        if !keep.iter().any(|&k| cells_equal(&table.cells(k), &cells)) {
            keep.push(i);
        }
    }
    table.select_rows(table.name.clone(), &keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlstep_duck::{Dataset, DuckEngine, EngineError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        calls: AtomicUsize,
    }

    impl Engine for CountingEngine {
        fn execute(&self, _sql: &str) -> Result<QueryOutput, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Failed("engine should not be called".to_string()))
        }

        fn table_names(&self) -> Result<Vec<String>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn company() -> DuckEngine {
        DuckEngine::with_dataset(Dataset::Company).unwrap()
    }

    #[test]
    fn test_missing_from_never_reaches_engine() {
        let engine = CountingEngine { calls: AtomicUsize::new(0) };
        let builder = PipelineBuilder::new(&engine);

        for (sql, message) in [
            ("SELECT name", "SELECT statement is missing a FROM clause"),
            ("SELECT name FROM", "FROM must be followed by a table name"),
            ("SELECT name FROM WHERE id = 1", "FROM is followed by WHERE instead of a table name"),
            ("SELCT * FROM t", "Unknown keyword 'SELCT'. Did you mean SELECT?"),
        ] {
            let result = builder.run(sql);
            assert_eq!(result.error.as_deref(), Some(message), "{}", sql);
            assert!(result.steps.is_empty());
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_misspelled_select_is_a_typo_not_unsupported() {
        let engine = CountingEngine { calls: AtomicUsize::new(0) };
        let builder = PipelineBuilder::new(&engine);

        for (sql, found) in [("SELCT * FROM employees", "SELCT"), ("selet name FROM employees", "SELET")] {
            let mut steps = Vec::new();
            let err = builder.build(&normalize(sql), &mut steps).unwrap_err();
            assert_eq!(err.kind(), "syntax_validation", "{}", sql);
            assert_eq!(
                err.to_string(),
                format!("Unknown keyword '{}'. Did you mean SELECT?", found)
            );
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_statement() {
        let engine = CountingEngine { calls: AtomicUsize::new(0) };
        let result = PipelineBuilder::new(&engine).run("DROP TABLE employees");
        assert!(result.error.unwrap().contains("Unsupported statement"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_engine_failure_keeps_partial_steps() {
        let engine = company();
        let result = PipelineBuilder::new(&engine).run("SELECT * FROM employees WHERE nope = 1");

        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].kind(), "Scan");
        assert!(result.error.unwrap().contains("'nope'"));
        assert!(result.final_result.is_empty());
    }

    #[test]
    fn test_unknown_table_lists_known_tables() {
        let engine = company();
        let result = PipelineBuilder::new(&engine).run("SELECT * FROM employes");
        let error = result.error.unwrap();
        assert!(error.contains("'employes'"));
        assert!(error.contains("departments, employees, projects"));
        assert!(result.steps.is_empty());
    }

    #[test]
    fn test_stage_order() {
        let engine = company();
        let result = PipelineBuilder::new(&engine).run(
            "SELECT d.name, COUNT(*) AS headcount FROM employees e \
             JOIN departments d ON e.dept_id = d.id \
             WHERE e.salary > 50000 GROUP BY d.name HAVING COUNT(*) > 1 \
             ORDER BY headcount DESC LIMIT 3",
        );
        assert!(result.error.is_none(), "{:?}", result.error);

        let kinds: Vec<_> = result.steps.iter().map(Step::kind).collect();
        assert_eq!(
            kinds,
            vec!["Scan", "Join", "Filter", "GroupBy", "Having", "Project", "OrderBy", "Limit"]
        );
        assert_eq!(result.final_result.columns, vec!["name", "headcount"]);
        assert_eq!(result.final_result.len(), 3);
        assert_eq!(result.final_result.rows[0]["headcount"], serde_json::json!(4));
    }

    #[test]
    fn test_computed_projection_matches_engine() {
        let engine = company();
        let result = PipelineBuilder::new(&engine)
            .run("SELECT name, salary / 1000 AS salary_k FROM employees WHERE dept_id = 2");
        assert!(result.error.is_none(), "{:?}", result.error);

        let Step::Project(project) = &result.steps[2] else {
            panic!("expected project step");
        };
        assert_eq!(project.result_table.columns, vec!["name", "salary_k"]);
        assert_eq!(project.result_table.len(), 3);
        assert!(project.columns[1].source.is_none());

        for row in &project.result_table.rows {
            let name = row["name"].as_str().unwrap();
            let engine_row = result
                .final_result
                .rows
                .iter()
                .find(|r| r["name"].as_str() == Some(name))
                .unwrap();
            assert_eq!(row["salary_k"], engine_row["salary_k"]);
        }
    }

    #[test]
    fn test_aggregate_without_group_by() {
        let engine = company();
        let result = PipelineBuilder::new(&engine).run("SELECT COUNT(*) AS total FROM employees");
        assert!(result.error.is_none(), "{:?}", result.error);
        assert_eq!(result.final_result.rows[0]["total"], serde_json::json!(15));
    }

    #[test]
    fn test_modification_returns_target_table() {
        let engine = company();
        let builder = PipelineBuilder::new(&engine);
        let result = builder.run("DELETE FROM employees WHERE dept_id IS NULL");
        assert!(result.error.is_none(), "{:?}", result.error);
        assert!(result.steps.is_empty());
        assert_eq!(result.final_result.name, "employees");
        assert_eq!(result.final_result.len(), 14);
    }

    #[test]
    fn test_distinct_projection() {
        let engine = company();
        let result = PipelineBuilder::new(&engine).run("SELECT DISTINCT dept_id FROM employees WHERE dept_id < 3");
        assert!(result.error.is_none(), "{:?}", result.error);
        let project = result.steps.iter().find(|s| s.kind() == "Project").unwrap();
        assert_eq!(project.result_table().len(), 2);
        assert_eq!(result.final_result.len(), 2);
    }

    /// Answers the keyed HAVING query with dept 5 only.
    struct KeyedHavingEngine;

    impl Engine for KeyedHavingEngine {
        fn execute(&self, sql: &str) -> Result<QueryOutput, EngineError> {
            if !sql.contains("__sqlstep_key_0") {
                return Err(EngineError::Failed(format!("unexpected query: {}", sql)));
            }
            Ok(QueryOutput {
                columns: vec!["n".to_string(), "__sqlstep_key_0".to_string()],
                rows: vec![vec![serde_json::json!(2), serde_json::json!(5)]],
            })
        }

        fn table_names(&self) -> Result<Vec<String>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_having_picks_group_by_key_among_equal_rows() {
        let engine = KeyedHavingEngine;
        let builder = PipelineBuilder::new(&engine);
        let d = QueryDescriptor::extract(
            "SELECT COUNT(*) AS n FROM employees GROUP BY dept_id HAVING MAX(salary) > 60000",
        );
        let labels = vec!["n".to_string()];
        let before = Keyed {
            table: TableSnapshot::from_values(
                "grouped",
                &labels,
                vec![vec![serde_json::json!(2)]; 3],
            ),
            ids: Some(vec![
                vec![serde_json::json!(3)],
                vec![serde_json::json!(4)],
                vec![serde_json::json!(5)],
            ]),
        };

        let mut steps = Vec::new();
        let kept = builder
            .having_step(&d, before, &d.group_keys, &labels, "MAX(salary) > 60000", &mut steps)
            .unwrap();

        let Step::Having(having) = &steps[0] else { panic!("expected having") };
        assert_eq!(having.kept_rows, vec![2]);
        assert_eq!(having.filtered_out_rows, vec![0, 1]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.columns, vec!["n"]);
    }
}
