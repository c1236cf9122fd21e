//! Nested-loop join simulation
//!
//! Runs the join locally so every matched pair and every unmatched row can be
//! shown. The engine's own join result is never consulted here.

use serde_json::Value;
use sqlstep_ast::{ColumnRef, JoinClause, JoinType};
use sqlstep_ir::{values_equal, Row, RowId, TableSnapshot};
use tracing::warn;

use crate::resolve::{qualified_name, ColumnScope};

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub result: TableSnapshot,
    pub matched_pairs: Vec<(usize, usize)>,
    pub unmatched_left: Vec<usize>,
    pub unmatched_right: Vec<usize>,
}

/// Rename every column to `<prefix>_<column>`.
pub fn qualify(snapshot: &TableSnapshot, prefix: &str) -> TableSnapshot {
    let columns: Vec<String> = snapshot.columns.iter().map(|c| qualified_name(prefix, c)).collect();
    let rows = snapshot
        .rows
        .iter()
        .map(|row| {
            snapshot
                .columns
                .iter()
                .zip(&columns)
                .map(|(old, new)| (new.clone(), row.get(old).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    TableSnapshot::new(snapshot.name.clone(), columns, rows).with_row_ids(snapshot.row_ids.clone())
}

/// Key columns of an equality condition: (left column in `left`, right column in `right`).
fn key_columns(
    equality: &(ColumnRef, ColumnRef),
    clause: &JoinClause,
    scope: &ColumnScope,
    left: &TableSnapshot,
    right: &TableSnapshot,
) -> Option<(String, String)> {
    let is_right = |col: &ColumnRef| {
        let names_right = match &col.table {
            Some(q) => q.eq_ignore_ascii_case(clause.qualifier()) || q.eq_ignore_ascii_case(&clause.table),
            None => true,
        };
        names_right && right.columns.iter().any(|c| c == &col.column)
    };

    let (a, b) = equality;
    for (l, r) in [(a, b), (b, a)] {
        if is_right(r) {
            if let Some(left_col) = scope.resolve(&left.columns, l) {
                return Some((left_col, r.column.clone()));
            }
        }
    }
    None
}

/// Join a running table with a freshly scanned one.
///
/// `left` is already prefixed according to `scope` (or a single unprefixed
/// base table); `right` is the raw scan of the joined table and gets
/// `right_prefix` in the result.
pub fn simulate_join(
    left: &TableSnapshot,
    scope: &ColumnScope,
    right: &TableSnapshot,
    clause: &JoinClause,
    right_prefix: &str,
    name: &str,
) -> JoinOutcome {
    let keys = match (&clause.equality, clause.join_type) {
        (_, JoinType::Cross) => None,
        (Some(equality), _) => {
            let keys = key_columns(equality, clause, scope, left, right);
            if keys.is_none() {
                warn!(condition = ?clause.condition, "Join columns not found, no rows will match");
            }
            keys
        }
        (None, _) => {
            warn!(condition = ?clause.condition, "Unsupported join condition, no rows will match");
            None
        }
    };

    let matches = |i: usize, j: usize| -> bool {
        if clause.join_type == JoinType::Cross {
            return true;
        }
        let Some((left_col, right_col)) = &keys else {
            return false;
        };
        let l = left.rows[i].get(left_col).unwrap_or(&Value::Null);
        let r = right.rows[j].get(right_col).unwrap_or(&Value::Null);
        !l.is_null() && !r.is_null() && values_equal(l, r)
    };

    let right_columns: Vec<String> = right.columns.iter().map(|c| qualified_name(right_prefix, c)).collect();
    let mut columns = left.columns.clone();
    columns.extend(right_columns.iter().cloned());

    let left_width = left.row_ids.first().map(Vec::len).unwrap_or_else(|| scope.width());
    let right_width = right.row_ids.first().map(Vec::len).unwrap_or(1);
    let has_ids = left.row_ids.len() == left.len() && right.row_ids.len() == right.len();

    let merge = |i: Option<usize>, j: Option<usize>| -> (Row, RowId) {
        let mut row = Row::new();
        for c in &left.columns {
            let v = i.and_then(|i| left.rows[i].get(c).cloned()).unwrap_or(Value::Null);
            row.insert(c.clone(), v);
        }
        for (raw, prefixed) in right.columns.iter().zip(&right_columns) {
            let v = j.and_then(|j| right.rows[j].get(raw).cloned()).unwrap_or(Value::Null);
            row.insert(prefixed.clone(), v);
        }
        let mut id = match i {
            Some(i) if has_ids => left.row_ids[i].clone(),
            _ => vec![None; left_width],
        };
        match j {
            Some(j) if has_ids => id.extend(right.row_ids[j].iter().cloned()),
            _ => id.extend(std::iter::repeat(None).take(right_width)),
        }
        (row, id)
    };

    let mut rows = Vec::new();
    let mut row_ids = Vec::new();
    let mut matched_pairs = Vec::new();
    let mut unmatched_left = Vec::new();
    let mut right_matched = vec![false; right.len()];

    for i in 0..left.len() {
        let mut any = false;
        for j in 0..right.len() {
            if matches(i, j) {
                any = true;
                right_matched[j] = true;
                matched_pairs.push((i, j));
                let (row, id) = merge(Some(i), Some(j));
                rows.push(row);
                row_ids.push(id);
            }
        }
        if !any {
            unmatched_left.push(i);
            if clause.join_type.keeps_left() {
                let (row, id) = merge(Some(i), None);
                rows.push(row);
                row_ids.push(id);
            }
        }
    }

    let unmatched_right: Vec<usize> = (0..right.len()).filter(|&j| !right_matched[j]).collect();
    if clause.join_type.keeps_right() {
        for &j in &unmatched_right {
            let (row, id) = merge(None, Some(j));
            rows.push(row);
            row_ids.push(id);
        }
    }

    let result = TableSnapshot::new(name, columns, rows)
        .with_row_ids(if has_ids { row_ids } else { Vec::new() });

    JoinOutcome {
        result,
        matched_pairs,
        unmatched_left,
        unmatched_right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlstep_ast::QueryDescriptor;

    fn employees() -> TableSnapshot {
        TableSnapshot::from_values(
            "employees",
            &["name".to_string(), "dept_id".to_string()],
            vec![
                vec![json!("Alice"), json!(1)],
                vec![json!("Bob"), json!(2)],
                vec![json!("Olivia"), Value::Null],
                vec![json!("Carol"), json!(1)],
            ],
        )
        .with_row_ids((0..4).map(|i| vec![Some(i)]).collect())
    }

    fn departments() -> TableSnapshot {
        TableSnapshot::from_values(
            "departments",
            &["id".to_string(), "name".to_string()],
            vec![
                vec![json!(1), json!("Engineering")],
                vec![json!(2), json!("Sales")],
                vec![json!(7), json!("Legal")],
            ],
        )
        .with_row_ids((0..3).map(|i| vec![Some(i)]).collect())
    }

    fn run(sql: &str) -> JoinOutcome {
        let descriptor = QueryDescriptor::extract(sql);
        let clause = &descriptor.joins[0];
        let mut scope = ColumnScope::unprefixed();
        scope.add("e", "employees");
        let left = qualify(&employees(), "employees");
        simulate_join(&left, &scope, &departments(), clause, "departments", "joined")
    }

    fn expected_rows(outcome: &JoinOutcome, join_type: JoinType) -> usize {
        outcome.matched_pairs.len()
            + if join_type.keeps_left() { outcome.unmatched_left.len() } else { 0 }
            + if join_type.keeps_right() { outcome.unmatched_right.len() } else { 0 }
    }

    #[test]
    fn test_inner_join_excludes_null_keys() {
        let outcome = run("SELECT * FROM employees e JOIN departments d ON e.dept_id = d.id");
        assert_eq!(outcome.matched_pairs, vec![(0, 0), (1, 1), (3, 0)]);
        assert_eq!(outcome.unmatched_left, vec![2]);
        assert_eq!(outcome.unmatched_right, vec![2]);
        assert_eq!(outcome.result.len(), 3);
        assert_eq!(outcome.result.rows[1]["departments_name"], json!("Sales"));
        assert_eq!(outcome.result.row_ids[1], vec![Some(1), Some(1)]);
    }

    #[test]
    fn test_condition_sides_may_be_swapped() {
        let outcome = run("SELECT * FROM employees e JOIN departments d ON d.id = e.dept_id");
        assert_eq!(outcome.matched_pairs.len(), 3);
    }

    #[test]
    fn test_outer_joins_null_extend() {
        let left = run("SELECT * FROM employees e LEFT JOIN departments d ON e.dept_id = d.id");
        assert_eq!(left.result.len(), 4);
        assert_eq!(left.result.rows[2]["employees_name"], json!("Olivia"));
        assert_eq!(left.result.rows[2]["departments_name"], Value::Null);
        assert_eq!(left.result.row_ids[2], vec![Some(2), None]);

        let right = run("SELECT * FROM employees e RIGHT JOIN departments d ON e.dept_id = d.id");
        assert_eq!(right.result.len(), 4);
        assert_eq!(right.result.rows[3]["employees_name"], Value::Null);
        assert_eq!(right.result.rows[3]["departments_name"], json!("Legal"));

        let full = run("SELECT * FROM employees e FULL OUTER JOIN departments d ON e.dept_id = d.id");
        assert_eq!(full.result.len(), 5);
    }

    #[test]
    fn test_row_count_invariant_for_every_join_type() {
        for (keyword, join_type) in [
            ("JOIN", JoinType::Inner),
            ("LEFT JOIN", JoinType::Left),
            ("RIGHT JOIN", JoinType::Right),
            ("FULL JOIN", JoinType::Full),
        ] {
            let outcome = run(&format!(
                "SELECT * FROM employees e {} departments d ON e.dept_id = d.id",
                keyword
            ));
            assert_eq!(outcome.result.len(), expected_rows(&outcome, join_type), "{}", keyword);
        }
    }

    #[test]
    fn test_cross_join_pairs_everything() {
        let outcome = run("SELECT * FROM employees e CROSS JOIN departments d");
        assert_eq!(outcome.matched_pairs.len(), 12);
        assert!(outcome.unmatched_left.is_empty());
        assert_eq!(outcome.result.len(), 12);
    }

    #[test]
    fn test_compound_condition_matches_nothing() {
        let outcome = run(
            "SELECT * FROM employees e LEFT JOIN departments d ON e.dept_id = d.id AND d.id > 1",
        );
        assert!(outcome.matched_pairs.is_empty());
        assert_eq!(outcome.unmatched_left.len(), 4);
        assert_eq!(outcome.result.len(), 4);
    }
}
