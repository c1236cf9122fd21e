//! Kept/filtered classification against authoritative results

use std::collections::{HashMap, VecDeque};

use sqlstep_ir::{cells_equal, RowId, TableSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Indices into the "before" table, ascending.
    pub kept_rows: Vec<usize>,
    pub filtered_out_rows: Vec<usize>,
    pub result_table: TableSnapshot,
}

/// Classify `before` rows by identity.
///
/// A row is kept when its identity occurs in `after_ids`; each id is consumed
/// once. The result table lists the kept rows in `after_ids` order. Rows of
/// `before` without an identity are always filtered out.
pub fn reconcile_by_identity(before: &TableSnapshot, after_ids: &[RowId], name: &str) -> Reconciliation {
    let mut by_id: HashMap<&RowId, VecDeque<usize>> = HashMap::new();
    for (idx, id) in before.row_ids.iter().enumerate().take(before.len()) {
        by_id.entry(id).or_default().push_back(idx);
    }

    let mut order = Vec::with_capacity(after_ids.len());
    for id in after_ids {
        if let Some(idx) = by_id.get_mut(id).and_then(VecDeque::pop_front) {
            order.push(idx);
        }
    }

    let mut kept_rows = order.clone();
    kept_rows.sort_unstable();
    let filtered_out_rows = (0..before.len())
        .filter(|i| kept_rows.binary_search(i).is_err())
        .collect();

    Reconciliation {
        kept_rows,
        filtered_out_rows,
        result_table: before.select_rows(name, &order),
    }
}

/// Classify `before` rows by value.
///
/// O(n·m): every before-row scans the after-rows for an unconsumed row with
/// positionally equal cells. Value-identical duplicates are told apart only
/// by count. The result table is `after` itself.
pub fn reconcile_by_value(before: &TableSnapshot, after: &TableSnapshot, name: &str) -> Reconciliation {
    let after_cells: Vec<_> = (0..after.len()).map(|j| after.cells(j)).collect();
    let mut consumed = vec![false; after.len()];
    let mut kept_rows = Vec::new();
    let mut filtered_out_rows = Vec::new();

    for i in 0..before.len() {
        let cells = before.cells(i);
        let hit = (0..after_cells.len()).find(|&j| !consumed[j] && cells_equal(&cells, &after_cells[j]));
        match hit {
            Some(j) => {
                consumed[j] = true;
                kept_rows.push(i);
            }
            None => filtered_out_rows.push(i),
        }
    }

    Reconciliation {
        kept_rows,
        filtered_out_rows,
        result_table: after.clone().renamed(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counts(values: &[(i64, i64)]) -> TableSnapshot {
        TableSnapshot::from_values(
            "groups",
            &["dept_id".to_string(), "count".to_string()],
            values.iter().map(|(d, c)| vec![json!(d), json!(c)]).collect(),
        )
    }

    fn with_ids(n: i64) -> TableSnapshot {
        TableSnapshot::from_values("t", &["x".to_string()], (0..n).map(|i| vec![json!(i * 10)]).collect())
            .with_row_ids((0..n).map(|i| vec![Some(i)]).collect())
    }

    #[test]
    fn test_identity_keeps_engine_order() {
        let before = with_ids(5);
        let after = vec![vec![Some(3)], vec![Some(0)]];
        let rec = reconcile_by_identity(&before, &after, "filtered");

        assert_eq!(rec.kept_rows, vec![0, 3]);
        assert_eq!(rec.filtered_out_rows, vec![1, 2, 4]);
        assert_eq!(rec.result_table.rows[0]["x"], json!(30));
        assert_eq!(rec.result_table.name, "filtered");
    }

    #[test]
    fn test_identity_tells_duplicates_apart() {
        let before = TableSnapshot::from_values(
            "t",
            &["x".to_string()],
            vec![vec![json!(1)], vec![json!(1)]],
        )
        .with_row_ids(vec![vec![Some(0)], vec![Some(1)]]);

        let rec = reconcile_by_identity(&before, &[vec![Some(1)]], "filtered");
        assert_eq!(rec.kept_rows, vec![1]);
        assert_eq!(rec.filtered_out_rows, vec![0]);
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let rec = reconcile_by_identity(&with_ids(2), &[vec![Some(9)]], "filtered");
        assert!(rec.kept_rows.is_empty());
        assert!(rec.result_table.is_empty());
    }

    #[test]
    fn test_value_reconciliation() {
        let before = counts(&[(1, 4), (2, 3), (3, 2), (6, 1)]);
        let after = counts(&[(1, 4), (2, 3)]);
        let rec = reconcile_by_value(&before, &after, "having");

        assert_eq!(rec.kept_rows, vec![0, 1]);
        assert_eq!(rec.filtered_out_rows, vec![2, 3]);
        assert_eq!(rec.result_table.len(), 2);
    }

    #[test]
    fn test_value_reconciliation_consumes_matches() {
        let before = counts(&[(1, 1), (1, 1), (1, 1)]);
        let after = counts(&[(1, 1), (1, 1)]);
        let rec = reconcile_by_value(&before, &after, "having");
        assert_eq!(rec.kept_rows, vec![0, 1]);
        assert_eq!(rec.filtered_out_rows, vec![2]);
    }

    #[test]
    fn test_reconciliation_is_idempotent() {
        let before = counts(&[(1, 4), (2, 3), (3, 2)]);
        let after = counts(&[(2, 3)]);
        assert_eq!(
            reconcile_by_value(&before, &after, "having"),
            reconcile_by_value(&before, &after, "having")
        );

        let before = with_ids(4);
        let ids = vec![vec![Some(2)], vec![Some(1)]];
        assert_eq!(
            reconcile_by_identity(&before, &ids, "filtered"),
            reconcile_by_identity(&before, &ids, "filtered")
        );
    }
}
