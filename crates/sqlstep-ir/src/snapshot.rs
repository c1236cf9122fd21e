//! Table snapshots and row values

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// One row keyed by column name, keys in column order.
pub type Row = serde_json::Map<String, Value>;

/// Base-table `rowid`s of every table that contributed to a row, in FROM/JOIN
/// order. `None` marks a NULL-extended side of an outer join.
pub type RowId = Vec<Option<i64>>;

/// A table's row set at one point in the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub highlighted_rows: BTreeSet<usize>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dimmed_rows: BTreeSet<usize>,

    /// Row identity, parallel to `rows` when known.
    #[serde(skip)]
    pub row_ids: Vec<RowId>,
}

impl TableSnapshot {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
            ..Default::default()
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), Vec::new())
    }

    /// Build from positional cell values. Duplicate column names are made unique.
    pub fn from_values(name: impl Into<String>, columns: &[String], values: Vec<Vec<Value>>) -> Self {
        let columns = unique_column_names(columns);
        let rows = values
            .into_iter()
            .map(|cells| columns.iter().cloned().zip(cells).collect())
            .collect();
        Self::new(name, columns, rows)
    }

    pub fn with_row_ids(mut self, row_ids: Vec<RowId>) -> Self {
        self.row_ids = row_ids;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Identity of a row; empty when the snapshot carries none.
    pub fn row_id(&self, index: usize) -> Option<&RowId> {
        self.row_ids.get(index)
    }

    /// Cells of a row in column order; absent cells read as NULL.
    pub fn cells(&self, index: usize) -> Vec<&Value> {
        let row = &self.rows[index];
        self.columns
            .iter()
            .map(|c| row.get(c).unwrap_or(&Value::Null))
            .collect()
    }

    /// New snapshot holding the given rows, in the given order.
    pub fn select_rows(&self, name: impl Into<String>, indices: &[usize]) -> Self {
        let rows = indices.iter().filter_map(|&i| self.rows.get(i).cloned()).collect();
        let row_ids = if self.row_ids.len() == self.rows.len() {
            indices.iter().filter_map(|&i| self.row_ids.get(i).cloned()).collect()
        } else {
            Vec::new()
        };
        Self::new(name, self.columns.clone(), rows).with_row_ids(row_ids)
    }

    /// Rename columns positionally. Returns `None` when the widths differ.
    pub fn relabel(&self, labels: &[String]) -> Option<Self> {
        if labels.len() != self.columns.len() {
            return None;
        }
        let labels = unique_column_names(labels);
        let rows = (0..self.rows.len())
            .map(|i| {
                labels
                    .iter()
                    .cloned()
                    .zip(self.cells(i).into_iter().cloned())
                    .collect()
            })
            .collect();
        Some(Self::new(self.name.clone(), labels, rows).with_row_ids(self.row_ids.clone()))
    }

    pub fn highlight(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.highlighted_rows.extend(rows);
        self
    }

    pub fn dim(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.dimmed_rows.extend(rows);
        self
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Scalar equality where integers and floats of equal magnitude compare equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Positional row equality over cell slices.
pub fn cells_equal(a: &[&Value], b: &[&Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Suffix repeated names with `_1`, `_2`, ... so every column keys a distinct cell.
pub fn unique_column_names(names: &[String]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let taken: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let count = seen.entry(name.as_str()).or_insert(0);
        if *count == 0 {
            out.push(name.clone());
        } else {
            let mut suffix = *count;
            let mut candidate = format!("{}_{}", name, suffix);
            while taken.contains(candidate.as_str()) || out.contains(&candidate) {
                suffix += 1;
                candidate = format!("{}_{}", name, suffix);
            }
            out.push(candidate);
        }
        *count += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_values_keeps_column_order() {
        let snap = TableSnapshot::from_values(
            "employees",
            &names(&["id", "name"]),
            vec![vec![json!(1), json!("Alice")], vec![json!(2), json!("Bob")]],
        );
        assert_eq!(snap.len(), 2);
        let keys: Vec<_> = snap.rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["id", "name"]);
        assert_eq!(snap.cells(1), vec![&json!(2), &json!("Bob")]);
    }

    #[test]
    fn test_duplicate_columns_made_unique() {
        assert_eq!(
            unique_column_names(&names(&["name", "name", "id", "name"])),
            names(&["name", "name_1", "id", "name_2"])
        );
        assert_eq!(
            unique_column_names(&names(&["a", "a_1", "a"])),
            names(&["a", "a_1", "a_2"])
        );
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(values_equal(&json!(4), &json!(4.0)));
        assert!(!values_equal(&json!(4), &json!("4")));
        assert!(values_equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_select_rows_carries_identity() {
        let snap = TableSnapshot::from_values(
            "t",
            &names(&["x"]),
            vec![vec![json!(10)], vec![json!(20)], vec![json!(30)]],
        )
        .with_row_ids(vec![vec![Some(0)], vec![Some(1)], vec![Some(2)]]);

        let picked = snap.select_rows("picked", &[2, 0]);
        assert_eq!(picked.cells(0), vec![&json!(30)]);
        assert_eq!(picked.row_id(1), Some(&vec![Some(0)]));
    }

    #[test]
    fn test_relabel_requires_same_width() {
        let snap = TableSnapshot::from_values("t", &names(&["a", "b"]), vec![vec![json!(1), json!(2)]]);
        let relabeled = snap.relabel(&names(&["x", "y"])).unwrap();
        assert_eq!(relabeled.rows[0].get("y"), Some(&json!(2)));
        assert!(snap.relabel(&names(&["x"])).is_none());
    }

    #[test]
    fn test_presentation_sets_skipped_when_empty() {
        let snap = TableSnapshot::empty("result");
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("highlightedRows").is_none());
        assert!(json.get("rowIds").is_none());

        let json = serde_json::to_value(snap.highlight([1])).unwrap();
        assert_eq!(json["highlightedRows"], json!([1]));
    }
}
