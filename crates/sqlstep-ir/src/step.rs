//! Pipeline steps, one per relational operator
//!
//! Steps serialize with a `type` discriminant; this JSON is what the
//! animation front-end consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::TableSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    Scan(ScanStep),
    Join(JoinStep),
    Filter(FilterStep),
    GroupBy(GroupByStep),
    Having(FilterStep),
    Project(ProjectStep),
    OrderBy(OrderByStep),
    Limit(LimitStep),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Scan(_) => "Scan",
            Step::Join(_) => "Join",
            Step::Filter(_) => "Filter",
            Step::GroupBy(_) => "GroupBy",
            Step::Having(_) => "Having",
            Step::Project(_) => "Project",
            Step::OrderBy(_) => "OrderBy",
            Step::Limit(_) => "Limit",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Step::Scan(s) => &s.description,
            Step::Join(s) => &s.description,
            Step::Filter(s) | Step::Having(s) => &s.description,
            Step::GroupBy(s) => &s.description,
            Step::Project(s) => &s.description,
            Step::OrderBy(s) => &s.description,
            Step::Limit(s) => &s.description,
        }
    }

    /// Table state after this step.
    pub fn result_table(&self) -> &TableSnapshot {
        match self {
            Step::Scan(s) => &s.result_table,
            Step::Join(s) => &s.result_table,
            Step::Filter(s) | Step::Having(s) => &s.result_table,
            Step::GroupBy(s) => &s.result_table,
            Step::Project(s) => &s.result_table,
            Step::OrderBy(s) => &s.result_table,
            Step::Limit(s) => &s.result_table,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStep {
    pub description: String,
    pub table_name: String,
    pub result_table: TableSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub description: String,
    pub join_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub left_table: TableSnapshot,
    pub right_table: TableSnapshot,
    /// (left index, right index) for every matched pair.
    pub matched_pairs: Vec<(usize, usize)>,
    pub unmatched_left: Vec<usize>,
    pub unmatched_right: Vec<usize>,
    pub result_table: TableSnapshot,
}

/// WHERE and HAVING share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStep {
    pub description: String,
    pub condition: String,
    pub input_table: TableSnapshot,
    pub kept_rows: Vec<usize>,
    pub filtered_out_rows: Vec<usize>,
    pub result_table: TableSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Key values joined by the group separator.
    pub key: String,
    pub key_values: Vec<Value>,
    pub row_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByStep {
    pub description: String,
    pub columns: Vec<String>,
    pub aggregates: Vec<String>,
    pub input_table: TableSnapshot,
    pub groups: Vec<Group>,
    pub result_table: TableSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedColumn {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub output_name: String,
    /// Input column the value was read from, when it maps to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStep {
    pub description: String,
    pub columns: Vec<ProjectedColumn>,
    pub input_table: TableSnapshot,
    pub result_table: TableSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortTerm {
    pub column: String,
    /// `ASC` or `DESC`.
    pub direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByStep {
    pub description: String,
    pub terms: Vec<SortTerm>,
    pub input_table: TableSnapshot,
    pub result_table: TableSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStep {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub input_table: TableSnapshot,
    pub result_table: TableSnapshot,
}
