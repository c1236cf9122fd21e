//! SQLStep step model
//!
//! Serializable types shared by the pipeline, the engine adapter and the
//! HTTP layer. Field names serialize in camelCase for the front-end.

use serde::{Deserialize, Serialize};

mod snapshot;
mod step;

pub use snapshot::*;
pub use step::*;

/// Name of the table returned when a run produced no result.
pub const RESULT_TABLE: &str = "result";

/// Outcome of replaying one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub steps: Vec<Step>,
    pub final_result: TableSnapshot,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock milliseconds.
    pub execution_time: f64,
}

impl ExecutionResult {
    pub fn success(steps: Vec<Step>, final_result: TableSnapshot, execution_time: f64) -> Self {
        Self {
            steps,
            final_result,
            error: None,
            execution_time,
        }
    }

    /// Partial steps are kept; the final result is always empty.
    pub fn failure(steps: Vec<Step>, error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            steps,
            final_result: TableSnapshot::empty(RESULT_TABLE),
            error: Some(error.into()),
            execution_time,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan() -> Step {
        let table = TableSnapshot::from_values(
            "employees",
            &["id".to_string(), "name".to_string()],
            vec![vec![json!(1), json!("Alice Johnson")]],
        );
        Step::Scan(ScanStep {
            description: "Read all rows from employees".to_string(),
            table_name: "employees".to_string(),
            result_table: table,
        })
    }

    #[test]
    fn test_step_serializes_with_type_tag() {
        let json = serde_json::to_value(scan()).unwrap();
        assert_eq!(json["type"], "Scan");
        assert_eq!(json["tableName"], "employees");
        assert_eq!(json["resultTable"]["rows"][0]["name"], "Alice Johnson");
    }

    #[test]
    fn test_filter_metadata_field_names() {
        let step = Step::Having(FilterStep {
            description: "Keep groups".to_string(),
            condition: "COUNT(*) > 2".to_string(),
            input_table: TableSnapshot::empty("groups"),
            kept_rows: vec![0, 2],
            filtered_out_rows: vec![1],
            result_table: TableSnapshot::empty("having"),
        });
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "Having");
        assert_eq!(json["keptRows"], json!([0, 2]));
        assert_eq!(json["filteredOutRows"], json!([1]));
    }

    #[test]
    fn test_failure_has_empty_final_result() {
        let result = ExecutionResult::failure(vec![scan()], "Table not found", 1.5);
        assert!(!result.is_success());
        assert_eq!(result.steps.len(), 1);
        assert!(result.final_result.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], "Table not found");
        assert_eq!(json["executionTime"], json!(1.5));
        assert_eq!(json["finalResult"]["name"], RESULT_TABLE);
    }

    #[test]
    fn test_success_omits_error() {
        let result = ExecutionResult::success(vec![], TableSnapshot::empty("result"), 0.0);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
    }
}
