//! HTTP API
//!
//! - `POST /api/execute`: replay one statement as steps
//! - `GET /api/tables`: tables of the active dataset
//! - `POST /api/reset`: reload a sample dataset
//! - `GET /health`: liveness

use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlstep_duck::{Dataset, DuckEngine, EngineError, TableInfo};
use sqlstep_ir::ExecutionResult;
use sqlstep_pipeline::PipelineBuilder;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<DuckEngine>,
    dataset: Arc<Mutex<Dataset>>,
}

impl AppState {
    pub fn new(engine: DuckEngine, dataset: Dataset) -> Self {
        Self {
            engine: Arc::new(engine),
            dataset: Arc::new(Mutex::new(dataset)),
        }
    }

    fn active_dataset(&self) -> Result<Dataset, EngineError> {
        self.dataset.lock().map(|d| *d).map_err(|_| EngineError::Poisoned)
    }

    /// Load `dataset` unless it is already active and `force` is false.
    fn switch_dataset(&self, dataset: Dataset, force: bool) -> Result<bool, EngineError> {
        let mut active = self.dataset.lock().map_err(|_| EngineError::Poisoned)?;
        if *active == dataset && !force {
            return Ok(false);
        }
        self.engine.load_dataset(dataset)?;
        *active = dataset;
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub query: String,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub dataset: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub dataset: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(execute))
        .route("/api/tables", get(tables))
        .route("/api/reset", post(reset))
        .route("/health", get(health))
        .with_state(state)
}

/// Replay one statement. Pipeline failures still answer 200 with `error` set;
/// only an unusable request is rejected.
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecutionResult>) {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", id = %request_id, route = "execute");

    async move {
        info!(query = %request.query, schema = ?request.schema, "Execute request");

        let dataset = match request.schema.as_deref().map(str::parse::<Dataset>).transpose() {
            Ok(dataset) => dataset,
            Err(err) => {
                warn!(error = %err, "Rejected dataset");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ExecutionResult::failure(Vec::new(), err.to_string(), 0.0)),
                );
            }
        };

        let worker = state.clone();
        let joined = tokio::task::spawn_blocking(move || -> Result<ExecutionResult, EngineError> {
            if let Some(dataset) = dataset {
                worker.switch_dataset(dataset, false)?;
            }
            Ok(PipelineBuilder::new(worker.engine.as_ref()).run(&request.query))
        })
        .await;

        match joined {
            Ok(Ok(result)) => {
                crate::log_event!(
                    level: tracing::Level::INFO,
                    event: "query_replayed",
                    steps: result.steps.len(),
                    rows: result.final_result.len(),
                    failed: result.error.is_some(),
                    execution_ms: result.execution_time
                );
                (StatusCode::OK, Json(result))
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Dataset load failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ExecutionResult::failure(Vec::new(), err.to_string(), 0.0)),
                )
            }
            Err(err) => {
                warn!(error = %err, "Pipeline task failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ExecutionResult::failure(Vec::new(), "Query execution was interrupted", 0.0)),
                )
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn tables(State(state): State<AppState>) -> Result<Json<TablesResponse>, ApiError> {
    let dataset = state
        .active_dataset()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let engine = state.engine.clone();

    let tables = tokio::task::spawn_blocking(move || engine.table_info())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok(Json(TablesResponse {
        dataset: dataset.to_string(),
        tables,
    }))
}

/// Reload the named dataset, or the active one, discarding any modifications.
pub async fn reset(
    State(state): State<AppState>,
    request: Option<Json<ResetRequest>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let dataset = match request.schema.as_deref() {
        Some(name) => name
            .parse::<Dataset>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
        None => state
            .active_dataset()
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?,
    };

    let worker = state.clone();
    tokio::task::spawn_blocking(move || worker.switch_dataset(dataset, true))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    info!(dataset = %dataset, "Dataset reset");
    Ok(Json(ResetResponse {
        dataset: dataset.to_string(),
        tables: dataset.tables().iter().map(|t| t.to_string()).collect(),
    }))
}

pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlstep_ir::Step;

    fn state() -> AppState {
        AppState::new(DuckEngine::with_dataset(Dataset::Company).unwrap(), Dataset::Company)
    }

    fn request(query: &str, schema: Option<&str>) -> Json<ExecuteRequest> {
        Json(ExecuteRequest {
            query: query.to_string(),
            schema: schema.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_execute_returns_steps() {
        let (status, Json(result)) = execute(
            State(state()),
            request("SELECT * FROM employees WHERE dept_id = 1", None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(result.error.is_none());
        assert!(matches!(result.steps[0], Step::Scan(_)));
        assert!(matches!(result.steps[1], Step::Filter(_)));
        assert_eq!(result.final_result.len(), 4);
    }

    #[tokio::test]
    async fn test_execute_serializes_wire_shape() {
        let (_, Json(result)) = execute(
            State(state()),
            request("SELECT name FROM employees LIMIT 2", None),
        )
        .await;

        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body["steps"][0]["type"], "Scan");
        assert_eq!(body["steps"][0]["tableName"], "employees");
        assert_eq!(body["finalResult"]["rows"].as_array().unwrap().len(), 2);
        assert!(body["executionTime"].is_number());
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_execute_reports_validation_errors_in_body() {
        let (status, Json(result)) = execute(State(state()), request("SELECT name FROM", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(result.steps.is_empty());
        assert!(result.final_result.is_empty());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_execute_switches_dataset() {
        let state = state();
        let (status, Json(result)) = execute(
            State(state.clone()),
            request("SELECT * FROM products WHERE price > 200", Some("store")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(result.error.is_none(), "{:?}", result.error);
        assert_eq!(result.final_result.len(), 3);
        assert_eq!(state.active_dataset().unwrap(), Dataset::Store);

        let (_, Json(result)) = execute(State(state), request("SELECT * FROM employees", None)).await;
        assert!(result.error.unwrap().contains("customers, orders, products"));
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_dataset() {
        let (status, Json(result)) =
            execute(State(state()), request("SELECT 1 FROM employees", Some("nope"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(result.error.unwrap().contains("Unknown dataset 'nope'"));
    }

    #[tokio::test]
    async fn test_tables_lists_active_dataset() {
        let Json(response) = tables(State(state())).await.unwrap();
        assert_eq!(response.dataset, "company");
        let names: Vec<_> = response.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["departments", "employees", "projects"]);
        let employees = &response.tables[1];
        assert_eq!(employees.row_count, 15);
    }

    #[tokio::test]
    async fn test_reset_discards_modifications() {
        let state = state();
        let (_, Json(deleted)) =
            execute(State(state.clone()), request("DELETE FROM employees", None)).await;
        assert!(deleted.error.is_none(), "{:?}", deleted.error);
        assert!(deleted.final_result.is_empty());

        let Json(response) = reset(State(state.clone()), None).await.unwrap();
        assert_eq!(response.dataset, "company");

        let Json(listing) = tables(State(state)).await.unwrap();
        assert_eq!(listing.tables[1].row_count, 15);
    }

    #[tokio::test]
    async fn test_reset_rejects_unknown_dataset() {
        let err = reset(
            State(state()),
            Some(Json(ResetRequest {
                schema: Some("warehouse".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }
}
