//! Embedded DuckDB engine
//!
//! The pipeline only needs "run this SQL, give me columns and rows", so the
//! engine sits behind a small trait and DuckDB is one implementation of it.

use duckdb::Connection;
use serde::Serialize;
use serde_json::Value;
use sqlstep_ir::TableSnapshot;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

mod datasets;
pub mod value;

pub use datasets::Dataset;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Database(#[from] duckdb::Error),

    #[error("Engine connection lock poisoned")]
    Poisoned,

    #[error("Unknown dataset '{0}'. Available datasets: company, store")]
    UnknownDataset(String),

    #[error("{0}")]
    Failed(String),
}

/// Columns and positional rows of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn into_snapshot(self, name: impl Into<String>) -> TableSnapshot {
        TableSnapshot::from_values(name, &self.columns, self.rows)
    }
}

/// An engine that executes arbitrary SQL against its own tables.
pub trait Engine: Send + Sync {
    fn execute(&self, sql: &str) -> Result<QueryOutput, EngineError>;

    /// Names of user tables, for error hints.
    fn table_names(&self) -> Result<Vec<String>, EngineError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
}

pub struct DuckEngine {
    conn: Mutex<Connection>,
}

impl DuckEngine {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    /// Engine with a sample dataset already loaded.
    pub fn with_dataset(dataset: Dataset) -> Result<Self, EngineError> {
        let engine = Self::new()?;
        engine.load_dataset(dataset)?;
        Ok(engine)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn.lock().map_err(|_| EngineError::Poisoned)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), EngineError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    /// Drop every user table and recreate the dataset from scratch.
    pub fn load_dataset(&self, dataset: Dataset) -> Result<(), EngineError> {
        let existing = self.table_names()?;
        let conn = self.lock()?;
        for table in existing {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", table))?;
        }
        conn.execute_batch(dataset.script())?;
        debug!(dataset = %dataset, "Loaded sample dataset");
        Ok(())
    }

    /// Column types and row counts for every user table.
    pub fn table_info(&self) -> Result<Vec<TableInfo>, EngineError> {
        let names = self.table_names()?;
        let conn = self.lock()?;
        let mut tables = Vec::with_capacity(names.len());

        for name in names {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = 'main' AND table_name = ? \
                 ORDER BY ordinal_position",
            )?;
            let columns = stmt
                .query_map([name.as_str()], |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        data_type: row.get(1)?,
                        is_nullable: row.get::<_, String>(2)? == "YES",
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let count_query = format!("SELECT COUNT(*) FROM \"{}\"", name);
            let row_count: i64 = conn.query_row(&count_query, [], |row| row.get(0))?;

            tables.push(TableInfo {
                name,
                columns,
                row_count: usize::try_from(row_count).unwrap_or(0),
            });
        }

        Ok(tables)
    }
}

impl Engine for DuckEngine {
    fn execute(&self, sql: &str) -> Result<QueryOutput, EngineError> {
        debug!(sql = %sql, "Executing");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let width = row.as_ref().column_count();
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(value::to_json(row.get_ref(i)?));
            }
            out.push(cells);
        }
        drop(rows);

        Ok(QueryOutput {
            columns: stmt.column_names(),
            rows: out,
        })
    }

    fn table_names(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
