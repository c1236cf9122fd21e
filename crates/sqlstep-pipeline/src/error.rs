use sqlstep_ast::{UnsupportedStatement, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected by the pre-flight checks; the engine was never called.
    #[error("{0}")]
    SyntaxValidation(#[from] ValidationError),

    /// A sub-query failed; `message` is already translated for the learner.
    #[error("{message}")]
    EngineExecution { sql: String, message: String },

    #[error("{0}")]
    UnsupportedStatement(#[from] UnsupportedStatement),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SyntaxValidation(_) => "syntax_validation",
            PipelineError::EngineExecution { .. } => "engine_execution",
            PipelineError::UnsupportedStatement(_) => "unsupported_statement",
        }
    }
}
